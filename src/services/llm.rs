//! Thin LLM completion wrapper used by normalize, image classification, and
//! the curation/review passes. Every caller gets back raw text and is
//! responsible for running it through [`extract_json`] — the LLM is treated
//! as an oracle with untrusted output per the error handling design.

use reson_agentic::agentic;
use reson_agentic::runtime::{RunParams, Runtime};
use reson_agentic::types::{ChatRole, MediaPart, MultimodalMessage};
use reson_agentic::utils::ConversationMessage;
use std::time::Duration;

use crate::services::error::PipelineError;

#[agentic(model = "gemini:gemini-2.5-flash")]
pub async fn run_json_completion(
    system_prompt: String,
    user_prompt: String,
    model: String,
    timeout_secs: u64,
    max_tokens: u32,
    runtime: Runtime,
) -> reson_agentic::error::Result<String> {
    let message = MultimodalMessage {
        role: ChatRole::User,
        parts: vec![MediaPart::Text { text: user_prompt }],
        cache_marker: None,
    };

    let response = runtime
        .run(RunParams {
            system: Some(system_prompt),
            history: Some(vec![ConversationMessage::Multimodal(message)]),
            model: Some(model),
            timeout: Some(Duration::from_secs(timeout_secs)),
            max_tokens: Some(max_tokens),
            temperature: Some(0.0),
            ..Default::default()
        })
        .await?;

    Ok(response
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| response.to_string()))
}

/// Try, in order: whole-string JSON, a fenced ```json block, then the
/// first-brace-to-last-brace substring. Returns `None` (an invariant
/// violation in the caller's terms) only if none of the three parse.
pub fn extract_json(raw: &str) -> Option<serde_json::Value> {
    if let Ok(v) = serde_json::from_str(raw.trim()) {
        return Some(v);
    }

    if let Some(fenced) = extract_fenced_block(raw) {
        if let Ok(v) = serde_json::from_str(fenced.trim()) {
            return Some(v);
        }
    }

    if let Some(braces) = extract_first_to_last_brace(raw) {
        if let Ok(v) = serde_json::from_str(braces) {
            return Some(v);
        }
    }

    None
}

fn extract_fenced_block(raw: &str) -> Option<&str> {
    let start_marker = raw.find("```json")?;
    let after = &raw[start_marker + "```json".len()..];
    let end = after.find("```")?;
    Some(&after[..end])
}

fn extract_first_to_last_brace(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

pub fn invariant_for_unparseable(context: &str) -> PipelineError {
    PipelineError::Invariant(format!("could not extract JSON from LLM response: {context}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_whole_string_json() {
        let raw = r#"{"headline": "x"}"#;
        assert_eq!(extract_json(raw), Some(json!({"headline": "x"})));
    }

    #[test]
    fn extracts_fenced_json_block() {
        let raw = "Here you go:\n```json\n{\"headline\": \"x\"}\n```\nThanks";
        assert_eq!(extract_json(raw), Some(json!({"headline": "x"})));
    }

    #[test]
    fn extracts_first_brace_to_last_brace() {
        let raw = "sure, the result is {\"headline\": \"x\"} hope that helps";
        assert_eq!(extract_json(raw), Some(json!({"headline": "x"})));
    }

    #[test]
    fn returns_none_for_unparseable_text() {
        assert_eq!(extract_json("no json at all here"), None);
    }
}
