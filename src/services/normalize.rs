//! Normalizes raw post text plus enrichment context into a canonical
//! headline and atomic fact list.

use serde::Deserialize;

use crate::services::llm::{extract_json, invariant_for_unparseable, run_json_completion};
use crate::services::error::PipelineError;

const MAX_HEADLINE_CHARS: usize = 240;
const MAX_FACTS: usize = 12;
const NEUTRAL_HEADLINE_FALLBACK: &str = "Untitled post";

const SYSTEM_PROMPT: &str = "You turn a social post, optional quoted text, linked-article excerpts, \
and image summaries into a canonical news headline and a list of atomic facts. \
Rules: use only claims present in the input; each fact must be atomic and independently meaningful; \
preserve tickers and numbers exactly; never speculate or add outside information; if there is no \
factual development in the input, return an empty fact list and a short neutral headline. \
Respond with JSON only: {\"headline\": string, \"facts\": [string, ...]}.";

pub struct NormalizeInput<'a> {
    pub raw_text: &'a str,
    pub quoted_text: Option<&'a str>,
    pub url_contexts: &'a [String],
    pub image_summaries: &'a [String],
}

pub struct NormalizeOutput {
    pub headline: String,
    pub facts: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawNormalization {
    #[serde(default)]
    headline: String,
    #[serde(default)]
    facts: Vec<String>,
}

fn build_user_prompt(input: &NormalizeInput<'_>) -> String {
    let mut sections = vec![format!("Post text:\n{}", input.raw_text)];
    if let Some(quoted) = input.quoted_text {
        sections.push(format!("Quoted post:\n{quoted}"));
    }
    for (i, ctx) in input.url_contexts.iter().enumerate() {
        sections.push(format!("Linked article {}:\n{}", i + 1, ctx));
    }
    for (i, summary) in input.image_summaries.iter().enumerate() {
        sections.push(format!("Image {} summary:\n{}", i + 1, summary));
    }
    sections.join("\n\n")
}

/// `no_text_to_embed` is returned when the post has neither body text nor
/// any enrichment context worth normalizing.
pub fn should_skip(input: &NormalizeInput<'_>) -> bool {
    input.raw_text.trim().is_empty()
        && input.url_contexts.is_empty()
        && input.image_summaries.is_empty()
}

pub async fn normalize(
    input: &NormalizeInput<'_>,
    model: &str,
    timeout_secs: u64,
) -> Result<NormalizeOutput, PipelineError> {
    let raw = run_json_completion(
        SYSTEM_PROMPT.to_string(),
        build_user_prompt(input),
        model.to_string(),
        timeout_secs,
        700,
    )
    .await
    .map_err(|e| PipelineError::Transient(e.to_string()))?;

    let parsed = parse_and_postprocess(&raw, input.raw_text)?;
    Ok(parsed)
}

fn parse_and_postprocess(raw: &str, fallback_text: &str) -> Result<NormalizeOutput, PipelineError> {
    let value = extract_json(raw).ok_or_else(|| invariant_for_unparseable("normalize"))?;
    let parsed: RawNormalization = serde_json::from_value(value)
        .map_err(|e| PipelineError::Invariant(format!("malformed normalization payload: {e}")))?;

    Ok(postprocess(parsed.headline, parsed.facts, fallback_text))
}

fn postprocess(headline: String, facts: Vec<String>, fallback_text: &str) -> NormalizeOutput {
    let mut facts = dedupe_facts(facts);
    facts.truncate(MAX_FACTS);

    let mut headline = collapse_whitespace(&headline);
    if headline.is_empty() {
        headline = facts.first().cloned().unwrap_or_else(|| {
            let fallback = collapse_whitespace(fallback_text);
            if fallback.is_empty() {
                NEUTRAL_HEADLINE_FALLBACK.to_string()
            } else {
                truncate_chars(&fallback, MAX_HEADLINE_CHARS)
            }
        });
    }
    headline = truncate_chars(&headline, MAX_HEADLINE_CHARS);

    NormalizeOutput { headline, facts }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn dedupe_facts(facts: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    facts
        .into_iter()
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .filter(|f| seen.insert(f.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headline_is_truncated_to_240_characters() {
        let long = "x".repeat(300);
        let out = postprocess(long.clone(), vec![], "fallback text");
        assert_eq!(out.headline.chars().count(), 240);
    }

    #[test]
    fn empty_headline_falls_back_to_first_fact() {
        let out = postprocess(
            "   ".to_string(),
            vec!["Exchange X listed TOKEN".to_string()],
            "raw text",
        );
        assert_eq!(out.headline, "Exchange X listed TOKEN");
    }

    #[test]
    fn empty_headline_and_no_facts_falls_back_to_raw_text() {
        let out = postprocess("".to_string(), vec![], "Breaking: market moves");
        assert_eq!(out.headline, "Breaking: market moves");
    }

    #[test]
    fn empty_headline_no_facts_no_raw_text_uses_neutral_fallback() {
        let out = postprocess("".to_string(), vec![], "   ");
        assert_eq!(out.headline, NEUTRAL_HEADLINE_FALLBACK);
    }

    #[test]
    fn facts_are_deduped_by_exact_match_after_trim() {
        let out = postprocess(
            "Headline".to_string(),
            vec![" fact a ".to_string(), "fact a".to_string(), "fact b".to_string()],
            "raw",
        );
        assert_eq!(out.facts, vec!["fact a".to_string(), "fact b".to_string()]);
    }

    #[test]
    fn facts_are_capped_at_twelve() {
        let facts: Vec<String> = (0..20).map(|i| format!("fact {i}")).collect();
        let out = postprocess("Headline".to_string(), facts, "raw");
        assert_eq!(out.facts.len(), MAX_FACTS);
    }

    #[test]
    fn skips_when_there_is_no_text_and_no_enrichment_context() {
        let input = NormalizeInput {
            raw_text: "   ",
            quoted_text: None,
            url_contexts: &[],
            image_summaries: &[],
        };
        assert!(should_skip(&input));
    }

    #[test]
    fn does_not_skip_when_image_summaries_exist_despite_empty_body() {
        let input = NormalizeInput {
            raw_text: "",
            quoted_text: None,
            url_contexts: &[],
            image_summaries: &["a chart showing a price spike".to_string()],
        };
        assert!(!should_skip(&input));
    }
}
