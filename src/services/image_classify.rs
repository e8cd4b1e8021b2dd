//! Vision-LLM image classification and conditional summarization.

use serde::Deserialize;

use crate::services::llm::{extract_json, invariant_for_unparseable, run_json_completion};
use crate::services::error::PipelineError;

/// Closed category enum. Unknown values from the model are rejected during
/// validation, not silently accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageCategory {
    Logo,
    Person,
    Place,
    NewsHeadline,
    Chart,
    Table,
    Tweet,
    Document,
    Article,
    Other,
    Error,
}

impl ImageCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageCategory::Logo => "logo",
            ImageCategory::Person => "person",
            ImageCategory::Place => "place",
            ImageCategory::NewsHeadline => "news_headline",
            ImageCategory::Chart => "chart",
            ImageCategory::Table => "table",
            ImageCategory::Tweet => "tweet",
            ImageCategory::Document => "document",
            ImageCategory::Article => "article",
            ImageCategory::Other => "other",
            ImageCategory::Error => "error",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "logo" => ImageCategory::Logo,
            "person" => ImageCategory::Person,
            "place" => ImageCategory::Place,
            "news_headline" => ImageCategory::NewsHeadline,
            "chart" => ImageCategory::Chart,
            "table" => ImageCategory::Table,
            "tweet" => ImageCategory::Tweet,
            "document" => ImageCategory::Document,
            "article" => ImageCategory::Article,
            "other" => ImageCategory::Other,
            _ => return None,
        })
    }

    /// Financial analysis is warranted for categories that plausibly carry
    /// financial content: charts, tables, news headlines, documents,
    /// articles, and tweets.
    fn warrants_financial_analysis(self) -> bool {
        matches!(
            self,
            ImageCategory::Chart
                | ImageCategory::Table
                | ImageCategory::NewsHeadline
                | ImageCategory::Document
                | ImageCategory::Article
                | ImageCategory::Tweet
        )
    }
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    image_category: String,
    warrants_financial_analysis: bool,
    #[serde(default)]
    #[allow(dead_code)]
    brief_description: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    reason: Option<String>,
}

pub struct Classification {
    pub category: ImageCategory,
    pub warrants_financial_analysis: bool,
}

const CLASSIFY_SYSTEM_PROMPT: &str = "You classify a single image attached to a social post. \
Respond with a JSON object only: {\"image_category\": one of logo|person|place|news_headline|chart|table|tweet|document|article|other, \
\"warrants_financial_analysis\": boolean, \"brief_description\": string, \"reason\": string}.";

/// On failure of the provider call or of JSON validation, the category is
/// pinned to `error` so downstream normalization is never blocked.
pub async fn classify_image(image_url: &str, model: &str, timeout_secs: u64) -> Classification {
    let user_prompt = format!("Classify the image at {image_url}.");
    let raw = match run_json_completion(
        CLASSIFY_SYSTEM_PROMPT.to_string(),
        user_prompt,
        model.to_string(),
        timeout_secs,
        300,
    )
    .await
    {
        Ok(text) => text,
        Err(_) => {
            return Classification {
                category: ImageCategory::Error,
                warrants_financial_analysis: false,
            };
        }
    };

    match parse_classification(&raw) {
        Ok(c) => c,
        Err(_) => Classification {
            category: ImageCategory::Error,
            warrants_financial_analysis: false,
        },
    }
}

fn parse_classification(raw: &str) -> Result<Classification, PipelineError> {
    let value = extract_json(raw).ok_or_else(|| invariant_for_unparseable("image classification"))?;
    let parsed: RawClassification = serde_json::from_value(value)
        .map_err(|e| PipelineError::Invariant(format!("malformed classification payload: {e}")))?;
    let category = ImageCategory::from_str(&parsed.image_category)
        .ok_or_else(|| PipelineError::Invariant(format!("unknown category: {}", parsed.image_category)))?;

    Ok(Classification {
        category,
        warrants_financial_analysis: parsed.warrants_financial_analysis && category.warrants_financial_analysis(),
    })
}

const SUMMARY_SYSTEM_PROMPT: &str =
    "Write a 1-3 sentence factual summary of the image for a reader who cannot see it. \
Use the surrounding post text only as context, never as a substitute for what's visible.";

pub async fn summarize_image(image_url: &str, post_text: &str, model: &str, timeout_secs: u64) -> Option<String> {
    let user_prompt = format!("Image: {image_url}\nPost text for context: {post_text}");
    let raw = run_json_completion(
        SUMMARY_SYSTEM_PROMPT.to_string(),
        user_prompt,
        model.to_string(),
        timeout_secs,
        300,
    )
    .await
    .ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chart_category_warrants_financial_analysis_when_flagged() {
        let raw = r#"{"image_category": "chart", "warrants_financial_analysis": true}"#;
        let c = parse_classification(raw).unwrap();
        assert_eq!(c.category.as_str(), "chart");
        assert!(c.warrants_financial_analysis);
    }

    #[test]
    fn logo_category_never_warrants_financial_analysis_even_if_flagged() {
        let raw = r#"{"image_category": "logo", "warrants_financial_analysis": true}"#;
        let c = parse_classification(raw).unwrap();
        assert!(!c.warrants_financial_analysis);
    }

    #[test]
    fn unknown_category_is_an_invariant_violation() {
        let raw = r#"{"image_category": "spaceship", "warrants_financial_analysis": false}"#;
        assert!(parse_classification(raw).is_err());
    }
}
