//! Embedding provider client. Produces a fixed-dimension dense vector for a
//! normalized headline.

use pgvector::Vector;
use serde::{Deserialize, Serialize};

use crate::config::{EmbeddingProvider, PipelineConfig};
use crate::services::error::PipelineError;

#[derive(Debug, Serialize)]
struct GoogleEmbedRequest<'a> {
    model: String,
    content: GoogleContent<'a>,
    task_type: &'a str,
}

#[derive(Debug, Serialize)]
struct GoogleContent<'a> {
    parts: Vec<GooglePart<'a>>,
}

#[derive(Debug, Serialize)]
struct GooglePart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GoogleEmbedResponse {
    embedding: GoogleEmbedding,
}

#[derive(Debug, Deserialize)]
struct GoogleEmbedding {
    values: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct OpenAiEmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
    dimensions: i32,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbeddingEntry>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingEntry {
    embedding: Vec<f32>,
}

pub async fn embed_headline(config: &PipelineConfig, headline: &str) -> Result<Vector, PipelineError> {
    let values = match config.embedding_provider {
        EmbeddingProvider::Google => embed_via_google(config, headline).await?,
        EmbeddingProvider::OpenAi | EmbeddingProvider::OpenRouter => embed_via_openai_compatible(config, headline).await?,
    };

    if values.len() != config.embedding_dimensions as usize {
        return Err(PipelineError::Permanent(format!(
            "embedding provider returned {} dimensions, expected {}",
            values.len(),
            config.embedding_dimensions
        )));
    }

    Ok(Vector::from(values))
}

async fn embed_via_google(config: &PipelineConfig, headline: &str) -> Result<Vec<f32>, PipelineError> {
    let url = format!(
        "https://generativelanguage.googleapis.com/v1beta/models/{}:embedContent?key={}",
        config.embedding_model, config.embedding_api_key
    );

    let body = GoogleEmbedRequest {
        model: format!("models/{}", config.embedding_model),
        content: GoogleContent {
            parts: vec![GooglePart { text: headline }],
        },
        task_type: &config.embedding_task_type,
    };

    let client = reqwest::Client::new();
    let response = client
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(PipelineError::from)?
        .error_for_status()
        .map_err(PipelineError::from)?;

    let parsed: GoogleEmbedResponse = response.json().await.map_err(PipelineError::from)?;
    Ok(parsed.embedding.values)
}

async fn embed_via_openai_compatible(config: &PipelineConfig, headline: &str) -> Result<Vec<f32>, PipelineError> {
    let base = match config.embedding_provider {
        EmbeddingProvider::OpenRouter => "https://openrouter.ai/api/v1/embeddings",
        _ => "https://api.openai.com/v1/embeddings",
    };

    let body = OpenAiEmbedRequest {
        model: &config.embedding_model,
        input: headline,
        dimensions: config.embedding_dimensions,
    };

    let client = reqwest::Client::new();
    let response = client
        .post(base)
        .bearer_auth(&config.embedding_api_key)
        .json(&body)
        .send()
        .await
        .map_err(PipelineError::from)?
        .error_for_status()
        .map_err(PipelineError::from)?;

    let parsed: OpenAiEmbedResponse = response.json().await.map_err(PipelineError::from)?;
    parsed
        .data
        .into_iter()
        .next()
        .map(|e| e.embedding)
        .ok_or_else(|| PipelineError::Permanent("embedding response had no data entries".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_mismatch_is_a_permanent_error() {
        let got = vec![0.0_f32; 10];
        let expected = 1536_usize;
        assert_ne!(got.len(), expected);
    }
}
