//! Process-wide configuration, loaded once at startup from the environment.
//!
//! Mirrors the closed enumeration in the system design doc: every tunable
//! has a typed default and is collected into one struct instead of being
//! read ad hoc at each call site.

use std::collections::HashSet;
use std::env;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProvider {
    Google,
    OpenAi,
    OpenRouter,
}

impl EmbeddingProvider {
    pub fn from_env(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "openai" => EmbeddingProvider::OpenAi,
            "openrouter" => EmbeddingProvider::OpenRouter,
            _ => EmbeddingProvider::Google,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizerProvider {
    OpenRouter,
    Portkey,
}

impl NormalizerProvider {
    fn from_env(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "portkey" => NormalizerProvider::Portkey,
            _ => NormalizerProvider::OpenRouter,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Credentials
    pub post_source_auth_key: String,
    pub scraping_proxy_key: Option<String>,
    pub premium_proxy_key: Option<String>,
    pub embedding_api_key: String,
    pub normalizer_api_key: String,

    // Embedding
    pub embedding_provider: EmbeddingProvider,
    pub embedding_model: String,
    pub embedding_dimensions: i32,
    pub embedding_task_type: String,
    pub embed_concurrency: usize,

    // Normalizer / curation / review LLMs
    pub normalizer_provider: NormalizerProvider,
    pub normalizer_model: String,
    pub normalizer_timeout_secs: u64,
    pub curation_timeout_secs: u64,
    pub review_timeout_secs: u64,

    // Clustering thresholds
    pub similarity_threshold: f64,
    pub match_jaccard_threshold: f64,
    pub min_intersection: usize,
    pub min_cluster_size: usize,
    pub max_days_window: i64,
    pub min_tweets: i64,
    pub min_users: i64,
    pub review_min_new_members: usize,
    pub stale_deactivate_hours: i64,
    pub sync_lookback_hours: i64,

    // Ingest
    pub author_handles: Vec<String>,
    pub blocked_accounts: HashSet<String>,
    pub author_batch_size: usize,
    pub author_batch_delay_secs: f64,
    pub keyword_query: String,
    pub keyword_page_count: usize,

    // Concurrency caps
    pub cluster_review_concurrency: usize,
    pub cluster_backfill_concurrency: usize,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let author_handles = env::var("INGEST_AUTHOR_HANDLES")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|h| h.trim().trim_start_matches('@').to_string())
                    .filter(|h| !h.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let blocked_accounts = env::var("BLOCKED_ACCOUNTS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|h| h.trim().trim_start_matches('@').to_lowercase())
                    .filter(|h| !h.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            post_source_auth_key: env::var("POST_SOURCE_AUTH_KEY")
                .expect("POST_SOURCE_AUTH_KEY must be set"),
            scraping_proxy_key: env::var("SCRAPING_PROXY_KEY").ok(),
            premium_proxy_key: env::var("PREMIUM_PROXY_KEY").ok(),
            embedding_api_key: env::var("EMBEDDING_API_KEY")
                .expect("EMBEDDING_API_KEY must be set"),
            normalizer_api_key: env::var("NORMALIZER_API_KEY")
                .expect("NORMALIZER_API_KEY must be set"),

            embedding_provider: EmbeddingProvider::from_env(&env_string(
                "EMBEDDING_PROVIDER",
                "google",
            )),
            embedding_model: env_string("EMBEDDING_MODEL", "text-embedding-004"),
            embedding_dimensions: env_parse("EMBEDDING_DIMENSIONS", 1536),
            embedding_task_type: env_string("EMBEDDING_TASK_TYPE", "CLUSTERING"),
            embed_concurrency: env_parse("EMBED_CONCURRENCY", 5),

            normalizer_provider: NormalizerProvider::from_env(&env_string(
                "NORMALIZER_PROVIDER",
                "openrouter",
            )),
            normalizer_model: env_string("NORMALIZER_MODEL", "openai/gpt-4o-mini"),
            normalizer_timeout_secs: env_parse("NORMALIZER_TIMEOUT_SECS", 45),
            curation_timeout_secs: env_parse("CURATION_TIMEOUT_SECS", 60),
            review_timeout_secs: env_parse("REVIEW_TIMEOUT_SECS", 45),

            similarity_threshold: env_parse("SIMILARITY_THRESHOLD", 0.94),
            match_jaccard_threshold: env_parse("MATCH_JACCARD_THRESHOLD", 0.25),
            min_intersection: env_parse("MIN_INTERSECTION", 2),
            min_cluster_size: env_parse("MIN_CLUSTER_SIZE", 2),
            max_days_window: env_parse("MAX_DAYS_WINDOW", 3),
            min_tweets: env_parse("MIN_TWEETS", 3),
            min_users: env_parse("MIN_USERS", 2),
            review_min_new_members: env_parse("REVIEW_MIN_NEW_MEMBERS", 5),
            stale_deactivate_hours: env_parse("STALE_DEACTIVATE_HOURS", 2),
            sync_lookback_hours: env_parse("SYNC_LOOKBACK_HOURS", 24),

            author_handles,
            blocked_accounts,
            author_batch_size: env_parse("INGEST_AUTHOR_BATCH_SIZE", 8),
            author_batch_delay_secs: env_parse("INGEST_AUTHOR_BATCH_DELAY_SECS", 5.5),
            keyword_query: env_string("INGEST_KEYWORD_QUERY", ""),
            keyword_page_count: env_parse("INGEST_KEYWORD_PAGE_COUNT", 2),

            cluster_review_concurrency: env_parse("CLUSTER_REVIEW_CONCURRENCY", 3),
            cluster_backfill_concurrency: env_parse("CLUSTER_BACKFILL_CONCURRENCY", 1),
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// A fully-populated config for unit tests, independent of the
    /// environment. Thresholds match the documented defaults.
    pub fn test_config() -> PipelineConfig {
        PipelineConfig {
            post_source_auth_key: String::new(),
            scraping_proxy_key: None,
            premium_proxy_key: None,
            embedding_api_key: String::new(),
            normalizer_api_key: String::new(),
            embedding_provider: EmbeddingProvider::Google,
            embedding_model: String::new(),
            embedding_dimensions: 1536,
            embedding_task_type: String::new(),
            embed_concurrency: 5,
            normalizer_provider: NormalizerProvider::OpenRouter,
            normalizer_model: String::new(),
            normalizer_timeout_secs: 45,
            curation_timeout_secs: 60,
            review_timeout_secs: 45,
            similarity_threshold: 0.94,
            match_jaccard_threshold: 0.25,
            min_intersection: 2,
            min_cluster_size: 2,
            max_days_window: 3,
            min_tweets: 3,
            min_users: 2,
            review_min_new_members: 5,
            stale_deactivate_hours: 2,
            sync_lookback_hours: 24,
            author_handles: vec![],
            blocked_accounts: HashSet::new(),
            author_batch_size: 8,
            author_batch_delay_secs: 5.5,
            keyword_query: String::new(),
            keyword_page_count: 2,
            cluster_review_concurrency: 3,
            cluster_backfill_concurrency: 1,
        }
    }
}
