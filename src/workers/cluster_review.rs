//! Per-cluster review: asks the LLM which member posts don't actually
//! belong, given the cluster's headline and a sample of its members.
//! Event-driven — fired by cluster-sync for new or meaningfully-grown
//! clusters, consumed by the shared event dispatch worker.

use chrono::Utc;
use serde::Deserialize;
use sqlx::PgPool;

use crate::config::PipelineConfig;
use crate::domain::cluster;
use crate::services::cluster_stats;
use crate::services::llm;

const REVIEW_SKIP_WINDOW_MINUTES: i64 = 30;
const MIN_MEMBERS_TO_REVIEW: usize = 3;
const MAX_MEMBERS_SAMPLED: i64 = 30;
const MAX_TOKENS: u32 = 1024;

const SYSTEM_PROMPT: &str = r#"You review a cluster of social media posts that an automated system grouped
together as coverage of the same news story. You will be given the
cluster's headline and a numbered list of member posts. Identify any
posts that do NOT actually belong — off-topic, a different event, or
pure commentary/reaction with no news content of its own.

Respond with JSON only, no commentary, in this exact shape:
{"remove": [123, 456]}

If every post belongs, respond with {"remove": []}."#;

#[derive(Debug, Deserialize)]
struct RawReviewResponse {
    remove: Vec<i64>,
}

fn build_prompt(headline: &str, members: &[cluster::MemberDetail]) -> String {
    let mut prompt = format!("Cluster headline: {headline}\n\nMember posts:\n");
    for member in members {
        let text = member.normalized_headline.as_deref().unwrap_or("(no normalized text)");
        prompt.push_str(&format!("- post {}: {}\n", member.post_id, text));
    }
    prompt
}

/// Reviews one cluster, removing any posts the LLM judges off-topic.
/// Skips clusters reviewed recently or too small to bother with, both of
/// which are no-ops rather than errors — the event was still handled.
pub async fn review_cluster(db: &PgPool, config: &PipelineConfig, cluster_id: i64) {
    let cluster = match cluster::fetch_cluster(db, cluster_id).await {
        Ok(Some(c)) => c,
        Ok(None) => return,
        Err(e) => {
            eprintln!("[cluster-review] failed to load cluster {cluster_id}: {e}");
            return;
        }
    };

    if let Some(reviewed_at) = cluster.reviewed_at {
        if Utc::now() - reviewed_at < chrono::Duration::minutes(REVIEW_SKIP_WINDOW_MINUTES) {
            return;
        }
    }

    if (cluster.member_count as usize) < MIN_MEMBERS_TO_REVIEW {
        return;
    }

    let Some(headline) = cluster.headline.as_deref() else {
        return;
    };

    let members = match cluster::fetch_cluster_member_details_limited(db, cluster_id, MAX_MEMBERS_SAMPLED).await {
        Ok(m) => m,
        Err(e) => {
            eprintln!("[cluster-review] failed to load members for cluster {cluster_id}: {e}");
            return;
        }
    };

    if members.len() < MIN_MEMBERS_TO_REVIEW {
        return;
    }

    let prompt = build_prompt(headline, &members);

    let raw = match llm::run_json_completion(
        SYSTEM_PROMPT.to_string(),
        prompt,
        config.normalizer_model.clone(),
        config.review_timeout_secs,
        MAX_TOKENS,
    )
    .await
    {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("[cluster-review] LLM call failed for cluster {cluster_id}: {e}");
            return;
        }
    };

    let Some(value) = llm::extract_json(&raw) else {
        eprintln!("[cluster-review] unparseable review response for cluster {cluster_id}");
        return;
    };

    let parsed: RawReviewResponse = match serde_json::from_value(value) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("[cluster-review] malformed review response for cluster {cluster_id}: {e}");
            return;
        }
    };

    if !parsed.remove.is_empty() {
        if let Err(e) = cluster::remove_members(db, cluster_id, &parsed.remove).await {
            eprintln!("[cluster-review] failed to remove members from cluster {cluster_id}: {e}");
            return;
        }
        if let Err(e) = cluster_stats::recompute_and_store(db, config, cluster_id).await {
            eprintln!("[cluster-review] failed to recompute stats for cluster {cluster_id}: {e}");
        }
    }

    if let Err(e) = cluster::mark_reviewed(db, cluster_id).await {
        eprintln!("[cluster-review] failed to stamp reviewed_at for cluster {cluster_id}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cluster::MemberDetail;

    fn member(post_id: i64, text: &str) -> MemberDetail {
        MemberDetail {
            post_id,
            author_handle: "alice".to_string(),
            likes: 0,
            retweets: 0,
            quotes: 0,
            replies: 0,
            bookmarks: 0,
            created_at: Utc::now(),
            normalized_headline: Some(text.to_string()),
            normalized_facts: None,
            normalized_headline_embedding: None,
        }
    }

    #[test]
    fn build_prompt_includes_headline_and_every_member() {
        let members = vec![member(1, "post one text"), member(2, "post two text")];
        let prompt = build_prompt("storms hit the coast", &members);
        assert!(prompt.contains("storms hit the coast"));
        assert!(prompt.contains("post 1:"));
        assert!(prompt.contains("post 2:"));
    }
}
