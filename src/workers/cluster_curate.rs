//! Cluster-curate: duplicate consolidation. Finds separate clusters that
//! describe the same event and merges them, conservatively — different
//! jurisdictions or time periods are not the same story.
//!
//! Single-concurrency, same reasoning as cluster-sync: merges mutate
//! membership and must not race against each other.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use apalis::prelude::*;
use apalis_cron::{CronStream, Schedule};
use apalis_sql::postgres::PostgresStorage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::config::PipelineConfig;
use crate::domain::cluster::{self, Cluster};
use crate::events::PipelineEvent;
use crate::services::cluster_stats;
use crate::services::db;
use crate::services::llm;
use crate::services::union_find::UnionFind;

const FUNCTION_ID: &str = "cluster_curate";
const CRON_SCHEDULE: &str = "0 */20 * * * *";
const CURATE_LOOKBACK_HOURS: i64 = 48;
const CURATE_CLUSTER_LIMIT: i64 = 500;
const SMALL_POOL_THRESHOLD: usize = 100;
const CHAR_BUDGET_PER_CALL: usize = 12_000;
const FACTS_PER_CLUSTER: usize = 3;
const MAX_TOKENS: u32 = 2048;

const SYSTEM_PROMPT: &str = r#"You consolidate duplicate news story clusters. You will be shown a numbered
list of clusters, each with a headline and up to three supporting facts.
Find groups of clusters that describe the exact same specific event — not
merely the same topic. Clusters about the same company or person in
different jurisdictions, at different times, or covering different
specific incidents are NOT duplicates and must not be merged.

Respond with JSON only, no commentary, in this exact shape:
{"merge_groups": [{"cluster_ids": [1, 2], "reason": "short reason"}]}

If nothing should merge, respond with {"merge_groups": []}."#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterCurateJob {
    pub scheduled_at: DateTime<Utc>,
}

impl From<DateTime<Utc>> for ClusterCurateJob {
    fn from(dt: DateTime<Utc>) -> Self {
        ClusterCurateJob { scheduled_at: dt }
    }
}

#[derive(Clone)]
pub struct ClusterCurateContext {
    pub pool: PgPool,
    pub config: Arc<PipelineConfig>,
}

async fn run_job(_job: ClusterCurateJob, ctx: Data<ClusterCurateContext>) -> Result<(), Error> {
    if let Err(e) = db::with_run_tracking(&ctx.pool, FUNCTION_ID, run_once(&ctx)).await {
        eprintln!("[cluster-curate] run failed: {e}");
    }
    Ok(())
}

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "of", "in", "on", "to", "for", "and", "or", "is", "are", "with", "at", "by", "from", "as",
    "it", "this", "that", "after", "over", "new", "says", "said",
];

/// Tokens worth indexing for duplicate-group discovery: stopwords dropped,
/// tickers and short numerics (all-caps, all-digit) kept regardless of
/// length, everything else needs to be 3+ chars.
fn tokenize(headline: &str) -> HashSet<String> {
    headline
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .filter(|t| {
            let lower = t.to_lowercase();
            !STOPWORDS.contains(&lower.as_str())
                && (t.len() >= 3 || t.chars().all(|c| c.is_ascii_digit()) || t.chars().all(|c| c.is_ascii_uppercase()))
        })
        .map(|t| t.to_lowercase())
        .collect()
}

/// Step 2: candidate duplicate groups. Below the threshold, one group
/// holding everything. Above it, a token inverted index over headlines,
/// connected components over cluster pairs sharing at least two tokens.
fn build_candidate_groups(clusters: &[Cluster]) -> Vec<Vec<i64>> {
    if clusters.len() <= SMALL_POOL_THRESHOLD {
        return vec![clusters.iter().map(|c| c.id).collect()];
    }

    let token_sets: Vec<HashSet<String>> = clusters
        .iter()
        .map(|c| tokenize(c.headline.as_deref().unwrap_or("")))
        .collect();

    let mut index: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, tokens) in token_sets.iter().enumerate() {
        for token in tokens {
            index.entry(token.as_str()).or_default().push(i);
        }
    }

    let mut shared_counts: HashMap<(usize, usize), usize> = HashMap::new();
    for members in index.values() {
        for a in 0..members.len() {
            for b in (a + 1)..members.len() {
                let key = (members[a].min(members[b]), members[a].max(members[b]));
                *shared_counts.entry(key).or_insert(0) += 1;
            }
        }
    }

    let mut uf = UnionFind::new(clusters.len());
    for ((i, j), count) in shared_counts {
        if count >= 2 {
            uf.union(i, j);
        }
    }

    uf.components()
        .into_iter()
        .map(|members| members.into_iter().map(|i| clusters[i].id).collect())
        .collect()
}

fn cluster_block(cluster: &Cluster) -> String {
    let headline = cluster.headline.as_deref().unwrap_or("(no headline)");
    let facts: Vec<&str> = cluster
        .normalized_facts
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .take(FACTS_PER_CLUSTER)
        .map(String::as_str)
        .collect();

    let mut block = format!("Cluster {}: {}\n", cluster.id, headline);
    for fact in facts {
        block.push_str("- ");
        block.push_str(fact);
        block.push('\n');
    }
    block
}

/// Step 3: pack candidate groups into LLM-call batches of roughly
/// `CHAR_BUDGET_PER_CALL` characters each. A single oversized group gets
/// its own call rather than being split across two, which would hide
/// duplicates that straddle the split.
fn build_batches(groups: &[Vec<i64>], clusters_by_id: &HashMap<i64, &Cluster>) -> Vec<Vec<i64>> {
    let mut batches = Vec::new();
    let mut current: Vec<i64> = Vec::new();
    let mut current_len = 0usize;

    for group in groups {
        if group.len() < 2 {
            continue;
        }
        let group_len: usize = group
            .iter()
            .filter_map(|id| clusters_by_id.get(id))
            .map(|c| cluster_block(c).len())
            .sum();

        if !current.is_empty() && current_len + group_len > CHAR_BUDGET_PER_CALL {
            batches.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.extend(group.iter().copied());
        current_len += group_len;
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[derive(Debug, Deserialize)]
struct RawMergeGroup {
    cluster_ids: Vec<i64>,
    #[allow(dead_code)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct RawMergeResponse {
    merge_groups: Vec<RawMergeGroup>,
}

async fn propose_merge_groups(
    config: &PipelineConfig,
    batch: &[i64],
    clusters_by_id: &HashMap<i64, &Cluster>,
) -> Result<Vec<Vec<i64>>, String> {
    let user_prompt = batch
        .iter()
        .filter_map(|id| clusters_by_id.get(id))
        .map(|c| cluster_block(c))
        .collect::<Vec<_>>()
        .join("\n");

    let raw = llm::run_json_completion(
        SYSTEM_PROMPT.to_string(),
        user_prompt,
        config.normalizer_model.clone(),
        config.curation_timeout_secs,
        MAX_TOKENS,
    )
    .await
    .map_err(|e| e.to_string())?;

    let value = llm::extract_json(&raw).ok_or_else(|| "unparseable curation response".to_string())?;
    let parsed: RawMergeResponse = serde_json::from_value(value).map_err(|e| e.to_string())?;

    Ok(parsed.merge_groups.into_iter().map(|g| g.cluster_ids).collect())
}

fn pick_merge_target(clusters: &[Cluster]) -> &Cluster {
    clusters
        .iter()
        .min_by_key(|c| (std::cmp::Reverse(c.member_count), c.first_seen_at, c.id))
        .expect("non-empty cluster list")
}

/// Step 5: re-read the group fresh, require at least two still-unmerged
/// members, merge every loser into the target, and recompute the
/// target's stats once at the end.
async fn execute_merge_group(db: &PgPool, config: &PipelineConfig, cluster_ids: &[i64]) {
    let fresh = match cluster::fetch_unmerged_clusters(db, cluster_ids).await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[cluster-curate] failed to re-read merge group: {e}");
            return;
        }
    };

    if fresh.len() < 2 {
        return;
    }

    let target_id = pick_merge_target(&fresh).id;

    for cluster in &fresh {
        if cluster.id == target_id {
            continue;
        }
        if let Err(e) = cluster::merge_clusters(db, target_id, cluster.id).await {
            eprintln!("[cluster-curate] failed to merge cluster {} into {target_id}: {e}", cluster.id);
        }
    }

    if let Err(e) = cluster_stats::recompute_and_store(db, config, target_id).await {
        eprintln!("[cluster-curate] failed to recompute stats for merge target {target_id}: {e}");
    }
}

async fn run_once(ctx: &ClusterCurateContext) -> Result<(), String> {
    let clusters = cluster::fetch_active_unmerged_clusters(&ctx.pool, CURATE_LOOKBACK_HOURS, CURATE_CLUSTER_LIMIT)
        .await
        .map_err(|e| e.to_string())?;

    if clusters.len() < 2 {
        return Ok(());
    }

    let clusters_by_id: HashMap<i64, &Cluster> = clusters.iter().map(|c| (c.id, c)).collect();
    let groups = build_candidate_groups(&clusters);
    let batches = build_batches(&groups, &clusters_by_id);

    let mut merge_groups: Vec<Vec<i64>> = Vec::new();
    for batch in &batches {
        match propose_merge_groups(&ctx.config, batch, &clusters_by_id).await {
            Ok(groups) => merge_groups.extend(groups),
            Err(e) => eprintln!("[cluster-curate] curation call failed, skipping batch: {e}"),
        }
    }

    for group in &merge_groups {
        execute_merge_group(&ctx.pool, &ctx.config, group).await;
    }

    println!(
        "[cluster-curate] {} active clusters, {} candidate groups, {} merges proposed",
        clusters.len(),
        groups.len(),
        merge_groups.len()
    );

    Ok(())
}

pub async fn run_cluster_curate_worker(pool: PgPool, config: Arc<PipelineConfig>) {
    PostgresStorage::setup(&pool).await.expect("failed to set up apalis storage");

    let ctx = ClusterCurateContext { pool: pool.clone(), config };

    let storage: PostgresStorage<ClusterCurateJob> = PostgresStorage::new(pool.clone());
    let schedule = Schedule::from_str(CRON_SCHEDULE).expect("invalid cluster-curate schedule");
    let cron = CronStream::new(schedule);
    let backend = cron.pipe_to_storage(storage);

    let worker = WorkerBuilder::new("cluster-curate-worker")
        .concurrency(1)
        .data(ctx)
        .backend(backend)
        .build_fn(run_job);

    Monitor::new().register(worker).run().await.expect("cluster-curate monitor failed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_drops_stopwords_and_short_tokens() {
        let tokens = tokenize("The Fed raises rates");
        assert!(!tokens.contains("the"));
        assert!(tokens.contains("fed"));
        assert!(tokens.contains("raises"));
        assert!(tokens.contains("rates"));
    }

    #[test]
    fn tokenize_keeps_tickers_and_short_numerics() {
        let tokens = tokenize("TSLA falls 5% after Q2 report");
        assert!(tokens.contains("tsla"));
    }

    #[test]
    fn small_pool_becomes_a_single_candidate_group() {
        let clusters: Vec<Cluster> = (1..=5)
            .map(|id| test_cluster(id, "totally unrelated headline text"))
            .collect();
        let groups = build_candidate_groups(&clusters);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 5);
    }

    fn test_cluster(id: i64, headline: &str) -> Cluster {
        Cluster {
            id,
            is_active: true,
            headline: Some(headline.to_string()),
            normalized_facts: Some(vec![]),
            centroid_embedding: None,
            member_count: 3,
            is_story_candidate: true,
            first_seen_at: Utc::now(),
            last_seen_at: Some(Utc::now()),
            reviewed_at: None,
            merged_into_cluster_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_synced_at: Utc::now(),
        }
    }

    #[test]
    fn merge_target_prefers_largest_cluster_then_earliest_then_lowest_id() {
        let mut a = test_cluster(5, "a");
        a.member_count = 10;
        let mut b = test_cluster(3, "b");
        b.member_count = 10;
        b.first_seen_at = a.first_seen_at - chrono::Duration::hours(1);
        let c = test_cluster(1, "c");

        let target = pick_merge_target(&[a.clone(), b.clone(), c.clone()]);
        assert_eq!(target.id, b.id);
    }
}
