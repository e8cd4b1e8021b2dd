//! Cluster-sync: the core clustering algorithm. Builds a similarity graph
//! over recently embedded posts via union-find, matches the resulting
//! components against existing persistent clusters by plurality vote plus
//! Jaccard overlap, applies updates/creates, recomputes stats, retires
//! stale clusters, and emits review events for clusters that changed
//! enough to warrant a look.
//!
//! Runs single-concurrency by cron: two overlapping syncs over the same
//! window would race on membership assignment. Do not lift this into
//! application-level locks — rely on single-concurrency scheduling plus
//! reading fresh cluster state before each mutating write.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use apalis::prelude::*;
use apalis_cron::{CronStream, Schedule};
use apalis_sql::postgres::PostgresStorage;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::config::PipelineConfig;
use crate::domain::cluster::{self, MemberEmbedding};
use crate::events::{self, PipelineEvent};
use crate::services::cluster_stats;
use crate::services::db;
use crate::services::union_find::UnionFind;
use crate::services::vector;

const FUNCTION_ID: &str = "cluster_sync";
const CRON_SCHEDULE: &str = "0 */10 * * * *";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSyncJob {
    pub scheduled_at: DateTime<Utc>,
}

impl From<DateTime<Utc>> for ClusterSyncJob {
    fn from(dt: DateTime<Utc>) -> Self {
        ClusterSyncJob { scheduled_at: dt }
    }
}

#[derive(Clone)]
pub struct ClusterSyncContext {
    pub pool: PgPool,
    pub config: Arc<PipelineConfig>,
    pub events: PostgresStorage<PipelineEvent>,
}

async fn run_job(_job: ClusterSyncJob, ctx: Data<ClusterSyncContext>) -> Result<(), Error> {
    if let Err(e) = db::with_run_tracking(&ctx.pool, FUNCTION_ID, run_once(&ctx)).await {
        eprintln!("[cluster-sync] run failed: {e}");
    }
    Ok(())
}

/// Step A: connected components of the candidate pool under the
/// similarity-threshold edge rule. Pairwise cosine comparison over the
/// whole pool — favored over a recursive CTE per the union-find-over-
/// recursive-SQL design note.
/// Public so the cluster-stability-eval operator harness can run the same
/// graph-building step at alternate thresholds without duplicating it.
pub fn build_components(candidates: &[MemberEmbedding], similarity_threshold: f64) -> Vec<Vec<usize>> {
    let mut uf = UnionFind::new(candidates.len());
    for i in 0..candidates.len() {
        for j in (i + 1)..candidates.len() {
            let sim = vector::cosine_similarity(
                &candidates[i].normalized_headline_embedding,
                &candidates[j].normalized_headline_embedding,
            );
            if sim >= similarity_threshold {
                uf.union(i, j);
            }
        }
    }
    uf.components()
}

fn span_in_days(members: &[&MemberEmbedding]) -> i64 {
    let min = members.iter().map(|m| m.created_at).min().expect("non-empty component");
    let max = members.iter().map(|m| m.created_at).max().expect("non-empty component");
    (max - min).num_days()
}

/// Of the component's posts that are already members of a persistent
/// cluster, which cluster owns the most? `None` if nobody in the
/// component is assigned yet.
fn plurality_cluster(members: &[&MemberEmbedding]) -> Option<i64> {
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for m in members {
        if let Some(cid) = m.cluster_id {
            *counts.entry(cid).or_insert(0) += 1;
        }
    }
    counts.into_iter().max_by_key(|(_, count)| *count).map(|(cid, _)| cid)
}

enum Decision {
    Update { cluster_id: i64 },
    Create,
}

fn decide(
    member_rows: &[&MemberEmbedding],
    component_post_ids: &HashSet<i64>,
    candidates: &[MemberEmbedding],
    config: &PipelineConfig,
) -> Decision {
    let Some(best_cluster_id) = plurality_cluster(member_rows) else {
        return Decision::Create;
    };

    let window_members: HashSet<i64> = candidates
        .iter()
        .filter(|c| c.cluster_id == Some(best_cluster_id))
        .map(|c| c.post_id)
        .collect();

    let intersection = component_post_ids.intersection(&window_members).count();
    let union = component_post_ids.union(&window_members).count();
    let jaccard = if union == 0 { 0.0 } else { intersection as f64 / union as f64 };

    if jaccard >= config.match_jaccard_threshold && intersection >= config.min_intersection {
        Decision::Update { cluster_id: best_cluster_id }
    } else {
        Decision::Create
    }
}

/// Step C, create branch: assign every component post not already owned
/// by another cluster. Returns `None` if every component post turns out
/// to already belong elsewhere, in which case there is nothing to create.
async fn create_cluster_for_component(
    db: &PgPool,
    member_rows: &[&MemberEmbedding],
    component_post_ids: &HashSet<i64>,
    by_post_id: &HashMap<i64, &MemberEmbedding>,
) -> Result<Option<i64>, sqlx::Error> {
    let assignable: Vec<i64> = component_post_ids
        .iter()
        .filter(|id| by_post_id.get(id).map(|c| c.cluster_id.is_none()).unwrap_or(false))
        .copied()
        .collect();

    if assignable.is_empty() {
        return Ok(None);
    }

    let embeddings: Vec<Vector> = assignable
        .iter()
        .filter_map(|id| by_post_id.get(id).map(|c| c.normalized_headline_embedding.clone()))
        .collect();
    let centroid = vector::mean(&embeddings).unwrap_or_else(|| member_rows[0].normalized_headline_embedding.clone());

    let first_seen_at = member_rows.iter().map(|m| m.created_at).min().expect("non-empty component");
    let last_seen_at = member_rows.iter().map(|m| m.created_at).max().expect("non-empty component");

    let cluster_id =
        cluster::create_cluster_with_members(db, &assignable, &centroid, first_seen_at, last_seen_at).await?;
    Ok(Some(cluster_id))
}

/// Step C, update branch: drop window members that fell out of the
/// component, add component members that were unassigned, leave
/// members of other clusters untouched. Returns the count of newly
/// added members for the review-event threshold check.
async fn apply_update(
    db: &PgPool,
    cluster_id: i64,
    component_post_ids: &HashSet<i64>,
    candidates: &[MemberEmbedding],
    by_post_id: &HashMap<i64, &MemberEmbedding>,
) -> Result<usize, sqlx::Error> {
    let window_member_ids: HashSet<i64> = candidates
        .iter()
        .filter(|c| c.cluster_id == Some(cluster_id))
        .map(|c| c.post_id)
        .collect();

    let to_remove: Vec<i64> = window_member_ids.difference(component_post_ids).copied().collect();

    let to_add: Vec<i64> = component_post_ids
        .iter()
        .filter(|id| by_post_id.get(id).map(|c| c.cluster_id.is_none()).unwrap_or(false))
        .copied()
        .collect();

    let final_member_ids: Vec<i64> = component_post_ids
        .iter()
        .copied()
        .filter(|id| {
            by_post_id
                .get(id)
                .map(|c| c.cluster_id.is_none() || c.cluster_id == Some(cluster_id))
                .unwrap_or(false)
        })
        .collect();

    let embeddings: Vec<Vector> = final_member_ids
        .iter()
        .filter_map(|id| by_post_id.get(id).map(|c| c.normalized_headline_embedding.clone()))
        .collect();
    let centroid = match vector::mean(&embeddings) {
        Some(v) => v,
        None => return Ok(0),
    };

    let last_seen_at = final_member_ids
        .iter()
        .filter_map(|id| by_post_id.get(id).map(|c| c.created_at))
        .max()
        .unwrap_or_else(Utc::now);

    cluster::apply_component_update(
        db,
        cluster_id,
        &to_remove,
        &to_add,
        &centroid,
        final_member_ids.len() as i32,
        last_seen_at,
    )
    .await?;

    Ok(to_add.len())
}

async fn run_once(ctx: &ClusterSyncContext) -> Result<(), String> {
    let candidates = cluster::fetch_sync_candidates(&ctx.pool, ctx.config.sync_lookback_hours)
        .await
        .map_err(|e| e.to_string())?;

    if candidates.is_empty() {
        return Ok(());
    }

    let by_post_id: HashMap<i64, &MemberEmbedding> = candidates.iter().map(|c| (c.post_id, c)).collect();
    let components = build_components(&candidates, ctx.config.similarity_threshold);

    let mut touched: HashSet<i64> = HashSet::new();
    let mut new_cluster_ids: HashSet<i64> = HashSet::new();
    let mut grown_by: HashMap<i64, usize> = HashMap::new();

    for component in components {
        if component.len() < ctx.config.min_cluster_size {
            continue;
        }

        let member_rows: Vec<&MemberEmbedding> = component.iter().map(|&i| &candidates[i]).collect();

        if span_in_days(&member_rows) > ctx.config.max_days_window {
            continue;
        }

        let component_post_ids: HashSet<i64> = member_rows.iter().map(|m| m.post_id).collect();

        match decide(&member_rows, &component_post_ids, &candidates, &ctx.config) {
            Decision::Update { cluster_id } => {
                match apply_update(&ctx.pool, cluster_id, &component_post_ids, &candidates, &by_post_id).await {
                    Ok(added) => {
                        touched.insert(cluster_id);
                        *grown_by.entry(cluster_id).or_insert(0) += added;
                    }
                    Err(e) => eprintln!("[cluster-sync] failed to update cluster {cluster_id}: {e}"),
                }
            }
            Decision::Create => {
                match create_cluster_for_component(&ctx.pool, &member_rows, &component_post_ids, &by_post_id).await {
                    Ok(Some(cluster_id)) => {
                        touched.insert(cluster_id);
                        new_cluster_ids.insert(cluster_id);
                    }
                    Ok(None) => {}
                    Err(e) => eprintln!("[cluster-sync] failed to create cluster: {e}"),
                }
            }
        }
    }

    for cluster_id in &touched {
        if let Err(e) = cluster_stats::recompute_and_store(&ctx.pool, &ctx.config, *cluster_id).await {
            eprintln!("[cluster-sync] failed to recompute stats for cluster {cluster_id}: {e}");
        }
    }

    let mut events = ctx.events.clone();
    for cluster_id in &new_cluster_ids {
        events::emit_cluster_review_requested(&mut events, *cluster_id).await;
    }
    for (cluster_id, added) in &grown_by {
        if *added >= ctx.config.review_min_new_members {
            events::emit_cluster_review_requested(&mut events, *cluster_id).await;
        }
    }

    let stale = cluster::fetch_stale_cluster_ids(&ctx.pool, ctx.config.stale_deactivate_hours)
        .await
        .map_err(|e| e.to_string())?;
    for cluster_id in stale {
        if !touched.contains(&cluster_id) {
            if let Err(e) = cluster::deactivate_cluster(&ctx.pool, cluster_id).await {
                eprintln!("[cluster-sync] failed to deactivate stale cluster {cluster_id}: {e}");
            }
        }
    }

    println!(
        "[cluster-sync] {} candidates, {} clusters touched ({} new)",
        candidates.len(),
        touched.len(),
        new_cluster_ids.len()
    );

    Ok(())
}

pub async fn run_cluster_sync_worker(
    pool: PgPool,
    config: Arc<PipelineConfig>,
    events: PostgresStorage<PipelineEvent>,
) {
    PostgresStorage::setup(&pool).await.expect("failed to set up apalis storage");

    let ctx = ClusterSyncContext { pool: pool.clone(), config, events };

    let storage: PostgresStorage<ClusterSyncJob> = PostgresStorage::new(pool.clone());
    let schedule = Schedule::from_str(CRON_SCHEDULE).expect("invalid cluster-sync schedule");
    let cron = CronStream::new(schedule);
    let backend = cron.pipe_to_storage(storage);

    let worker = WorkerBuilder::new("cluster-sync-worker")
        .concurrency(1)
        .data(ctx)
        .backend(backend)
        .build_fn(run_job);

    Monitor::new().register(worker).run().await.expect("cluster-sync monitor failed");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(post_id: i64, cluster_id: Option<i64>) -> MemberEmbedding {
        MemberEmbedding {
            post_id,
            cluster_id,
            normalized_headline_embedding: Vector::from(vec![1.0, 0.0]),
            author_handle: "alice".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn plurality_cluster_picks_the_majority_assignment() {
        let a = member(1, Some(10));
        let b = member(2, Some(10));
        let c = member(3, Some(20));
        let rows = vec![&a, &b, &c];
        assert_eq!(plurality_cluster(&rows), Some(10));
    }

    #[test]
    fn plurality_cluster_is_none_when_nobody_is_assigned() {
        let a = member(1, None);
        let b = member(2, None);
        let rows = vec![&a, &b];
        assert_eq!(plurality_cluster(&rows), None);
    }

    #[test]
    fn jaccard_below_threshold_falls_back_to_create() {
        let config = crate::config::test_support::test_config();
        let a = member(1, Some(10));
        let b = member(2, None);
        let candidates = vec![a.clone(), b.clone(), member(3, Some(10)), member(4, Some(10)), member(5, Some(10))];
        let component_post_ids: HashSet<i64> = [1, 2].into_iter().collect();
        let member_rows = vec![&candidates[0], &candidates[1]];
        // component of size 2 against a window where cluster 10 owns 3 other
        // posts: intersection 1, union 4 -> jaccard 0.25, meets the threshold
        // but intersection size 1 < min_intersection 2, so this must create.
        match decide(&member_rows, &component_post_ids, &candidates, &config) {
            Decision::Create => {}
            _ => panic!("expected a create decision when intersection is too small"),
        }
    }
}
