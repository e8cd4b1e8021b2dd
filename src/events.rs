//! The event bus used for hand-off between pipeline stages. Events carry no
//! shared state of their own — the post store is the single source of
//! truth — they only tell a worker what to look at next. Backed by the same
//! apalis Postgres storage used for cron jobs, so delivery is at-least-once
//! and durable across restarts.

use apalis_sql::postgres::PostgresStorage;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// Emitted per newly inserted post by an ingest worker.
    PostIngested { post_id: i64 },
    /// Emitted once a post is known to need its enrich/normalize/embed
    /// sub-steps run; carries a reason string purely for observability.
    PostPreprocess { post_id: i64, reason: String },
    /// Emitted by cluster-sync for a new or meaningfully-grown cluster.
    ClusterReviewRequested { cluster_id: i64 },
    /// Human-triggered: re-emit preprocess for posts missing an embedding.
    ClusterBackfillRequested {
        limit: Option<i64>,
        lookback_hours: Option<i64>,
        all_posts: bool,
    },
}

pub async fn setup(pool: &PgPool) -> Result<PostgresStorage<PipelineEvent>, sqlx::Error> {
    PostgresStorage::setup(pool).await?;
    Ok(PostgresStorage::new(pool.clone()))
}

pub async fn emit_post_ingested(storage: &mut PostgresStorage<PipelineEvent>, post_id: i64) {
    use apalis::prelude::Storage;
    if let Err(e) = storage.push(PipelineEvent::PostIngested { post_id }).await {
        eprintln!("[events] failed to emit post.ingested for post {post_id}: {e}");
    }
}

pub async fn emit_preprocess(storage: &mut PostgresStorage<PipelineEvent>, post_id: i64, reason: &str) {
    use apalis::prelude::Storage;
    if let Err(e) = storage
        .push(PipelineEvent::PostPreprocess {
            post_id,
            reason: reason.to_string(),
        })
        .await
    {
        eprintln!("[events] failed to emit post.preprocess for post {post_id}: {e}");
    }
}

pub async fn emit_cluster_review_requested(storage: &mut PostgresStorage<PipelineEvent>, cluster_id: i64) {
    use apalis::prelude::Storage;
    if let Err(e) = storage
        .push(PipelineEvent::ClusterReviewRequested { cluster_id })
        .await
    {
        eprintln!("[events] failed to emit cluster.review.requested for cluster {cluster_id}: {e}");
    }
}

pub async fn emit_cluster_backfill_requested(
    storage: &mut PostgresStorage<PipelineEvent>,
    limit: Option<i64>,
    lookback_hours: Option<i64>,
    all_posts: bool,
) -> Result<(), String> {
    use apalis::prelude::Storage;
    storage
        .push(PipelineEvent::ClusterBackfillRequested {
            limit,
            lookback_hours,
            all_posts,
        })
        .await
        .map_err(|e| e.to_string())?;
    Ok(())
}
