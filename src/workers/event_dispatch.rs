//! Single worker consuming the shared pipeline event queue and routing each
//! event to its handler. One apalis worker rather than one per event
//! variant because apalis concurrency is per-worker/per-queue, not
//! per-variant — routing here and gating with our own semaphores lets
//! preprocess and cluster-review run at their own documented concurrency
//! caps while sharing one backend.

use std::sync::Arc;

use apalis::prelude::*;
use apalis_sql::postgres::PostgresStorage;
use sqlx::PgPool;
use tokio::sync::Semaphore;

use crate::config::PipelineConfig;
use crate::domain::post;
use crate::events::PipelineEvent;
use crate::workers::{cluster_review, preprocess};

const DISPATCH_CONCURRENCY: usize = 16;
const DEFAULT_BACKFILL_LIMIT: i64 = 500;
const DEFAULT_BACKFILL_LOOKBACK_HOURS: i64 = 24;
const ALL_POSTS_LOOKBACK_HOURS: i64 = 24 * 365 * 10;

#[derive(Clone)]
pub struct EventDispatchContext {
    pub pool: PgPool,
    pub config: Arc<PipelineConfig>,
    pub preprocess_limit: Arc<Semaphore>,
    pub cluster_review_limit: Arc<Semaphore>,
    pub backfill_limit: Arc<Semaphore>,
}

impl EventDispatchContext {
    pub fn new(pool: PgPool, config: Arc<PipelineConfig>) -> Self {
        let preprocess_limit = Arc::new(Semaphore::new(config.embed_concurrency));
        let cluster_review_limit = Arc::new(Semaphore::new(config.cluster_review_concurrency));
        let backfill_limit = Arc::new(Semaphore::new(config.cluster_backfill_concurrency));
        EventDispatchContext {
            pool,
            config,
            preprocess_limit,
            cluster_review_limit,
            backfill_limit,
        }
    }
}

async fn handle_backfill(
    ctx: &EventDispatchContext,
    limit: Option<i64>,
    lookback_hours: Option<i64>,
    all_posts: bool,
) {
    let lookback = if all_posts {
        ALL_POSTS_LOOKBACK_HOURS
    } else {
        lookback_hours.unwrap_or(DEFAULT_BACKFILL_LOOKBACK_HOURS)
    };
    let limit = limit.unwrap_or(DEFAULT_BACKFILL_LIMIT);

    let post_ids = match post::fetch_posts_missing_embedding(&ctx.pool, lookback, limit).await {
        Ok(ids) => ids,
        Err(e) => {
            eprintln!("[event-dispatch] failed to list posts missing embeddings: {e}");
            return;
        }
    };

    for post_id in post_ids {
        let _permit = ctx.preprocess_limit.acquire().await.expect("semaphore never closes");
        if let Err(e) = preprocess::embed_post(&ctx.pool, &ctx.config, post_id, true).await {
            eprintln!("[event-dispatch] backfill embed failed for post {post_id}: {e}");
        }
    }
}

async fn run_job(event: PipelineEvent, ctx: Data<EventDispatchContext>) -> Result<(), Error> {
    match event {
        PipelineEvent::PostIngested { post_id } => {
            // Ingest workers emit PostPreprocess once a post is ready;
            // PostIngested itself carries no work for this dispatcher.
            let _ = post_id;
        }
        PipelineEvent::PostPreprocess { post_id, reason: _ } => {
            let _permit = ctx.preprocess_limit.acquire().await.expect("semaphore never closes");
            preprocess::process_post(&ctx.pool, &ctx.config, post_id).await;
        }
        PipelineEvent::ClusterReviewRequested { cluster_id } => {
            let _permit = ctx.cluster_review_limit.acquire().await.expect("semaphore never closes");
            cluster_review::review_cluster(&ctx.pool, &ctx.config, cluster_id).await;
        }
        PipelineEvent::ClusterBackfillRequested {
            limit,
            lookback_hours,
            all_posts,
        } => {
            let _permit = ctx.backfill_limit.acquire().await.expect("semaphore never closes");
            handle_backfill(&ctx, limit, lookback_hours, all_posts).await;
        }
    }
    Ok(())
}

pub async fn run_event_dispatch_worker(pool: PgPool, config: Arc<PipelineConfig>) {
    PostgresStorage::<PipelineEvent>::setup(&pool).await.expect("failed to set up apalis event storage");

    let ctx = EventDispatchContext::new(pool.clone(), config);
    let backend: PostgresStorage<PipelineEvent> = PostgresStorage::new(pool);

    let worker = WorkerBuilder::new("event-dispatch-worker")
        .concurrency(DISPATCH_CONCURRENCY)
        .data(ctx)
        .backend(backend)
        .build_fn(run_job);

    Monitor::new().register(worker).run().await.expect("event dispatch monitor failed");
}
