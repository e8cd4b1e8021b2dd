//! Author-batch ingest: polls a curated list of handles in fixed-size
//! batches every 15 minutes.

use apalis::prelude::*;
use apalis_cron::{CronStream, Schedule};
use apalis_sql::postgres::PostgresStorage;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::events::PipelineEvent;
use crate::services::db;
use crate::services::post_source::{self, PostSourceClient};

const FUNCTION_ID: &str = "ingest_accounts";
const CRON_SCHEDULE: &str = "0 */15 * * * *";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestAccountsJob {
    pub scheduled_at: chrono::DateTime<chrono::Utc>,
}

impl From<chrono::DateTime<chrono::Utc>> for IngestAccountsJob {
    fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
        IngestAccountsJob { scheduled_at: dt }
    }
}

#[derive(Clone)]
pub struct IngestAccountsContext {
    pub pool: PgPool,
    pub config: Arc<PipelineConfig>,
    pub post_source: PostSourceClient,
    pub events: PostgresStorage<PipelineEvent>,
}

async fn run_job(_job: IngestAccountsJob, ctx: Data<IngestAccountsContext>) -> Result<(), Error> {
    let outcome = db::with_run_tracking(&ctx.pool, FUNCTION_ID, run_once(&ctx)).await;
    if let Err(e) = outcome {
        eprintln!("[ingest-accounts] run failed: {e}");
    }
    Ok(())
}

async fn run_once(ctx: &IngestAccountsContext) -> Result<(), String> {
    let handles = &ctx.config.author_handles;
    if handles.is_empty() {
        return Ok(());
    }

    let mut all_raw = Vec::new();
    let mut events = ctx.events.clone();

    for batch in handles.chunks(ctx.config.author_batch_size) {
        let filtered: Vec<String> = batch
            .iter()
            .filter(|h| !ctx.config.blocked_accounts.contains(&h.to_lowercase()))
            .cloned()
            .collect();
        if filtered.is_empty() {
            continue;
        }

        let query = post_source::build_author_batch_query(&filtered);
        match ctx.post_source.search(&query, None).await {
            Ok(page) => all_raw.extend(page.posts),
            Err(e) => {
                eprintln!("[ingest-accounts] batch failed, continuing run: {e}");
            }
        }

        tokio::time::sleep(std::time::Duration::from_secs_f64(ctx.config.author_batch_delay_secs)).await;
    }

    let deduped = post_source::dedupe_by_external_id(all_raw);
    let outcome = super::ingest_common::ingest_raw_posts(&ctx.pool, &mut events, deduped).await;
    println!(
        "[ingest-accounts] fetched {} posts, inserted {}",
        outcome.fetched, outcome.inserted
    );
    Ok(())
}

pub async fn run_ingest_accounts_worker(
    pool: PgPool,
    config: Arc<PipelineConfig>,
    post_source: PostSourceClient,
    events: PostgresStorage<PipelineEvent>,
) {
    PostgresStorage::setup(&pool).await.expect("failed to set up apalis storage");

    let ctx = IngestAccountsContext {
        pool: pool.clone(),
        config,
        post_source,
        events,
    };

    let storage: PostgresStorage<IngestAccountsJob> = PostgresStorage::new(pool.clone());
    let schedule = Schedule::from_str(CRON_SCHEDULE).expect("invalid ingest-accounts schedule");
    let cron = CronStream::new(schedule);
    let backend = cron.pipe_to_storage(storage);

    let worker = WorkerBuilder::new("ingest-accounts-worker")
        .data(ctx)
        .backend(backend)
        .build_fn(run_job);

    Monitor::new().register(worker).run().await.expect("ingest-accounts monitor failed");
}
