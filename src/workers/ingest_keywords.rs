//! Keyword-search ingest: runs a fixed multi-keyword query hourly, paginated
//! by a fixed page count.

use apalis::prelude::*;
use apalis_cron::{CronStream, Schedule};
use apalis_sql::postgres::PostgresStorage;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::events::PipelineEvent;
use crate::services::db::{self};
use crate::services::post_source::{self, PostSourceClient};

const FUNCTION_ID: &str = "ingest_keywords";
const CRON_SCHEDULE: &str = "0 0 * * * *";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestKeywordsJob {
    pub scheduled_at: chrono::DateTime<chrono::Utc>,
}

impl From<chrono::DateTime<chrono::Utc>> for IngestKeywordsJob {
    fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
        IngestKeywordsJob { scheduled_at: dt }
    }
}

#[derive(Clone)]
pub struct IngestKeywordsContext {
    pub pool: PgPool,
    pub config: Arc<PipelineConfig>,
    pub post_source: PostSourceClient,
    pub events: PostgresStorage<PipelineEvent>,
}

async fn run_job(_job: IngestKeywordsJob, ctx: Data<IngestKeywordsContext>) -> Result<(), Error> {
    if let Err(e) = db::with_run_tracking(&ctx.pool, FUNCTION_ID, run_once(&ctx)).await {
        eprintln!("[ingest-keywords] run failed: {e}");
    }
    Ok(())
}

async fn run_once(ctx: &IngestKeywordsContext) -> Result<(), String> {
    if ctx.config.keyword_query.trim().is_empty() {
        return Ok(());
    }

    let mut all_raw = Vec::new();
    let mut cursor: Option<String> = None;
    let mut events = ctx.events.clone();

    for _ in 0..ctx.config.keyword_page_count {
        match ctx.post_source.search(&ctx.config.keyword_query, cursor.as_deref()).await {
            Ok(page) => {
                let exhausted = page.next_cursor.is_none();
                all_raw.extend(page.posts);
                cursor = page.next_cursor;
                if exhausted {
                    break;
                }
            }
            Err(e) => {
                eprintln!("[ingest-keywords] page failed, stopping pagination: {e}");
                break;
            }
        }
    }

    let deduped = post_source::dedupe_by_external_id(all_raw);
    let outcome = super::ingest_common::ingest_raw_posts(&ctx.pool, &mut events, deduped).await;
    println!(
        "[ingest-keywords] fetched {} posts, inserted {}",
        outcome.fetched, outcome.inserted
    );
    Ok(())
}

pub async fn run_ingest_keywords_worker(
    pool: PgPool,
    config: Arc<PipelineConfig>,
    post_source: PostSourceClient,
    events: PostgresStorage<PipelineEvent>,
) {
    PostgresStorage::setup(&pool).await.expect("failed to set up apalis storage");

    let ctx = IngestKeywordsContext {
        pool: pool.clone(),
        config,
        post_source,
        events,
    };

    let storage: PostgresStorage<IngestKeywordsJob> = PostgresStorage::new(pool.clone());
    let schedule = Schedule::from_str(CRON_SCHEDULE).expect("invalid ingest-keywords schedule");
    let cron = CronStream::new(schedule);
    let backend = cron.pipe_to_storage(storage);

    let worker = WorkerBuilder::new("ingest-keywords-worker")
        .data(ctx)
        .backend(backend)
        .build_fn(run_job);

    Monitor::new().register(worker).run().await.expect("ingest-keywords monitor failed");
}
