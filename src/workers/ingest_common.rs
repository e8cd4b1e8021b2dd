//! Shared post-ingest mechanics used by both the author-batch and keyword
//! ingest workers: batch upsert, child-row fan-out, and preprocess-event
//! emission for newly inserted posts.

use apalis_sql::postgres::PostgresStorage;
use sqlx::PgPool;

use crate::domain::post::{self, NewPost};
use crate::events::{self, PipelineEvent};
use crate::services::post_source::RawPost;

pub struct IngestOutcome {
    pub fetched: usize,
    pub inserted: usize,
}

/// Upsert a deduped batch of raw posts (in chunks of 50, `ignoreDuplicates`
/// semantics), fan out their child rows, and emit one `preprocess` event per
/// post that was both newly inserted and still unnormalized.
pub async fn ingest_raw_posts(
    db: &PgPool,
    events: &mut PostgresStorage<PipelineEvent>,
    raw_posts: Vec<RawPost>,
) -> IngestOutcome {
    let fetched = raw_posts.len();
    let mut inserted_total = 0usize;

    for chunk in raw_posts.chunks(50) {
        let new_posts: Vec<NewPost> = chunk.iter().map(crate::services::post_source::to_new_post).collect();

        let inserted = match post::upsert_posts_returning_new(db, &new_posts).await {
            Ok(rows) => rows,
            Err(e) => {
                eprintln!("[ingest] batch upsert failed, skipping batch: {e}");
                continue;
            }
        };

        if inserted.is_empty() {
            continue;
        }
        inserted_total += inserted.len();

        let raw_by_external_id: std::collections::HashMap<&str, &RawPost> =
            chunk.iter().map(|p| (p.id.as_str(), p)).collect();

        let mut inserted_ids = Vec::with_capacity(inserted.len());
        for row in &inserted {
            inserted_ids.push(row.id);
            events::emit_post_ingested(events, row.id).await;

            let Some(raw) = raw_by_external_id.get(row.external_id.as_str()) else {
                continue;
            };

            let urls = crate::services::post_source::to_new_urls(raw);
            let images = crate::services::post_source::to_new_images(raw);
            let videos = crate::services::post_source::to_new_videos(raw);

            if let Err(e) = post::insert_post_urls(db, row.id, &urls).await {
                eprintln!("[ingest] failed to insert post_urls for post {}: {e}", row.id);
            }
            if let Err(e) = post::insert_post_images(db, row.id, &images).await {
                eprintln!("[ingest] failed to insert post_images for post {}: {e}", row.id);
            }
            if let Err(e) = post::insert_post_videos(db, row.id, &videos).await {
                eprintln!("[ingest] failed to insert post_videos for post {}: {e}", row.id);
            }
        }

        let unnormalized = match post::fetch_unnormalized_post_ids(db, &inserted_ids).await {
            Ok(ids) => ids,
            Err(e) => {
                eprintln!("[ingest] failed to compute unnormalized subset: {e}");
                continue;
            }
        };
        for post_id in unnormalized {
            events::emit_preprocess(events, post_id, "ingest").await;
        }
    }

    IngestOutcome {
        fetched,
        inserted: inserted_total,
    }
}
