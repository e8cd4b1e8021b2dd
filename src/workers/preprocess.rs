//! Per-post preprocessing: URL enrichment, image classification, normalize,
//! embed — run in that order, each sub-step independently idempotent so a
//! retry after any sub-step boundary does not double-write.

use sqlx::PgPool;

use crate::config::PipelineConfig;
use crate::domain::post;
use crate::services::{embed, image_classify, normalize, url_fetch};

/// Runs every sub-step for one post. Each sub-step only performs its own
/// guarded write, so a concurrent retry of the same post id from a
/// redelivered event converges on the same state rather than duplicating
/// work.
pub async fn process_post(db: &PgPool, config: &PipelineConfig, post_id: i64) {
    enrich_urls_for_post(db, config, post_id).await;
    enrich_images_for_post(db, config, post_id).await;

    if let Err(e) = normalize_post(db, config, post_id).await {
        eprintln!("[preprocess] normalize failed for post {post_id}: {e}");
        return;
    }

    if let Err(e) = embed_post(db, config, post_id, false).await {
        eprintln!("[preprocess] embed failed for post {post_id}: {e}");
    }
}

async fn enrich_urls_for_post(db: &PgPool, config: &PipelineConfig, post_id: i64) {
    let pending = match post::fetch_pending_post_urls_for_post(db, post_id).await {
        Ok(rows) => rows,
        Err(e) => {
            eprintln!("[preprocess] failed to list pending urls: {e}");
            return;
        }
    };

    for row in pending {
        let fetched = url_fetch::fetch_and_extract(config, &row.url).await;
        if let Err(e) = post::set_url_content(db, row.id, &fetched.content, Some(&fetched.raw_html)).await {
            eprintln!("[preprocess] failed to store url content for post_url {}: {e}", row.id);
        }
    }
}

async fn enrich_images_for_post(db: &PgPool, config: &PipelineConfig, post_id: i64) {
    let pending = match post::fetch_pending_post_images_for_post(db, post_id).await {
        Ok(rows) => rows,
        Err(e) => {
            eprintln!("[preprocess] failed to list pending images: {e}");
            return;
        }
    };

    let Some(post_row) = post::fetch_post_for_normalize(db, post_id).await.ok().flatten() else {
        return;
    };

    for row in pending {
        let classification = image_classify::classify_image(&row.image_url, &config.normalizer_model, config.normalizer_timeout_secs).await;

        let summary = if classification.warrants_financial_analysis {
            image_classify::summarize_image(&row.image_url, &post_row.raw_text, &config.normalizer_model, config.normalizer_timeout_secs)
                .await
                .unwrap_or_default()
        } else {
            String::new()
        };

        if let Err(e) = post::set_image_classification(
            db,
            row.id,
            classification.category.as_str(),
            classification.warrants_financial_analysis,
            &summary,
        )
        .await
        {
            eprintln!("[preprocess] failed to store classification for post_image {}: {e}", row.id);
        }
    }
}

async fn normalize_post(db: &PgPool, config: &PipelineConfig, post_id: i64) -> Result<(), String> {
    let Some(post_row) = post::fetch_post_for_normalize(db, post_id).await.map_err(|e| e.to_string())? else {
        return Ok(());
    };

    let url_contexts = post::fetch_url_contexts_for_normalize(db, post_id).await.map_err(|e| e.to_string())?;
    let image_summaries = post::fetch_image_summaries(db, post_id).await.map_err(|e| e.to_string())?;

    let input = normalize::NormalizeInput {
        raw_text: &post_row.raw_text,
        quoted_text: post_row.quoted_text.as_deref(),
        url_contexts: &url_contexts,
        image_summaries: &image_summaries,
    };

    if normalize::should_skip(&input) {
        println!("[preprocess] skipping normalize for post {post_id}: no_text_to_embed");
        return Ok(());
    }

    let output = normalize::normalize(&input, &config.normalizer_model, config.normalizer_timeout_secs)
        .await
        .map_err(|e| e.to_string())?;

    post::set_normalized(db, post_id, &output.headline, &output.facts, false)
        .await
        .map_err(|e| e.to_string())?;

    Ok(())
}

/// Embeds a post's normalized headline. Skipped when an embedding already
/// exists unless `force` (backfill) is set.
pub async fn embed_post(db: &PgPool, config: &PipelineConfig, post_id: i64, force: bool) -> Result<(), String> {
    let Some(row) = sqlx::query_as::<_, (Option<String>,)>("SELECT normalized_headline FROM posts WHERE id = $1")
        .bind(post_id)
        .fetch_optional(db)
        .await
        .map_err(|e| e.to_string())?
    else {
        return Ok(());
    };

    let Some(headline) = row.0 else {
        return Ok(());
    };

    if !force {
        let already_embedded: Option<(bool,)> =
            sqlx::query_as("SELECT normalized_headline_embedding IS NOT NULL FROM posts WHERE id = $1")
                .bind(post_id)
                .fetch_optional(db)
                .await
                .map_err(|e| e.to_string())?;
        if already_embedded.map(|(has,)| has).unwrap_or(false) {
            return Ok(());
        }
    }

    let vector = embed::embed_headline(config, &headline).await.map_err(|e| e.to_string())?;
    post::set_embedding(db, post_id, &vector, force).await.map_err(|e| e.to_string())?;
    Ok(())
}
