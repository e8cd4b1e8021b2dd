//! Post domain — rows ingested from the post source, plus their linked URLs,
//! images, and video variants. Mirrors the teacher's `domain/twitter`
//! module shape (models + queries colocated per entity) but for the
//! read-side ingest pipeline instead of the write-side tweet drafting flow.

use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::{Executor, Postgres};

/// A single ingested social post. Mutated exactly three times after
/// creation: URL content attached, normalized, embedded.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub external_id: String,
    pub canonical_tweet_id: String,
    pub is_latest_version: bool,
    pub author_handle: String,
    pub created_at: DateTime<Utc>,
    pub raw_text: String,
    pub quoted_text: Option<String>,
    pub impressions: i64,
    pub likes: i64,
    pub retweets: i64,
    pub quotes: i64,
    pub bookmarks: i64,
    pub replies: i64,
    pub is_retweet: bool,
    pub is_reply: bool,
    pub is_quote: bool,
    pub normalized_headline: Option<String>,
    pub normalized_facts: Option<Vec<String>>,
    pub normalized_headline_embedding: Option<Vector>,
}

/// New-post payload built by an ingest worker before upsert.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub external_id: String,
    pub canonical_tweet_id: String,
    pub author_handle: String,
    pub created_at: DateTime<Utc>,
    pub raw_text: String,
    pub quoted_text: Option<String>,
    pub impressions: i64,
    pub likes: i64,
    pub retweets: i64,
    pub quotes: i64,
    pub bookmarks: i64,
    pub replies: i64,
    pub is_retweet: bool,
    pub is_reply: bool,
    pub is_quote: bool,
}

#[derive(Debug, Clone)]
pub struct NewPostUrl {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct NewPostImage {
    pub image_url: String,
}

#[derive(Debug, Clone)]
pub struct NewPostVideo {
    pub resolution_bucket: String,
    pub media_url: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PostUrl {
    pub id: i64,
    pub post_id: i64,
    pub url: String,
    pub content: Option<String>,
    pub raw_html: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PostImage {
    pub id: i64,
    pub post_id: i64,
    pub image_url: String,
    pub image_category: Option<String>,
    pub warrants_financial_analysis: bool,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PostVideo {
    pub id: i64,
    pub post_id: i64,
    pub resolution_bucket: String,
    pub media_url: String,
}

/// One row actually inserted by a batch upsert, paired with the external id
/// it came from so callers can fan out child rows without guessing at
/// positional correspondence.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InsertedPost {
    pub id: i64,
    pub external_id: String,
}

/// Upsert a batch of posts, `ignoreDuplicates`-style: on conflict with the
/// unique external_id, do nothing. The caller determines which posts were
/// actually newly inserted from the returned rows — this is what drives
/// `post.ingested` emission without a follow-up select (see design note on
/// the insert/select race in the system design doc).
pub async fn upsert_posts_returning_new<'e, E>(
    executor: E,
    posts: &[NewPost],
) -> Result<Vec<InsertedPost>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    if posts.is_empty() {
        return Ok(Vec::new());
    }

    let external_ids: Vec<String> = posts.iter().map(|p| p.external_id.clone()).collect();
    let canonical_ids: Vec<String> = posts.iter().map(|p| p.canonical_tweet_id.clone()).collect();
    let author_handles: Vec<String> = posts.iter().map(|p| p.author_handle.clone()).collect();
    let created_ats: Vec<DateTime<Utc>> = posts.iter().map(|p| p.created_at).collect();
    let raw_texts: Vec<String> = posts.iter().map(|p| p.raw_text.clone()).collect();
    let quoted_texts: Vec<Option<String>> = posts.iter().map(|p| p.quoted_text.clone()).collect();
    let impressions: Vec<i64> = posts.iter().map(|p| p.impressions).collect();
    let likes: Vec<i64> = posts.iter().map(|p| p.likes).collect();
    let retweets: Vec<i64> = posts.iter().map(|p| p.retweets).collect();
    let quotes: Vec<i64> = posts.iter().map(|p| p.quotes).collect();
    let bookmarks: Vec<i64> = posts.iter().map(|p| p.bookmarks).collect();
    let reply_counts: Vec<i64> = posts.iter().map(|p| p.replies).collect();
    let is_retweets: Vec<bool> = posts.iter().map(|p| p.is_retweet).collect();
    let is_replies: Vec<bool> = posts.iter().map(|p| p.is_reply).collect();
    let is_quotes: Vec<bool> = posts.iter().map(|p| p.is_quote).collect();

    sqlx::query_as::<_, InsertedPost>(
        r#"
        INSERT INTO posts (
            external_id, canonical_tweet_id, is_latest_version, author_handle,
            created_at, raw_text, quoted_text,
            impressions, likes, retweets, quotes, bookmarks, replies,
            is_retweet, is_reply, is_quote
        )
        SELECT * FROM UNNEST(
            $1::text[], $2::text[], $3::bool[], $4::text[],
            $5::timestamptz[], $6::text[], $7::text[],
            $8::bigint[], $9::bigint[], $10::bigint[], $11::bigint[], $12::bigint[], $13::bigint[],
            $14::bool[], $15::bool[], $16::bool[]
        )
        ON CONFLICT (external_id) DO NOTHING
        RETURNING id, external_id
        "#,
    )
    .bind(&external_ids)
    .bind(&canonical_ids)
    .bind(vec![true; posts.len()])
    .bind(&author_handles)
    .bind(&created_ats)
    .bind(&raw_texts)
    .bind(&quoted_texts)
    .bind(&impressions)
    .bind(&likes)
    .bind(&retweets)
    .bind(&quotes)
    .bind(&bookmarks)
    .bind(&reply_counts)
    .bind(&is_retweets)
    .bind(&is_replies)
    .bind(&is_quotes)
    .fetch_all(executor)
    .await
}

/// Hosts whose URLs are never stored as post-urls: self-links, the
/// short-link domain, and well-known video hosts.
pub fn is_skipped_url_host(host: &str) -> bool {
    const SKIPPED: &[&str] = &[
        "x.com",
        "twitter.com",
        "t.co",
        "youtube.com",
        "youtu.be",
        "vimeo.com",
    ];
    let host = host.trim_start_matches("www.");
    SKIPPED.iter().any(|s| host == *s || host.ends_with(&format!(".{s}")))
}

/// Filters out self/video-host links, then inserts the rest. Takes a pool
/// directly (rather than a generic `Executor`) since `&PgPool` is `Copy`-ish
/// by reference and lets us issue one statement per URL in a loop.
pub async fn insert_post_urls(
    db: &sqlx::PgPool,
    post_id: i64,
    urls: &[NewPostUrl],
) -> Result<(), sqlx::Error> {
    for u in urls {
        let Ok(parsed) = url::Url::parse(&u.url) else {
            continue;
        };
        let Some(host) = parsed.host_str() else {
            continue;
        };
        if is_skipped_url_host(host) {
            continue;
        }
        sqlx::query(
            r#"
            INSERT INTO post_urls (post_id, url)
            VALUES ($1, $2)
            ON CONFLICT (post_id, url) DO NOTHING
            "#,
        )
        .bind(post_id)
        .bind(&u.url)
        .execute(db)
        .await?;
    }
    Ok(())
}

pub async fn insert_post_images(
    db: &sqlx::PgPool,
    post_id: i64,
    images: &[NewPostImage],
) -> Result<Vec<i64>, sqlx::Error> {
    let mut ids = Vec::with_capacity(images.len());
    for img in images {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO post_images (post_id, image_url)
            VALUES ($1, $2)
            ON CONFLICT (post_id, image_url) DO UPDATE SET image_url = EXCLUDED.image_url
            RETURNING id
            "#,
        )
        .bind(post_id)
        .bind(&img.image_url)
        .fetch_one(db)
        .await?;
        ids.push(id);
    }
    Ok(ids)
}

pub async fn insert_post_videos(
    db: &sqlx::PgPool,
    post_id: i64,
    videos: &[NewPostVideo],
) -> Result<(), sqlx::Error> {
    for v in videos {
        sqlx::query(
            r#"
            INSERT INTO post_videos (post_id, resolution_bucket, media_url)
            VALUES ($1, $2, $3)
            ON CONFLICT (post_id, resolution_bucket) DO NOTHING
            "#,
        )
        .bind(post_id)
        .bind(&v.resolution_bucket)
        .bind(&v.media_url)
        .execute(db)
        .await?;
    }
    Ok(())
}

/// Written once by the URL-enrichment worker; a guard clause keeps it from
/// clobbering content a concurrent retry already filled in.
pub async fn set_url_content(
    db: &sqlx::PgPool,
    post_url_id: i64,
    content: &str,
    raw_html: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE post_urls
        SET content = $1, raw_html = $2
        WHERE id = $3 AND content IS NULL
        "#,
    )
    .bind(content)
    .bind(raw_html)
    .bind(post_url_id)
    .execute(db)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_image_classification(
    db: &sqlx::PgPool,
    post_image_id: i64,
    category: &str,
    warrants_financial_analysis: bool,
    summary: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE post_images
        SET image_category = $1, warrants_financial_analysis = $2, summary = $3
        WHERE id = $4 AND image_category IS NULL
        "#,
    )
    .bind(category)
    .bind(warrants_financial_analysis)
    .bind(summary)
    .bind(post_image_id)
    .execute(db)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// URLs still awaiting content extraction for one post.
pub async fn fetch_pending_post_urls_for_post(
    db: &sqlx::PgPool,
    post_id: i64,
) -> Result<Vec<PostUrl>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT id, post_id, url, content, raw_html FROM post_urls
        WHERE post_id = $1 AND content IS NULL
        ORDER BY id ASC
        "#,
    )
    .bind(post_id)
    .fetch_all(db)
    .await
}

/// Images still awaiting classification for one post.
pub async fn fetch_pending_post_images_for_post(
    db: &sqlx::PgPool,
    post_id: i64,
) -> Result<Vec<PostImage>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT id, post_id, image_url, image_category, warrants_financial_analysis, summary
        FROM post_images
        WHERE post_id = $1 AND image_category IS NULL
        ORDER BY id ASC
        "#,
    )
    .bind(post_id)
    .fetch_all(db)
    .await
}

/// URLs still awaiting content extraction, oldest first.
pub async fn fetch_pending_post_urls(
    db: &sqlx::PgPool,
    limit: i64,
) -> Result<Vec<PostUrl>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT id, post_id, url, content, raw_html FROM post_urls
        WHERE content IS NULL
        ORDER BY id ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(db)
    .await
}

/// Images still awaiting classification, oldest first.
pub async fn fetch_pending_post_images(
    db: &sqlx::PgPool,
    limit: i64,
) -> Result<Vec<PostImage>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT id, post_id, image_url, image_category, warrants_financial_analysis, summary
        FROM post_images
        WHERE image_category IS NULL
        ORDER BY id ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(db)
    .await
}

#[derive(Debug, sqlx::FromRow)]
pub struct NormalizeInput {
    pub id: i64,
    pub raw_text: String,
    pub quoted_text: Option<String>,
}

pub async fn fetch_post_for_normalize(
    db: &sqlx::PgPool,
    post_id: i64,
) -> Result<Option<NormalizeInput>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT id, raw_text, quoted_text FROM posts WHERE id = $1
        "#,
    )
    .bind(post_id)
    .fetch_optional(db)
    .await
}

/// The three earliest URL contexts with real (non-sentinel) extracted content.
pub async fn fetch_url_contexts_for_normalize(
    db: &sqlx::PgPool,
    post_id: i64,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        r#"
        SELECT content FROM post_urls
        WHERE post_id = $1
          AND content IS NOT NULL
          AND content NOT LIKE 'Could not extract readable content%'
          AND content NOT LIKE 'Error fetching content:%'
        ORDER BY id ASC
        LIMIT 3
        "#,
    )
    .bind(post_id)
    .fetch_all(db)
    .await
}

pub async fn fetch_image_summaries(
    db: &sqlx::PgPool,
    post_id: i64,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        r#"
        SELECT summary FROM post_images
        WHERE post_id = $1 AND summary IS NOT NULL
        ORDER BY id ASC
        "#,
    )
    .bind(post_id)
    .fetch_all(db)
    .await
}

/// Idempotent: only writes if the post has no headline yet, unless `force`
/// is set (used by backfill).
pub async fn set_normalized(
    db: &sqlx::PgPool,
    post_id: i64,
    headline: &str,
    facts: &[String],
    force: bool,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE posts
        SET normalized_headline = $1, normalized_facts = $2
        WHERE id = $3 AND (normalized_headline IS NULL OR $4)
        "#,
    )
    .bind(headline)
    .bind(facts)
    .bind(post_id)
    .bind(force)
    .execute(db)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_embedding(
    db: &sqlx::PgPool,
    post_id: i64,
    embedding: &Vector,
    force: bool,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE posts
        SET normalized_headline_embedding = $1
        WHERE id = $2 AND (normalized_headline_embedding IS NULL OR $3)
        "#,
    )
    .bind(embedding)
    .bind(post_id)
    .bind(force)
    .execute(db)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Posts ingested but not yet normalized (used to emit `preprocess` events
/// and by the backfill path).
pub async fn fetch_unnormalized_post_ids<'e, E>(
    executor: E,
    post_ids: &[i64],
) -> Result<Vec<i64>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    if post_ids.is_empty() {
        return Ok(Vec::new());
    }
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT id FROM posts
        WHERE id = ANY($1) AND normalized_headline IS NULL
        "#,
    )
    .bind(post_ids)
    .fetch_all(executor)
    .await
}

/// Normalized posts within a lookback window, for the embedding-story-preview
/// operator harness to re-embed under a candidate provider/model without
/// touching the stored embedding column.
pub async fn fetch_recent_normalized_posts(
    db: &sqlx::PgPool,
    lookback_hours: i64,
    limit: i64,
) -> Result<Vec<Post>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT id, external_id, canonical_tweet_id, is_latest_version, author_handle, created_at,
               raw_text, quoted_text, impressions, likes, retweets, quotes, bookmarks, replies,
               is_retweet, is_reply, is_quote, normalized_headline, normalized_facts, normalized_headline_embedding
        FROM posts
        WHERE normalized_headline IS NOT NULL
          AND created_at >= NOW() - ($1::text || ' hours')::interval
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(lookback_hours.to_string())
    .bind(limit)
    .fetch_all(db)
    .await
}

pub async fn fetch_posts_missing_embedding(
    db: &sqlx::PgPool,
    lookback_hours: i64,
    limit: i64,
) -> Result<Vec<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT id FROM posts
        WHERE normalized_headline_embedding IS NULL
          AND normalized_headline IS NOT NULL
          AND created_at >= NOW() - ($1::text || ' hours')::interval
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(lookback_hours.to_string())
    .bind(limit)
    .fetch_all(db)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_self_links_and_video_hosts() {
        assert!(is_skipped_url_host("x.com"));
        assert!(is_skipped_url_host("www.twitter.com"));
        assert!(is_skipped_url_host("t.co"));
        assert!(is_skipped_url_host("youtube.com"));
        assert!(is_skipped_url_host("music.youtube.com"));
        assert!(!is_skipped_url_host("reuters.com"));
        assert!(!is_skipped_url_host("bloomberg.com"));
    }
}
