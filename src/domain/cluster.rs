//! Cluster domain — persistent story clusters, their membership, the merge
//! ledger produced when two clusters turn out to be the same story, and the
//! human feedback rows that seed the curation/review prompts.

use chrono::{DateTime, Utc};
use pgvector::Vector;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Cluster {
    pub id: i64,
    pub is_active: bool,
    pub headline: Option<String>,
    pub normalized_facts: Option<Vec<String>>,
    pub centroid_embedding: Option<Vector>,
    pub member_count: i32,
    pub is_story_candidate: bool,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub merged_into_cluster_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClusterMember {
    pub id: i64,
    pub cluster_id: i64,
    pub post_id: i64,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClusterMerge {
    pub id: i64,
    pub surviving_cluster_id: i64,
    pub absorbed_cluster_id: i64,
    pub merged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackVote {
    Useful,
    Noise,
    BadCluster,
}

impl FeedbackVote {
    fn as_str(self) -> &'static str {
        match self {
            FeedbackVote::Useful => "useful",
            FeedbackVote::Noise => "noise",
            FeedbackVote::BadCluster => "bad_cluster",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "useful" => Some(FeedbackVote::Useful),
            "noise" => Some(FeedbackVote::Noise),
            "bad_cluster" => Some(FeedbackVote::BadCluster),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClusterFeedback {
    pub id: i64,
    pub cluster_id: i64,
    pub post_id: i64,
    pub vote: String,
    pub created_at: DateTime<Utc>,
}

/// A cluster member together with the post fields needed by sync's
/// similarity graph: id and embedding.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MemberEmbedding {
    pub post_id: i64,
    pub cluster_id: Option<i64>,
    pub normalized_headline_embedding: Vector,
    pub author_handle: String,
    pub created_at: DateTime<Utc>,
}

/// Posts embedded within the sync lookback window, whether already
/// clustered or not — the candidate pool for the similarity graph.
pub async fn fetch_sync_candidates(
    db: &sqlx::PgPool,
    lookback_hours: i64,
) -> Result<Vec<MemberEmbedding>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT
            p.id AS post_id,
            cm.cluster_id AS cluster_id,
            p.normalized_headline_embedding AS normalized_headline_embedding,
            p.author_handle AS author_handle,
            p.created_at AS created_at
        FROM posts p
        LEFT JOIN cluster_members cm ON cm.post_id = p.id
        WHERE p.normalized_headline_embedding IS NOT NULL
          AND p.is_latest_version = TRUE
          AND NOT p.is_retweet
          AND NOT p.is_reply
          AND NOT p.is_quote
          AND p.created_at >= NOW() - ($1::text || ' hours')::interval
        ORDER BY p.created_at ASC
        "#,
    )
    .bind(lookback_hours.to_string())
    .fetch_all(db)
    .await
}

/// Create a brand new cluster seeded with the given members in one
/// transaction. Used by cluster-sync's create-match path, where a whole
/// connected component becomes a cluster at once. `first_seen_at` and
/// `last_seen_at` come from the component's earliest/latest member times.
pub async fn create_cluster_with_members(
    db: &sqlx::PgPool,
    post_ids: &[i64],
    centroid: &Vector,
    first_seen_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    let mut tx = db.begin().await?;

    let cluster_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO clusters (is_active, centroid_embedding, member_count, first_seen_at, last_seen_at, last_synced_at)
        VALUES (TRUE, $1, $2, $3, $4, NOW())
        RETURNING id
        "#,
    )
    .bind(centroid)
    .bind(post_ids.len() as i32)
    .bind(first_seen_at)
    .bind(last_seen_at)
    .fetch_one(&mut *tx)
    .await?;

    for post_id in post_ids {
        sqlx::query(
            r#"
            INSERT INTO cluster_members (cluster_id, post_id, added_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (post_id) DO NOTHING
            "#,
        )
        .bind(cluster_id)
        .bind(post_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(cluster_id)
}

/// Apply a sync component match against an existing cluster: drop members
/// that fell out of the window-scoped component, add members that were
/// previously unassigned, and refresh the centroid/count/sync timestamp.
/// Posts already owned by a different cluster are never touched here.
pub async fn apply_component_update(
    db: &sqlx::PgPool,
    cluster_id: i64,
    to_remove: &[i64],
    to_add: &[i64],
    new_centroid: &Vector,
    new_member_count: i32,
    last_seen_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    let mut tx = db.begin().await?;

    if !to_remove.is_empty() {
        sqlx::query("DELETE FROM cluster_members WHERE cluster_id = $1 AND post_id = ANY($2)")
            .bind(cluster_id)
            .bind(to_remove)
            .execute(&mut *tx)
            .await?;
    }

    for post_id in to_add {
        sqlx::query(
            r#"
            INSERT INTO cluster_members (cluster_id, post_id, added_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (post_id) DO NOTHING
            "#,
        )
        .bind(cluster_id)
        .bind(post_id)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        r#"
        UPDATE clusters
        SET centroid_embedding = $1, member_count = $2, last_seen_at = $3, updated_at = NOW(), last_synced_at = NOW()
        WHERE id = $4
        "#,
    )
    .bind(new_centroid)
    .bind(new_member_count)
    .bind(last_seen_at)
    .bind(cluster_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await
}

/// Reassign every member of `absorbed` onto `surviving`, record the merge,
/// and deactivate the absorbed cluster. Directional: callers decide which
/// side survives (the larger, or the earlier-created, cluster) — this
/// function only performs the mechanical move. Callers recompute the
/// survivor's stats afterward rather than having this function guess at
/// them mid-merge.
pub async fn merge_clusters(
    db: &sqlx::PgPool,
    surviving_cluster_id: i64,
    absorbed_cluster_id: i64,
) -> Result<(), sqlx::Error> {
    let mut tx = db.begin().await?;

    sqlx::query(
        r#"
        UPDATE cluster_members SET cluster_id = $1
        WHERE cluster_id = $2
        "#,
    )
    .bind(surviving_cluster_id)
    .bind(absorbed_cluster_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        UPDATE clusters SET is_active = FALSE, merged_into_cluster_id = $1, updated_at = NOW() WHERE id = $2
        "#,
    )
    .bind(surviving_cluster_id)
    .bind(absorbed_cluster_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO cluster_merges (surviving_cluster_id, absorbed_cluster_id, merged_at)
        VALUES ($1, $2, NOW())
        "#,
    )
    .bind(surviving_cluster_id)
    .bind(absorbed_cluster_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await
}

const CLUSTER_COLUMNS: &str = r#"
    id, is_active, headline, normalized_facts, centroid_embedding, member_count, is_story_candidate,
    first_seen_at, last_seen_at, reviewed_at, merged_into_cluster_id,
    created_at, updated_at, last_synced_at
"#;

/// Clusters that haven't been touched by a sync pass within the staleness
/// window, for deactivation by the sync worker.
pub async fn fetch_stale_cluster_ids(
    db: &sqlx::PgPool,
    stale_hours: i64,
) -> Result<Vec<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT id FROM clusters
        WHERE is_active = TRUE
          AND merged_into_cluster_id IS NULL
          AND last_synced_at < NOW() - ($1::text || ' hours')::interval
        "#,
    )
    .bind(stale_hours.to_string())
    .fetch_all(db)
    .await
}

pub async fn deactivate_cluster(db: &sqlx::PgPool, cluster_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE clusters SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
        .bind(cluster_id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn fetch_cluster(db: &sqlx::PgPool, cluster_id: i64) -> Result<Option<Cluster>, sqlx::Error> {
    sqlx::query_as(&format!("SELECT {CLUSTER_COLUMNS} FROM clusters WHERE id = $1"))
        .bind(cluster_id)
        .fetch_optional(db)
        .await
}

/// Active, unmerged clusters last touched within `lookback_hours`, ordered
/// by size — the candidate pool for duplicate-consolidation curation.
pub async fn fetch_active_unmerged_clusters(
    db: &sqlx::PgPool,
    lookback_hours: i64,
    limit: i64,
) -> Result<Vec<Cluster>, sqlx::Error> {
    sqlx::query_as(&format!(
        r#"
        SELECT {CLUSTER_COLUMNS} FROM clusters
        WHERE is_active = TRUE
          AND merged_into_cluster_id IS NULL
          AND last_seen_at >= NOW() - ($1::text || ' hours')::interval
        ORDER BY member_count DESC
        LIMIT $2
        "#
    ))
    .bind(lookback_hours.to_string())
    .bind(limit)
    .fetch_all(db)
    .await
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoryFeedRow {
    pub cluster_id: i64,
    pub headline: Option<String>,
    pub normalized_facts: Option<Vec<String>>,
    pub member_count: i32,
    pub unique_user_count: i64,
    pub total_member_engagement: f64,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub first_seen_at: DateTime<Utc>,
}

/// The story read model's source rows: one per active unmerged cluster
/// touched within `lookback_hours`, with engagement and unique-author
/// counts pre-aggregated across its non-blocked members so the caller only
/// has to run the ranking formula, not another round of joins.
pub async fn fetch_story_feed(
    db: &sqlx::PgPool,
    lookback_hours: i64,
    only_story_candidates: bool,
    blocked_accounts: &[String],
) -> Result<Vec<StoryFeedRow>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT
            c.id AS cluster_id,
            c.headline,
            c.normalized_facts,
            c.member_count,
            c.first_seen_at,
            c.last_seen_at,
            COUNT(DISTINCT LOWER(p.author_handle)) AS unique_user_count,
            COALESCE(SUM(
                p.likes::float8 + 2.0 * p.retweets::float8 + 1.5 * p.quotes::float8
                    + p.replies::float8 + 0.2 * p.bookmarks::float8
            ), 0.0) AS total_member_engagement
        FROM clusters c
        JOIN cluster_members cm ON cm.cluster_id = c.id
        JOIN posts p ON p.id = cm.post_id AND NOT (LOWER(p.author_handle) = ANY($4))
        WHERE c.is_active = TRUE
          AND c.merged_into_cluster_id IS NULL
          AND c.last_seen_at >= NOW() - ($1::text || ' hours')::interval
          AND ($2 = FALSE OR c.is_story_candidate = TRUE)
        GROUP BY c.id
        ORDER BY c.last_seen_at DESC
        LIMIT $3
        "#,
    )
    .bind(lookback_hours.to_string())
    .bind(only_story_candidates)
    .bind(500_i64)
    .bind(blocked_accounts)
    .fetch_all(db)
    .await
}

/// Re-read a set of clusters immediately before merging them, filtered to
/// those still unmerged — the freshness check the directional-merge rule
/// depends on.
pub async fn fetch_unmerged_clusters(
    db: &sqlx::PgPool,
    cluster_ids: &[i64],
) -> Result<Vec<Cluster>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {CLUSTER_COLUMNS} FROM clusters WHERE id = ANY($1) AND merged_into_cluster_id IS NULL"
    ))
    .bind(cluster_ids)
    .fetch_all(db)
    .await
}

pub async fn mark_reviewed(db: &sqlx::PgPool, cluster_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE clusters SET reviewed_at = NOW() WHERE id = $1")
        .bind(cluster_id)
        .execute(db)
        .await?;
    Ok(())
}

/// Delete a set of posts from a cluster's membership — cluster-review's
/// outlier-pruning step.
pub async fn remove_members(db: &sqlx::PgPool, cluster_id: i64, post_ids: &[i64]) -> Result<(), sqlx::Error> {
    if post_ids.is_empty() {
        return Ok(());
    }
    sqlx::query("DELETE FROM cluster_members WHERE cluster_id = $1 AND post_id = ANY($2)")
        .bind(cluster_id)
        .bind(post_ids)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn fetch_cluster_member_posts(
    db: &sqlx::PgPool,
    cluster_id: i64,
) -> Result<Vec<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT post_id FROM cluster_members WHERE cluster_id = $1")
        .bind(cluster_id)
        .fetch_all(db)
        .await
}

/// Everything `recompute_stats` needs about one member post, in one query.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MemberDetail {
    pub post_id: i64,
    pub author_handle: String,
    pub likes: i64,
    pub retweets: i64,
    pub quotes: i64,
    pub replies: i64,
    pub bookmarks: i64,
    pub created_at: DateTime<Utc>,
    pub normalized_headline: Option<String>,
    pub normalized_facts: Option<Vec<String>>,
    pub normalized_headline_embedding: Option<Vector>,
}

pub async fn fetch_cluster_member_details(
    db: &sqlx::PgPool,
    cluster_id: i64,
) -> Result<Vec<MemberDetail>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT
            p.id AS post_id, p.author_handle, p.likes, p.retweets, p.quotes, p.replies, p.bookmarks,
            p.created_at, p.normalized_headline, p.normalized_facts, p.normalized_headline_embedding
        FROM cluster_members cm
        JOIN posts p ON p.id = cm.post_id
        WHERE cm.cluster_id = $1
        "#,
    )
    .bind(cluster_id)
    .fetch_all(db)
    .await
}

/// Same as `fetch_cluster_member_details`, capped and ordered by
/// engagement — the review worker's "up to 30 member posts" input.
pub async fn fetch_cluster_member_details_limited(
    db: &sqlx::PgPool,
    cluster_id: i64,
    limit: i64,
) -> Result<Vec<MemberDetail>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT
            p.id AS post_id, p.author_handle, p.likes, p.retweets, p.quotes, p.replies, p.bookmarks,
            p.created_at, p.normalized_headline, p.normalized_facts, p.normalized_headline_embedding
        FROM cluster_members cm
        JOIN posts p ON p.id = cm.post_id
        WHERE cm.cluster_id = $1
        ORDER BY (p.likes + p.retweets + p.quotes + p.replies) DESC
        LIMIT $2
        "#,
    )
    .bind(cluster_id)
    .bind(limit)
    .fetch_all(db)
    .await
}

pub async fn set_curation(
    db: &sqlx::PgPool,
    cluster_id: i64,
    headline: &str,
    facts: &[String],
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE clusters SET headline = $1, normalized_facts = $2, updated_at = NOW() WHERE id = $3
        "#,
    )
    .bind(headline)
    .bind(facts)
    .bind(cluster_id)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn record_feedback(
    db: &sqlx::PgPool,
    cluster_id: i64,
    post_id: i64,
    vote: FeedbackVote,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO cluster_feedback (cluster_id, post_id, vote, created_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (cluster_id, post_id) DO UPDATE SET vote = EXCLUDED.vote, created_at = NOW()
        "#,
    )
    .bind(cluster_id)
    .bind(post_id)
    .bind(vote.as_str())
    .execute(db)
    .await?;
    Ok(())
}

pub async fn fetch_feedback_for_cluster(
    db: &sqlx::PgPool,
    cluster_id: i64,
) -> Result<Vec<ClusterFeedback>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT id, cluster_id, post_id, vote, created_at
        FROM cluster_feedback WHERE cluster_id = $1
        "#,
    )
    .bind(cluster_id)
    .fetch_all(db)
    .await
}

/// Rolled-up feedback counts for one cluster, as consumed by the story
/// ranking formula's feedback penalty term.
pub async fn fetch_feedback_counts(
    db: &sqlx::PgPool,
    cluster_id: i64,
) -> Result<crate::services::ranking::FeedbackCounts, sqlx::Error> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT vote, COUNT(*) FROM cluster_feedback WHERE cluster_id = $1 GROUP BY vote
        "#,
    )
    .bind(cluster_id)
    .fetch_all(db)
    .await?;

    let mut counts = crate::services::ranking::FeedbackCounts::default();
    for (vote, count) in rows {
        match FeedbackVote::from_str(&vote) {
            Some(FeedbackVote::Useful) => counts.useful = count,
            Some(FeedbackVote::Noise) => counts.noise = count,
            Some(FeedbackVote::BadCluster) => counts.bad_cluster = count,
            None => {}
        }
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feedback_vote_round_trips_through_its_string_form() {
        assert_eq!(FeedbackVote::from_str("useful"), Some(FeedbackVote::Useful));
        assert_eq!(FeedbackVote::from_str("noise"), Some(FeedbackVote::Noise));
        assert_eq!(FeedbackVote::from_str("bad_cluster"), Some(FeedbackVote::BadCluster));
        assert_eq!(FeedbackVote::from_str("maybe"), None);
        assert_eq!(FeedbackVote::Useful.as_str(), "useful");
    }
}
