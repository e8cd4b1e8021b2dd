//! Cluster statistics recompute: tweet/user counts, headline+facts pick,
//! last-seen timestamp, centroid, and story-candidate status. Shared by
//! cluster-sync, cluster-curate, and cluster-review, all three of which
//! "recompute stats on the target" after mutating membership.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::PgPool;

use crate::config::PipelineConfig;
use crate::domain::cluster::{self, MemberDetail};
use crate::services::promo_filter::{self, ClusterTextInputs};
use crate::services::ranking::member_engagement;
use crate::services::vector;

pub struct RecomputedStats {
    pub tweet_count: i64,
    pub unique_user_count: i64,
    pub headline: Option<String>,
    pub facts: Vec<String>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub centroid: Option<Vector>,
    pub is_story_candidate: bool,
    pub became_inactive: bool,
}

/// Picks the member with the strongest engagement among those carrying a
/// headline, matching the "strongest engagement among members with a
/// headline" rule for headline/facts selection.
fn pick_headline_source(members: &[MemberDetail]) -> Option<&MemberDetail> {
    members
        .iter()
        .filter(|m| m.normalized_headline.is_some())
        .max_by(|a, b| {
            let ea = member_engagement(a.likes, a.retweets, a.quotes, a.replies, a.bookmarks);
            let eb = member_engagement(b.likes, b.retweets, b.quotes, b.replies, b.bookmarks);
            ea.partial_cmp(&eb).unwrap_or(std::cmp::Ordering::Equal)
        })
}

pub fn compute(members: &[MemberDetail], config: &PipelineConfig) -> RecomputedStats {
    let non_blocked: Vec<&MemberDetail> = members
        .iter()
        .filter(|m| !config.blocked_accounts.contains(&m.author_handle.to_lowercase()))
        .collect();

    let tweet_count = non_blocked.len() as i64;
    let unique_user_count = non_blocked
        .iter()
        .map(|m| m.author_handle.to_lowercase())
        .collect::<HashSet<_>>()
        .len() as i64;

    let headline_source = pick_headline_source(members);
    let headline = headline_source.and_then(|m| m.normalized_headline.clone());
    let facts = headline_source.and_then(|m| m.normalized_facts.clone()).unwrap_or_default();

    let last_seen_at = members.iter().map(|m| m.created_at).max();

    let embeddings: Vec<Vector> = members.iter().filter_map(|m| m.normalized_headline_embedding.clone()).collect();
    let centroid = vector::mean(&embeddings);

    let member_texts: Vec<String> = members.iter().filter_map(|m| m.normalized_headline.clone()).collect();
    let author_handles: Vec<String> = members.iter().map(|m| m.author_handle.clone()).collect();
    let text_inputs = ClusterTextInputs {
        headline: headline.as_deref(),
        facts: &facts,
        member_texts: &member_texts,
        author_handles: &author_handles,
    };

    let is_story_candidate = promo_filter::is_story_candidate(
        tweet_count,
        unique_user_count,
        config.min_tweets,
        config.min_users,
        &text_inputs,
        headline.as_deref(),
        &facts,
    );

    RecomputedStats {
        tweet_count,
        unique_user_count,
        headline,
        facts,
        last_seen_at,
        centroid,
        is_story_candidate,
        became_inactive: non_blocked.is_empty(),
    }
}

/// Recompute and persist stats for one cluster, deactivating it if it has
/// zero non-blocked members left.
pub async fn recompute_and_store(db: &PgPool, config: &PipelineConfig, cluster_id: i64) -> Result<RecomputedStats, sqlx::Error> {
    let members = cluster::fetch_cluster_member_details(db, cluster_id).await?;
    let stats = compute(&members, config);

    if stats.became_inactive {
        cluster::deactivate_cluster(db, cluster_id).await?;
    } else if let (Some(headline), Some(centroid)) = (&stats.headline, &stats.centroid) {
        cluster::set_curation(db, cluster_id, headline, &stats.facts).await?;
        sqlx::query(
            r#"
            UPDATE clusters
            SET centroid_embedding = $1, member_count = $2, last_seen_at = $3, is_story_candidate = $4, updated_at = NOW()
            WHERE id = $5
            "#,
        )
        .bind(centroid)
        .bind(stats.tweet_count as i32)
        .bind(stats.last_seen_at)
        .bind(stats.is_story_candidate)
        .bind(cluster_id)
        .execute(db)
        .await?;
    } else {
        sqlx::query(
            r#"
            UPDATE clusters SET member_count = $1, last_seen_at = $2, is_story_candidate = $3, updated_at = NOW() WHERE id = $4
            "#,
        )
        .bind(stats.tweet_count as i32)
        .bind(stats.last_seen_at)
        .bind(stats.is_story_candidate)
        .bind(cluster_id)
        .execute(db)
        .await?;
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(author: &str, headline: Option<&str>, likes: i64) -> MemberDetail {
        MemberDetail {
            post_id: 0,
            author_handle: author.to_string(),
            likes,
            retweets: 0,
            quotes: 0,
            replies: 0,
            bookmarks: 0,
            created_at: Utc::now(),
            normalized_headline: headline.map(String::from),
            normalized_facts: headline.map(|_| vec!["a fact".to_string()]),
            normalized_headline_embedding: None,
        }
    }

    use crate::config::test_support::test_config;

    #[test]
    fn picks_headline_from_strongest_engagement_member() {
        let members = vec![member("a", Some("weak headline"), 1), member("b", Some("strong headline"), 100)];
        let config = test_config();
        let stats = compute(&members, &config);
        assert_eq!(stats.headline.as_deref(), Some("strong headline"));
    }

    #[test]
    fn blocked_accounts_do_not_count_toward_stats() {
        let mut config = test_config();
        config.blocked_accounts.insert("spammer".to_string());
        let members = vec![member("spammer", Some("h"), 0), member("real", Some("h"), 0)];
        let stats = compute(&members, &config);
        assert_eq!(stats.tweet_count, 1);
        assert_eq!(stats.unique_user_count, 1);
    }

    #[test]
    fn cluster_with_zero_non_blocked_members_becomes_inactive() {
        let mut config = test_config();
        config.blocked_accounts.insert("spammer".to_string());
        let members = vec![member("spammer", Some("h"), 0)];
        let stats = compute(&members, &config);
        assert!(stats.became_inactive);
    }

    #[test]
    fn below_size_threshold_is_not_a_story_candidate() {
        let members = vec![member("a", Some("h"), 0), member("b", Some("h"), 0)];
        let config = test_config();
        let stats = compute(&members, &config);
        assert!(!stats.is_story_candidate);
    }
}
