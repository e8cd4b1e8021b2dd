//! The story feed: active unmerged clusters scored by [`ranking::score`]
//! and sorted best-first.

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::cluster;
use crate::services::error::LogErr;
use crate::services::ranking::{self, StoryInputs};

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct StoriesQuery {
    lookback_hours: Option<i64>,
    only_story_candidates: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct StoryView {
    pub cluster_id: i64,
    pub headline: Option<String>,
    pub facts: Vec<String>,
    pub tweet_count: i32,
    pub unique_user_count: i64,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub score: f64,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/stories", get(list_stories))
}

async fn list_stories(
    State(state): State<AppState>,
    Query(params): Query<StoriesQuery>,
) -> Result<Json<Vec<StoryView>>, StatusCode> {
    let lookback_hours = params.lookback_hours.unwrap_or(24);
    let only_story_candidates = params.only_story_candidates.unwrap_or(true);
    let blocked: Vec<String> = state.config.blocked_accounts.iter().cloned().collect();

    let rows = cluster::fetch_story_feed(&state.pool, lookback_hours, only_story_candidates, &blocked)
        .await
        .log_500("stories: failed to load story feed")?;

    let mut stories = Vec::with_capacity(rows.len());
    for row in rows {
        let feedback = cluster::fetch_feedback_counts(&state.pool, row.cluster_id)
            .await
            .unwrap_or_default();

        let hours_since_last_seen = row
            .last_seen_at
            .map(|t| (Utc::now() - t).num_seconds() as f64 / 3600.0)
            .unwrap_or(0.0);

        let score = ranking::score(&StoryInputs {
            tweet_count: row.member_count as i64,
            unique_user_count: row.unique_user_count,
            hours_since_last_seen,
            total_member_engagement: row.total_member_engagement,
            feedback,
        });

        stories.push(StoryView {
            cluster_id: row.cluster_id,
            headline: row.headline,
            facts: row.normalized_facts.unwrap_or_default(),
            tweet_count: row.member_count,
            unique_user_count: row.unique_user_count,
            last_seen_at: row.last_seen_at,
            score,
        });
    }

    stories.sort_by(|a, b| {
        ranking::compare_for_ranking(
            a.score,
            a.tweet_count as i64,
            a.unique_user_count,
            a.last_seen_at.unwrap_or_default(),
            b.score,
            b.tweet_count as i64,
            b.unique_user_count,
            b.last_seen_at.unwrap_or_default(),
        )
    });

    Ok(Json(stories))
}
