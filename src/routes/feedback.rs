//! Feedback write path: a user labels one member post of a cluster as
//! `useful`, `noise`, or `bad_cluster`.

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Json;
use serde::Deserialize;

use crate::domain::cluster;
use crate::services::error::LogErr;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub post_id: i64,
    pub vote: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/clusters/{cluster_id}/feedback", post(submit_feedback))
}

async fn submit_feedback(
    State(state): State<AppState>,
    Path(cluster_id): Path<i64>,
    Json(body): Json<FeedbackRequest>,
) -> Result<StatusCode, StatusCode> {
    let vote = cluster::FeedbackVote::from_str(&body.vote).ok_or(StatusCode::BAD_REQUEST)?;

    cluster::record_feedback(&state.pool, cluster_id, body.post_id, vote)
        .await
        .log_500("feedback: failed to record vote")?;

    Ok(StatusCode::NO_CONTENT)
}
