//! Operator visibility and control: the most recent run of each scheduled
//! pipeline function, and the human-triggered backfill event.

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use serde::Deserialize;

use crate::events;
use crate::services::db::{self, FunctionRunSummary};
use crate::services::error::LogErr;

use super::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/operator/runs", get(list_runs))
        .route("/operator/backfill", post(trigger_backfill))
}

async fn list_runs(State(state): State<AppState>) -> Result<Json<Vec<FunctionRunSummary>>, StatusCode> {
    db::latest_runs(&state.pool).await.map(Json).log_500("operator: failed to load run ledger")
}

#[derive(Debug, Deserialize)]
struct BackfillRequest {
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    lookback_hours: Option<i64>,
    #[serde(default)]
    all_posts: bool,
}

/// `cluster.backfill.requested`: human-triggered re-embed of posts missing
/// an embedding. Accepted immediately; the actual work runs on the event
/// dispatch worker under its own concurrency cap.
async fn trigger_backfill(
    State(state): State<AppState>,
    Json(body): Json<BackfillRequest>,
) -> Result<StatusCode, StatusCode> {
    let mut events = state.events.clone();
    events::emit_cluster_backfill_requested(&mut events, body.limit, body.lookback_hours, body.all_posts)
        .await
        .log_500("operator: failed to emit backfill event")?;
    Ok(StatusCode::ACCEPTED)
}
