//! HTTP surface: the story read model, the feedback write path, health, and
//! the operator run ledger.

pub mod feedback;
pub mod health;
pub mod operator;
pub mod stories;

use std::sync::Arc;

use apalis_sql::postgres::PostgresStorage;
use axum::Router;
use sqlx::PgPool;

use crate::config::PipelineConfig;
use crate::events::PipelineEvent;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<PipelineConfig>,
    pub events: PostgresStorage<PipelineEvent>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(stories::routes())
        .merge(feedback::routes())
        .merge(health::routes())
        .merge(operator::routes())
        .with_state(state)
}
