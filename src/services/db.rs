//! Database pool construction and the function-run ledger.
//!
//! The ledger generalizes the teacher's `agent_runs` table
//! (start_agent_run/finish_agent_run in agent.rs) from one function
//! (the tweet-drafting agent) to every named pipeline function, matching
//! the error design's `recordFunctionRun(function_id, state, details)`
//! propagation policy.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub async fn connect(database_url: &str, pool_size: u32) -> PgPool {
    let pool = PgPoolOptions::new()
        .max_connections(pool_size)
        .connect(database_url)
        .await
        .expect("Failed to connect to database");

    sqlx::migrate!("migrations")
        .run(&pool)
        .await
        .expect("failed to run database migrations");

    pool
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Completed,
    Failed,
}

impl RunState {
    fn as_str(self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }
}

/// Insert a `running` row for this invocation of `function_id`, returning its id.
pub async fn start_function_run(db: &PgPool, function_id: &str) -> Option<i64> {
    match sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO pipeline_function_runs (function_id, status, started_at)
        VALUES ($1, 'running', NOW())
        RETURNING id
        "#,
    )
    .bind(function_id)
    .fetch_one(db)
    .await
    {
        Ok(id) => Some(id),
        Err(e) => {
            eprintln!("[runs] failed to record start of {function_id}: {e}");
            None
        }
    }
}

/// Record the terminal state of a function-run. Best-effort: a failure to
/// write run status is warned but never masks the underlying worker error.
pub async fn finish_function_run(
    db: &PgPool,
    run_id: Option<i64>,
    state: RunState,
    details: Option<&str>,
) {
    let Some(run_id) = run_id else { return };
    let result = sqlx::query(
        r#"
        UPDATE pipeline_function_runs
        SET status = $1, completed_at = NOW(), details = $2
        WHERE id = $3
        "#,
    )
    .bind(state.as_str())
    .bind(details)
    .bind(run_id)
    .execute(db)
    .await;

    if let Err(e) = result {
        eprintln!("[runs] failed to record completion of run {run_id}: {e}");
    }
}

/// Run `body`, recording a `pipeline_function_runs` row around it regardless
/// of outcome. Mirrors the teacher's try/finish pattern in agent.rs but
/// generalized to any function, any error type convertible to a message.
pub async fn with_run_tracking<T, E, F>(
    db: &PgPool,
    function_id: &str,
    body: F,
) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let run_id = start_function_run(db, function_id).await;
    match body.await {
        Ok(value) => {
            finish_function_run(db, run_id, RunState::Completed, None).await;
            Ok(value)
        }
        Err(e) => {
            finish_function_run(db, run_id, RunState::Failed, Some(&e.to_string())).await;
            Err(e)
        }
    }
}

#[derive(Debug, sqlx::FromRow, serde::Serialize)]
pub struct FunctionRunSummary {
    pub function_id: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub details: Option<String>,
}

/// The most recent run per function, for the operator health view.
pub async fn latest_runs(db: &PgPool) -> Result<Vec<FunctionRunSummary>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT DISTINCT ON (function_id)
            function_id, status, started_at, completed_at, details
        FROM pipeline_function_runs
        ORDER BY function_id, started_at DESC
        "#,
    )
    .fetch_all(db)
    .await
}
