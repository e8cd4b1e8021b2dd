//! Error handling utilities shared by route handlers and background workers.

use axum::http::StatusCode;

/// Extension trait for logging errors and converting to StatusCode, for route handlers.
pub trait LogErr<T> {
    fn log_500(self, context: &str) -> Result<T, StatusCode>;
    fn log_status(self, context: &str, status: StatusCode) -> Result<T, StatusCode>;
}

impl<T, E: std::fmt::Display> LogErr<T> for Result<T, E> {
    fn log_500(self, context: &str) -> Result<T, StatusCode> {
        self.map_err(|e| {
            eprintln!("{}: {}", context, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
    }

    fn log_status(self, context: &str, status: StatusCode) -> Result<T, StatusCode> {
        self.map_err(|e| {
            eprintln!("{}: {}", context, e);
            status
        })
    }
}

/// Error kinds a pipeline worker can hit, per the error handling design:
/// (a) transient external, (b) permanent external, (c) state-conflict,
/// (d) invariant violation, (e) fatal.
#[derive(Debug)]
pub enum PipelineError {
    /// HTTP 5xx, rate-limit, timeout. Retried at the provider-call layer,
    /// then re-raised for the job host to retry.
    Transient(String),
    /// HTTP 4xx (not 429), malformed response, schema violation. A sentinel
    /// is written so the row does not re-queue; the function still completes.
    Permanent(String),
    /// A source row was already mutated by a concurrent worker. Detected by
    /// guard re-read; the caller should skip silently.
    StateConflict(String),
    /// Unparseable LLM output after all extraction strategies. Caller treats
    /// this as a no-op.
    Invariant(String),
    /// Missing credential, store connectivity down. Surfaces to the host.
    Fatal(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Transient(m) => write!(f, "transient error: {m}"),
            PipelineError::Permanent(m) => write!(f, "permanent error: {m}"),
            PipelineError::StateConflict(m) => write!(f, "state conflict: {m}"),
            PipelineError::Invariant(m) => write!(f, "invariant violation: {m}"),
            PipelineError::Fatal(m) => write!(f, "fatal error: {m}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        PipelineError::Fatal(format!("database error: {e}"))
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            PipelineError::Transient(e.to_string())
        } else if let Some(status) = e.status() {
            if status.is_server_error() || status.as_u16() == 429 {
                PipelineError::Transient(format!("status {status}"))
            } else {
                PipelineError::Permanent(format!("status {status}"))
            }
        } else {
            PipelineError::Transient(e.to_string())
        }
    }
}
