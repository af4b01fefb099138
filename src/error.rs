// src/error.rs
use thiserror::Error;

/// Engine error taxonomy.
///
/// Errors raised *during* a run (`DataSourceNotFound`, `ExecutionFailed`)
/// never escape the runner; they are converted into a FAILED history record.
/// Errors raised *before* a run starts (`JobNotFound`, `JobBusy`, `Storage`)
/// surface to the direct caller. `CronParse` is logged and the job skipped
/// for the current tick only.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot find datasource for '{name}': looked up '{key}', known: {known:?}")]
    DataSourceNotFound {
        name: String,
        key: String,
        known: Vec<String>,
    },

    #[error("invalid cron expression '{expr}': {reason}")]
    CronParse { expr: String, reason: String },

    #[error("query execution failed: {0}")]
    ExecutionFailed(#[source] sqlx::Error),

    #[error("job not found with id: {0}")]
    JobNotFound(i64),

    #[error("job {0} is already running")]
    JobBusy(i64),

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
}

impl From<anyhow::Error> for EngineError {
    fn from(e: anyhow::Error) -> Self {
        EngineError::Storage(e)
    }
}
