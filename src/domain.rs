// src/domain.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hard cap on persisted outcome messages (characters, not bytes).
pub const MESSAGE_CAP: usize = 2000;

/// A stored description of a recurring SQL task.
///
/// Created and edited by the CRUD collaborator; the engine only ever reads
/// these. `cron_expression` is six-field seconds-first ("0 * * * * *"); a
/// five-field expression is accepted with seconds normalized to 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: i64,
    pub job_name: String,
    pub cron_expression: String,
    /// Logical kebab-case datasource name, e.g. "anasa-db".
    pub target_db_name: String,
    /// Arbitrary operator-supplied SQL. Opaque to the engine.
    pub sql_query: String,
    pub description: Option<String>,
    /// Gate for scheduling eligibility. Inactive jobs are never cron-fired.
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Started,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Started => "STARTED",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STARTED" => Some(ExecutionStatus::Started),
            "COMPLETED" => Some(ExecutionStatus::Completed),
            "FAILED" => Some(ExecutionStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit row for one run of one job.
///
/// Created in `Started` state before anything else happens, so a crash
/// mid-run still leaves a visible STARTED row. Finalized exactly once to
/// `Completed` or `Failed`; never re-opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: i64,
    /// Owning job. None only for ad-hoc runs without a stored definition.
    pub scheduled_job_id: Option<i64>,
    /// Denormalized snapshot of the job name at run time, immune to renames.
    pub job_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub message: Option<String>,
    pub duration_ms: Option<i64>,
}

impl ExecutionRecord {
    /// Finalize the record in place. `end - start` drives the duration.
    pub fn finalize(&mut self, status: ExecutionStatus, end: DateTime<Utc>, message: &str) {
        self.end_time = Some(end);
        self.status = status;
        self.message = Some(truncate_message(message));
        self.duration_ms = Some((end - self.start_time).num_milliseconds());
    }
}

/// First `MESSAGE_CAP` characters of `msg`, character-boundary safe.
pub fn truncate_message(msg: &str) -> String {
    if msg.chars().count() <= MESSAGE_CAP {
        msg.to_string()
    } else {
        msg.chars().take(MESSAGE_CAP).collect()
    }
}
