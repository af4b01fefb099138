// src/runner.rs
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::OverlapPolicy;
use crate::datasource::DataSourceRegistry;
use crate::domain::{ExecutionStatus, JobDefinition};
use crate::error::EngineError;
use crate::executor::QueryExecutor;
use crate::store::{HistoryStore, JobStore};

/// Orchestrates one execution of one job definition.
///
/// Both trigger paths (the scheduling loop and manual triggers) funnel
/// through here. The runner is the isolation barrier: everything that goes
/// wrong during a run is converted into a FAILED history record and logged,
/// never rethrown, so a single job's failure cannot abort the loop or the
/// trigger request.
pub struct JobRunner {
    registry: Arc<DataSourceRegistry>,
    executor: Arc<dyn QueryExecutor>,
    jobs: Arc<dyn JobStore>,
    history: Arc<dyn HistoryStore>,
    overlap: OverlapPolicy,
    running: Mutex<HashSet<i64>>,
}

impl JobRunner {
    pub fn new(
        registry: Arc<DataSourceRegistry>,
        executor: Arc<dyn QueryExecutor>,
        jobs: Arc<dyn JobStore>,
        history: Arc<dyn HistoryStore>,
        overlap: OverlapPolicy,
    ) -> Self {
        Self {
            registry,
            executor,
            jobs,
            history,
            overlap,
            running: Mutex::new(HashSet::new()),
        }
    }

    /// Run one job, fire-and-record. The outcome is observable only through
    /// the history store.
    pub async fn run(&self, job: &JobDefinition) {
        let Some(_claim) = self.try_claim(job.id) else {
            warn!(
                job_id = job.id,
                job_name = %job.job_name,
                "Job is already running; skipping overlapping trigger"
            );
            return;
        };
        self.run_claimed(job).await;
    }

    /// Manual-trigger path: load the definition, then share the cron path's
    /// run. No execution record is created when the id does not resolve.
    pub async fn run_job_by_id(&self, id: i64) -> Result<(), EngineError> {
        let job = self
            .jobs
            .find_by_id(id)
            .await?
            .ok_or(EngineError::JobNotFound(id))?;
        let _claim = self.try_claim(job.id).ok_or(EngineError::JobBusy(id))?;
        self.run_claimed(&job).await;
        Ok(())
    }

    async fn run_claimed(&self, job: &JobDefinition) {
        let start = Utc::now();
        let mut record = match self
            .history
            .create(Some(job.id), &job.job_name, start, "Job started")
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!(job_id = job.id, error = %format!("{e:#}"), "Could not persist STARTED record; aborting run");
                return;
            }
        };

        let result = self.execute(job).await;
        let end = Utc::now();

        match result {
            Ok(()) => {
                record.finalize(
                    ExecutionStatus::Completed,
                    end,
                    &format!("Job completed with status: {}", ExecutionStatus::Completed),
                );
                info!(
                    job_id = job.id,
                    job_name = %job.job_name,
                    duration_ms = record.duration_ms,
                    "✅ Job completed"
                );
            }
            Err(e) => {
                record.finalize(ExecutionStatus::Failed, end, &e.to_string());
                error!(
                    job_id = job.id,
                    job_name = %job.job_name,
                    error = %e,
                    "❌ Job failed"
                );
            }
        }

        if let Err(e) = self.history.finalize(&record).await {
            error!(
                record_id = record.id,
                error = %format!("{e:#}"),
                "Could not persist terminal execution record"
            );
        }
    }

    async fn execute(&self, job: &JobDefinition) -> Result<(), EngineError> {
        let pool = self.registry.resolve(&job.target_db_name)?;
        let outcome = self.executor.execute(&job.sql_query, pool).await?;
        info!(
            job_name = %job.job_name,
            outcome = %outcome.summary(),
            "Job execution finished"
        );
        Ok(())
    }

    fn try_claim(&self, id: i64) -> Option<RunClaim<'_>> {
        match self.overlap {
            OverlapPolicy::Allow => Some(RunClaim { running: None, id }),
            OverlapPolicy::Skip => {
                let mut running = self.running.lock().unwrap();
                if running.insert(id) {
                    Some(RunClaim { running: Some(&self.running), id })
                } else {
                    None
                }
            }
        }
    }
}

/// Advisory per-job run lock, released on drop.
struct RunClaim<'a> {
    running: Option<&'a Mutex<HashSet<i64>>>,
    id: i64,
}

impl Drop for RunClaim<'_> {
    fn drop(&mut self) {
        if let Some(running) = self.running {
            running.lock().unwrap().remove(&self.id);
        }
    }
}
