// src/engine.rs
use std::sync::Arc;

use anyhow::Context;
use chrono_tz::Tz;
use tracing::warn;

use crate::config::EngineConfig;
use crate::datasource::DataSourceRegistry;
use crate::domain::ExecutionRecord;
use crate::error::EngineError;
use crate::executor::SqlExecutor;
use crate::runner::JobRunner;
use crate::scheduler::Scheduler;
use crate::store::{HistoryStore, JobStore, SqlHistoryStore, SqlJobStore};

/// Composition root and collaborator-facing facade.
///
/// Construction wires config → pools → stores → runner → scheduler. Pools
/// connect lazily, so `new` performs no I/O; the first query opens the
/// connections.
pub struct Engine {
    registry: Arc<DataSourceRegistry>,
    history: Arc<dyn HistoryStore>,
    runner: Arc<JobRunner>,
    scheduler: Arc<Scheduler>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> anyhow::Result<Self> {
        let mut defs = vec![config.primary.clone()];
        defs.extend(config.datasources.iter().cloned());
        let registry = Arc::new(DataSourceRegistry::from_defs(&defs)?);

        let primary_pool = registry
            .resolve(&config.primary.name)
            .map_err(anyhow::Error::new)
            .context("primary datasource missing from registry")?
            .clone();

        let jobs: Arc<dyn JobStore> = Arc::new(SqlJobStore::new(primary_pool.clone()));
        let history: Arc<dyn HistoryStore> = Arc::new(SqlHistoryStore::new(primary_pool));

        let executor = Arc::new(SqlExecutor::new(config.max_fetch_rows, config.sample_rows));
        let runner = Arc::new(JobRunner::new(
            Arc::clone(&registry),
            executor,
            Arc::clone(&jobs),
            Arc::clone(&history),
            config.overlap,
        ));

        let tz: Tz = config.timezone.parse().unwrap_or_else(|_| {
            warn!(timezone = %config.timezone, "Unknown timezone; falling back to UTC");
            chrono_tz::UTC
        });
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&jobs),
            Arc::clone(&runner),
            config.tick_secs,
            tz,
        ));

        Ok(Self { registry, history, runner, scheduler })
    }

    /// Start the scheduling loop.
    pub fn start(&self) {
        Arc::clone(&self.scheduler).start();
    }

    /// Stop the scheduling loop. Does not cancel an in-flight run.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    /// Run a stored job right now, bypassing cron evaluation. Synchronous
    /// from the caller's perspective: returns once the run has finished and
    /// its terminal history record is persisted.
    pub async fn run_job_by_id(&self, id: i64) -> Result<(), EngineError> {
        self.runner.run_job_by_id(id).await
    }

    /// Most recent executions across all jobs, start time descending.
    pub async fn list_recent_history(&self, limit: i64) -> anyhow::Result<Vec<ExecutionRecord>> {
        self.history.recent(limit).await
    }

    /// Executions of one job, start time descending.
    pub async fn list_history_for_job(&self, job_id: i64) -> anyhow::Result<Vec<ExecutionRecord>> {
        self.history.for_job(job_id).await
    }

    /// Logical names of the registered datasources, for the dashboard
    /// collaborator's job form.
    pub fn datasource_names(&self) -> Vec<String> {
        self.registry.datasource_names()
    }
}
