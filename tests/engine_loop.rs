// tests/engine_loop.rs
//
// Runner and scheduler behavior through the public API, with in-memory
// stores and a canned executor. Registry pools connect lazily, so no
// database is required.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout, Duration};

use acc_runner::{
    DataSourceDef, DataSourceRegistry, EngineError, ExecutionRecord, ExecutionStatus,
    HistoryStore, JobDefinition, JobRunner, JobStore, OverlapPolicy, QueryExecutor, QueryOutcome,
    Scheduler, MESSAGE_CAP,
};

struct MemJobStore {
    jobs: Vec<JobDefinition>,
}

#[async_trait]
impl JobStore for MemJobStore {
    async fn find_active(&self) -> anyhow::Result<Vec<JobDefinition>> {
        Ok(self.jobs.iter().filter(|j| j.active).cloned().collect())
    }

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<JobDefinition>> {
        Ok(self.jobs.iter().find(|j| j.id == id).cloned())
    }
}

#[derive(Default)]
struct MemHistoryStore {
    records: Mutex<Vec<ExecutionRecord>>,
    next_id: AtomicI64,
}

impl MemHistoryStore {
    fn snapshot(&self) -> Vec<ExecutionRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl HistoryStore for MemHistoryStore {
    async fn create(
        &self,
        job_id: Option<i64>,
        job_name: &str,
        start_time: DateTime<Utc>,
        message: &str,
    ) -> anyhow::Result<ExecutionRecord> {
        let record = ExecutionRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            scheduled_job_id: job_id,
            job_name: job_name.to_string(),
            start_time,
            end_time: None,
            status: ExecutionStatus::Started,
            message: Some(message.to_string()),
            duration_ms: None,
        };
        self.records.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn finalize(&self, record: &ExecutionRecord) -> anyhow::Result<()> {
        let mut records = self.records.lock().unwrap();
        let slot = records
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| anyhow::anyhow!("no record {}", record.id))?;
        *slot = record.clone();
        Ok(())
    }

    async fn recent(&self, limit: i64) -> anyhow::Result<Vec<ExecutionRecord>> {
        let mut records = self.snapshot();
        records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        records.truncate(limit as usize);
        Ok(records)
    }

    async fn for_job(&self, job_id: i64) -> anyhow::Result<Vec<ExecutionRecord>> {
        let mut records: Vec<_> = self
            .snapshot()
            .into_iter()
            .filter(|r| r.scheduled_job_id == Some(job_id))
            .collect();
        records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(records)
    }
}

/// Canned executor: optionally fails, optionally blocks on a gate so a run
/// can be held in flight. The gate is a zero-permit semaphore; tests bank
/// permits to release held runs.
#[derive(Default)]
struct FakeExecutor {
    fail_with: Option<String>,
    gate: Option<Arc<Semaphore>>,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl QueryExecutor for FakeExecutor {
    async fn execute(&self, sql: &str, _pool: &PgPool) -> Result<QueryOutcome, EngineError> {
        self.calls.lock().unwrap().push(sql.to_string());
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        match &self.fail_with {
            Some(msg) => Err(EngineError::ExecutionFailed(sqlx::Error::Protocol(msg.clone()))),
            None => Ok(QueryOutcome::Statement { rows_affected: 1 }),
        }
    }
}

fn job(id: i64, cron: &str, target: &str, active: bool) -> JobDefinition {
    JobDefinition {
        id,
        job_name: format!("job-{id}"),
        cron_expression: cron.to_string(),
        target_db_name: target.to_string(),
        sql_query: "UPDATE t SET x = 1".to_string(),
        description: None,
        active,
    }
}

fn registry() -> Arc<DataSourceRegistry> {
    let defs = vec![
        DataSourceDef::new("anasa-db", "postgres://127.0.0.1:5432/anasa"),
        DataSourceDef::new("reports", "postgres://127.0.0.1:5432/reports"),
    ];
    Arc::new(DataSourceRegistry::from_defs(&defs).unwrap())
}

struct Harness {
    history: Arc<MemHistoryStore>,
    runner: Arc<JobRunner>,
    jobs: Arc<MemJobStore>,
    executor: Arc<FakeExecutor>,
}

fn harness(jobs: Vec<JobDefinition>, executor: FakeExecutor, overlap: OverlapPolicy) -> Harness {
    let history = Arc::new(MemHistoryStore::default());
    let jobs = Arc::new(MemJobStore { jobs });
    let executor = Arc::new(executor);
    let runner = Arc::new(JobRunner::new(
        registry(),
        executor.clone(),
        jobs.clone(),
        history.clone(),
        overlap,
    ));
    Harness { history, runner, jobs, executor }
}

fn scheduler(h: &Harness) -> Scheduler {
    Scheduler::new(h.jobs.clone(), h.runner.clone(), 60, chrono_tz::UTC)
}

async fn wait_until<F: Fn() -> bool>(cond: F) {
    timeout(Duration::from_secs(2), async {
        while !cond() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn successful_run_records_started_then_completed() {
    let h = harness(vec![], FakeExecutor::default(), OverlapPolicy::Skip);
    let j = job(7, "0 * * * * *", "anasa-db", true);

    h.runner.run(&j).await;

    let records = h.history.snapshot();
    assert_eq!(records.len(), 1);
    let r = &records[0];
    assert_eq!(r.scheduled_job_id, Some(7));
    assert_eq!(r.job_name, "job-7");
    assert_eq!(r.status, ExecutionStatus::Completed);
    assert_eq!(r.message.as_deref(), Some("Job completed with status: COMPLETED"));
    assert!(r.end_time.unwrap() >= r.start_time);
    assert!(r.duration_ms.unwrap() >= 0);
    assert_eq!(
        h.executor.calls.lock().unwrap().as_slice(),
        ["UPDATE t SET x = 1"]
    );
}

#[tokio::test]
async fn unknown_datasource_records_failure_naming_the_lookup_key() {
    let h = harness(vec![], FakeExecutor::default(), OverlapPolicy::Skip);
    let j = job(3, "0 * * * * *", "ghost-db", true);

    h.runner.run(&j).await;

    let records = h.history.snapshot();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Failed);
    let msg = records[0].message.as_deref().unwrap();
    assert!(msg.contains("ghostDbDataSource"), "message was: {msg}");
    assert!(msg.contains("ghost-db"));
    // Resolution failed before the executor was ever reached.
    assert!(h.executor.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn execution_failure_message_is_truncated_to_cap() {
    let executor = FakeExecutor {
        fail_with: Some("boom ".repeat(1000)),
        ..Default::default()
    };
    let h = harness(vec![], executor, OverlapPolicy::Skip);
    let j = job(4, "0 * * * * *", "anasa-db", true);

    h.runner.run(&j).await;

    let records = h.history.snapshot();
    assert_eq!(records[0].status, ExecutionStatus::Failed);
    let msg = records[0].message.as_deref().unwrap();
    assert_eq!(msg.chars().count(), MESSAGE_CAP);
}

#[tokio::test]
async fn run_job_by_id_unknown_id_fails_without_a_record() {
    let h = harness(vec![], FakeExecutor::default(), OverlapPolicy::Skip);

    let err = h.runner.run_job_by_id(999).await.unwrap_err();
    assert!(matches!(err, EngineError::JobNotFound(999)));
    assert!(h.history.snapshot().is_empty());
}

#[tokio::test]
async fn run_job_by_id_runs_a_stored_job() {
    let h = harness(
        vec![job(1, "0 0 3 * * *", "reports", false)],
        FakeExecutor::default(),
        OverlapPolicy::Skip,
    );

    // Manual trigger ignores both the cron expression and the active flag.
    h.runner.run_job_by_id(1).await.unwrap();

    let records = h.history.snapshot();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn inactive_jobs_never_run_from_the_loop() {
    let h = harness(
        vec![job(1, "0 * * * * *", "anasa-db", false)],
        FakeExecutor::default(),
        OverlapPolicy::Skip,
    );
    let s = scheduler(&h);

    s.tick_once(Utc.with_ymd_and_hms(2025, 9, 26, 10, 0, 0).unwrap()).await;

    assert!(h.history.snapshot().is_empty());
    assert!(h.executor.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn matching_job_runs_exactly_once_per_tick() {
    let h = harness(
        vec![job(1, "0 * * * * *", "anasa-db", true)],
        FakeExecutor::default(),
        OverlapPolicy::Skip,
    );
    let s = scheduler(&h);

    s.tick_once(Utc.with_ymd_and_hms(2025, 9, 26, 10, 0, 0).unwrap()).await;
    assert_eq!(h.history.snapshot().len(), 1);

    // Sub-minute instant: seconds field (0) does not match.
    s.tick_once(Utc.with_ymd_and_hms(2025, 9, 26, 10, 0, 30).unwrap()).await;
    assert_eq!(h.history.snapshot().len(), 1);
}

#[tokio::test]
async fn unparsable_cron_skips_only_that_job() {
    let h = harness(
        vec![
            job(1, "every fortnight", "anasa-db", true),
            job(2, "0 * * * * *", "anasa-db", true),
        ],
        FakeExecutor::default(),
        OverlapPolicy::Skip,
    );
    let s = scheduler(&h);

    s.tick_once(Utc.with_ymd_and_hms(2025, 9, 26, 10, 0, 0).unwrap()).await;

    let records = h.history.snapshot();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].scheduled_job_id, Some(2));
}

#[tokio::test]
async fn one_failing_job_does_not_abort_the_tick() {
    let h = harness(
        vec![
            job(1, "0 * * * * *", "ghost-db", true),
            job(2, "0 * * * * *", "anasa-db", true),
        ],
        FakeExecutor::default(),
        OverlapPolicy::Skip,
    );
    let s = scheduler(&h);

    s.tick_once(Utc.with_ymd_and_hms(2025, 9, 26, 10, 0, 0).unwrap()).await;

    let records = h.history.snapshot();
    assert_eq!(records.len(), 2);
    let by_job = |id| records.iter().find(|r| r.scheduled_job_id == Some(id)).unwrap();
    assert_eq!(by_job(1).status, ExecutionStatus::Failed);
    assert_eq!(by_job(2).status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn overlapping_manual_trigger_is_rejected_under_skip_policy() {
    let gate = Arc::new(Semaphore::new(0));
    let executor = FakeExecutor {
        gate: Some(gate.clone()),
        ..Default::default()
    };
    let h = harness(
        vec![job(1, "0 * * * * *", "anasa-db", true)],
        executor,
        OverlapPolicy::Skip,
    );

    let runner = h.runner.clone();
    let first = tokio::spawn(async move { runner.run_job_by_id(1).await });

    let history = h.history.clone();
    wait_until(move || !history.snapshot().is_empty()).await;

    let err = h.runner.run_job_by_id(1).await.unwrap_err();
    assert!(matches!(err, EngineError::JobBusy(1)));

    gate.add_permits(1);
    first.await.unwrap().unwrap();

    // The rejected trigger never started a run, so exactly one record exists.
    let records = h.history.snapshot();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn allow_policy_lets_runs_of_the_same_job_overlap() {
    let gate = Arc::new(Semaphore::new(0));
    let executor = FakeExecutor {
        gate: Some(gate.clone()),
        ..Default::default()
    };
    let h = harness(
        vec![job(1, "0 * * * * *", "anasa-db", true)],
        executor,
        OverlapPolicy::Allow,
    );

    let mut handles = Vec::new();
    for _ in 0..2 {
        let runner = h.runner.clone();
        handles.push(tokio::spawn(async move { runner.run_job_by_id(1).await }));
    }

    let history = h.history.clone();
    wait_until(move || history.snapshot().len() == 2).await;

    gate.add_permits(2);
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let records = h.history.snapshot();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.status == ExecutionStatus::Completed));
}

#[tokio::test]
async fn history_queries_order_by_start_time_descending() {
    let h = harness(vec![], FakeExecutor::default(), OverlapPolicy::Skip);

    for (i, offset) in [(1i64, 30i64), (2, 10), (3, 20)] {
        let start = Utc::now() - chrono::Duration::seconds(offset);
        let mut rec = h.history.create(Some(i), &format!("job-{i}"), start, "Job started").await.unwrap();
        rec.finalize(ExecutionStatus::Completed, start, "Job completed with status: COMPLETED");
        h.history.finalize(&rec).await.unwrap();
    }

    let recent = h.history.recent(2).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].scheduled_job_id, Some(2));
    assert_eq!(recent[1].scheduled_job_id, Some(3));

    let for_job = h.history.for_job(1).await.unwrap();
    assert_eq!(for_job.len(), 1);
}
