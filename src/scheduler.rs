// src/scheduler.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::Notify;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cron::Schedule;
use crate::runner::JobRunner;
use crate::store::JobStore;

/// The timer-driven scheduling loop: one tick per period (default once per
/// minute, aligned to minute boundaries), evaluating every active job's cron
/// expression against a single captured "now".
pub struct Scheduler {
    jobs: Arc<dyn JobStore>,
    runner: Arc<JobRunner>,
    tick: Duration,
    tz: Tz,
    shutdown: Arc<Notify>,
}

impl Scheduler {
    pub fn new(jobs: Arc<dyn JobStore>, runner: Arc<JobRunner>, tick_secs: u64, tz: Tz) -> Self {
        Self {
            jobs,
            runner,
            tick: Duration::from_secs(tick_secs.max(1)),
            tz,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Spawn the scheduling loop. A missed tick is skipped, not replayed:
    /// match-at-instant semantics make a late catch-up tick fire against a
    /// stale "now".
    pub fn start(self: Arc<Self>) {
        let scheduler = self;
        tokio::spawn(async move {
            info!(tick = ?scheduler.tick, tz = %scheduler.tz, "🕐 Scheduler started");
            let mut tick = interval_at(Instant::now() + next_minute_delay(Utc::now()), scheduler.tick);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = scheduler.shutdown.notified() => {
                        info!("🕐 Scheduler shutting down");
                        break;
                    }
                    _ = tick.tick() => {
                        scheduler.tick_once(Utc::now()).await;
                    }
                }
            }
        });
    }

    /// Signal the loop to stop after the current tick.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// One scheduling pass. All jobs in the pass see the same `now`. A job
    /// with an unparsable expression is logged and skipped; a job whose run
    /// fails records its own failure. Neither aborts the remaining jobs.
    pub async fn tick_once(&self, now: DateTime<Utc>) {
        debug!("Checking for scheduled jobs to run...");
        let jobs = match self.jobs.find_active().await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %format!("{e:#}"), "Could not load active jobs; skipping tick");
                return;
            }
        };

        let local = now.with_timezone(&self.tz);
        for job in &jobs {
            let schedule = match Schedule::parse(&job.cron_expression) {
                Ok(s) => s,
                Err(e) => {
                    warn!(
                        job_id = job.id,
                        job_name = %job.job_name,
                        error = %e,
                        "Unparsable cron expression; skipping job for this tick"
                    );
                    continue;
                }
            };
            if schedule.matches(&local) {
                info!(job_name = %job.job_name, "📅 Cron matched! Triggering job");
                self.runner.run(job).await;
            }
        }
    }
}

/// Delay from `now` to the next minute boundary.
fn next_minute_delay(now: DateTime<Utc>) -> Duration {
    let past_ms = u64::from(now.timestamp_subsec_millis()) + 1000 * u64::from(chrono::Timelike::second(&now));
    Duration::from_millis((60_000 - past_ms % 60_000) % 60_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn minute_alignment_delay() {
        let at = Utc.with_ymd_and_hms(2025, 9, 26, 10, 0, 45).unwrap();
        assert_eq!(next_minute_delay(at), Duration::from_secs(15));
        let on_boundary = Utc.with_ymd_and_hms(2025, 9, 26, 10, 1, 0).unwrap();
        assert_eq!(next_minute_delay(on_boundary), Duration::from_secs(0));
    }
}
