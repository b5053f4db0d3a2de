//! Cron-driven job scheduler (C2, spec §4).
//!
//! Each registered job carries its own cron expression; a single ticking
//! task checks every job on every tick and fires any whose next scheduled
//! time has arrived. Firing is fire-and-forget from the loop's
//! perspective: the handler runs on its own spawned task so one slow job
//! never delays the next tick's check of every other job.

mod error;

pub use error::{SchedulerError, SchedulerResult};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// The unit of work a scheduled job performs. Implemented by whatever the
/// binary wires up (pairing sweeps, delivery recovery sweeps, and so on);
/// the scheduler has no opinion on what a job does.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

/// Receives `job:start` / `job:done` / `job:error` notifications. Usually
/// backed by the event hub, kept as a trait here so this crate doesn't
/// depend on it directly.
pub trait JobEventSink: Send + Sync {
    fn emit(&self, event_type: &str, job_id: &str, detail: serde_json::Value);
}

pub struct NoopSink;

impl JobEventSink for NoopSink {
    fn emit(&self, _event_type: &str, _job_id: &str, _detail: serde_json::Value) {}
}

struct RegisteredJob {
    id: String,
    schedule: Schedule,
    handler: Arc<dyn JobHandler>,
    last_fired: Option<DateTime<Utc>>,
}

pub struct Scheduler {
    jobs: Vec<RegisteredJob>,
    sink: Arc<dyn JobEventSink>,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(sink: Arc<dyn JobEventSink>, tick_interval: Duration) -> Self {
        Self {
            jobs: Vec::new(),
            sink,
            tick_interval,
        }
    }

    /// Register a job under `id` with a standard five-field cron
    /// expression evaluated in UTC. Rejects a duplicate id or an
    /// unparseable expression before the job ever gets a chance to run.
    pub fn register(
        &mut self,
        id: &str,
        cron_expression: &str,
        handler: Arc<dyn JobHandler>,
    ) -> SchedulerResult<()> {
        if self.jobs.iter().any(|j| j.id == id) {
            return Err(SchedulerError::DuplicateJob(id.to_string()));
        }

        let schedule = Schedule::from_str(cron_expression)
            .map_err(|e| SchedulerError::InvalidCronExpression(cron_expression.to_string(), e.to_string()))?;

        self.jobs.push(RegisteredJob {
            id: id.to_string(),
            schedule,
            handler,
            last_fired: None,
        });
        Ok(())
    }

    /// Check every registered job once, firing any whose next scheduled
    /// time has already passed. Exposed separately from [`Self::spawn`]
    /// so tests can drive it deterministically instead of waiting on a
    /// real ticker.
    pub async fn tick_once(&mut self) {
        let now = Utc::now();
        for job in &mut self.jobs {
            let after = job.last_fired.unwrap_or_else(|| now - chrono::Duration::days(1));
            let Some(next) = job.schedule.after(&after).next() else {
                continue;
            };
            if next > now {
                continue;
            }
            job.last_fired = Some(now);

            let id = job.id.clone();
            let handler = job.handler.clone();
            let sink = self.sink.clone();

            sink.emit("job:start", &id, serde_json::json!({}));
            metrics::counter!("twinclaw_scheduler_job_started_total").increment(1);

            tokio::spawn(async move {
                match handler.run().await {
                    Ok(()) => {
                        info!(job_id = %id, "scheduled job completed");
                        sink.emit("job:done", &id, serde_json::json!({}));
                        metrics::counter!("twinclaw_scheduler_job_done_total").increment(1);
                    }
                    Err(e) => {
                        warn!(job_id = %id, error = %e, "scheduled job failed");
                        sink.emit("job:error", &id, serde_json::json!({"error": e.to_string()}));
                        metrics::counter!("twinclaw_scheduler_job_error_total").increment(1);
                    }
                }
            });
        }
    }

    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.tick_once().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct CountingHandler {
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn run(&self) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("scripted failure");
            }
            Ok(())
        }
    }

    struct RecordingSink {
        events: Mutex<Vec<(String, String)>>,
    }

    impl JobEventSink for RecordingSink {
        fn emit(&self, event_type: &str, job_id: &str, _detail: serde_json::Value) {
            self.events.lock().unwrap().push((event_type.to_string(), job_id.to_string()));
        }
    }

    #[test]
    fn registering_the_same_id_twice_is_rejected() {
        let mut scheduler = Scheduler::new(Arc::new(NoopSink), Duration::from_secs(1));
        let handler = Arc::new(CountingHandler {
            calls: Arc::new(AtomicU32::new(0)),
            fail: false,
        });
        scheduler.register("sweep", "* * * * * *", handler.clone()).unwrap();
        let result = scheduler.register("sweep", "* * * * * *", handler);
        assert!(matches!(result, Err(SchedulerError::DuplicateJob(_))));
    }

    #[test]
    fn an_invalid_cron_expression_is_rejected_at_registration() {
        let mut scheduler = Scheduler::new(Arc::new(NoopSink), Duration::from_secs(1));
        let handler = Arc::new(CountingHandler {
            calls: Arc::new(AtomicU32::new(0)),
            fail: false,
        });
        let result = scheduler.register("bad", "not a cron expression", handler);
        assert!(matches!(result, Err(SchedulerError::InvalidCronExpression(_, _))));
    }

    #[tokio::test]
    async fn due_job_fires_and_emits_start_then_done() {
        let sink = Arc::new(RecordingSink { events: Mutex::new(vec![]) });
        let mut scheduler = Scheduler::new(sink.clone(), Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));
        let handler = Arc::new(CountingHandler { calls: calls.clone(), fail: false });

        scheduler.register("every-second", "* * * * * *", handler).unwrap();
        scheduler.tick_once().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let events = sink.events.lock().unwrap();
        assert!(events.iter().any(|(t, _)| t == "job:start"));
        assert!(events.iter().any(|(t, _)| t == "job:done"));
    }

    #[tokio::test]
    async fn failing_job_emits_job_error() {
        let sink = Arc::new(RecordingSink { events: Mutex::new(vec![]) });
        let mut scheduler = Scheduler::new(sink.clone(), Duration::from_secs(1));
        let handler = Arc::new(CountingHandler { calls: Arc::new(AtomicU32::new(0)), fail: true });

        scheduler.register("flaky", "* * * * * *", handler).unwrap();
        scheduler.tick_once().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let events = sink.events.lock().unwrap();
        assert!(events.iter().any(|(t, _)| t == "job:error"));
    }
}
