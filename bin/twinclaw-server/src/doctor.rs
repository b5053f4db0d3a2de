//! Readiness aggregator (C13, spec §4.8): rolls up delivery-queue health
//! and scheduler liveness into one verdict served at `/health/ready` and
//! broadcast periodically onto the `health`/`reliability` topics.

use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use twinclaw_delivery::DeliveryProcessor;
use twinclaw_hub::PeriodicSource;
use twinclaw_hub::SnapshotProvider;
use twinclaw_store::delivery::DeliveryStats;

/// Above this dead-letter ratio (of terminal outcomes) delivery is
/// reported degraded, though readiness itself is not tied to it — a
/// backlog of dead letters needs an operator, not a restart.
const DEAD_LETTER_WARNING_RATIO: f64 = 0.10;

/// A scheduler tick older than this is reported not-ready: the tick loop
/// is presumed wedged or the process is starved.
const SCHEDULER_STALE_SECS: i64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub delivery: DeliveryStats,
    pub scheduler_last_tick_age_secs: i64,
    pub issues: Vec<String>,
}

impl Default for HealthReport {
    fn default() -> Self {
        Self {
            status: HealthStatus::Healthy,
            delivery: DeliveryStats::default(),
            scheduler_last_tick_age_secs: 0,
            issues: Vec::new(),
        }
    }
}

pub struct Doctor {
    delivery: Arc<DeliveryProcessor>,
    last_scheduler_tick: AtomicI64,
    cached: RwLock<HealthReport>,
}

impl Doctor {
    pub fn new(delivery: Arc<DeliveryProcessor>) -> Arc<Self> {
        Arc::new(Self {
            delivery,
            last_scheduler_tick: AtomicI64::new(chrono::Utc::now().timestamp()),
            cached: RwLock::new(HealthReport::default()),
        })
    }

    /// Called whenever any scheduled job fires, so the scheduler's own
    /// liveness is visible without depending on a job that is itself
    /// unhealthy.
    pub fn record_scheduler_tick(&self) {
        self.last_scheduler_tick.store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
    }

    async fn compute(&self) -> HealthReport {
        let mut issues = Vec::new();
        let delivery = self.delivery.stats().await.unwrap_or_default();

        let terminal = delivery.sent + delivery.failed + delivery.dead_letter;
        let mut status = HealthStatus::Healthy;
        if terminal > 0 {
            let ratio = delivery.dead_letter as f64 / terminal as f64;
            if ratio > DEAD_LETTER_WARNING_RATIO {
                status = HealthStatus::Warning;
                issues.push(format!("dead-letter ratio {:.0}% exceeds warning threshold", ratio * 100.0));
            }
        }

        let age = chrono::Utc::now().timestamp() - self.last_scheduler_tick.load(Ordering::Relaxed);
        if age > SCHEDULER_STALE_SECS {
            status = HealthStatus::Degraded;
            issues.push(format!("scheduler has not ticked in {age}s"));
        }

        HealthReport {
            status,
            delivery,
            scheduler_last_tick_age_secs: age,
            issues,
        }
    }

    pub async fn refresh(&self) {
        let report = self.compute().await;
        *self.cached.write().unwrap() = report;
    }

    pub fn snapshot(&self) -> HealthReport {
        self.cached.read().unwrap().clone()
    }

    pub fn is_ready(&self) -> bool {
        !matches!(self.snapshot().status, HealthStatus::Degraded)
    }

    /// Keep the cached snapshot warm so `/health/ready` and the periodic
    /// sources never block a caller on a store round-trip.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.refresh().await;
            }
        })
    }
}

pub struct HealthSource(pub Arc<Doctor>);

impl PeriodicSource for HealthSource {
    fn topic(&self) -> twinclaw_common::Topic {
        twinclaw_common::Topic::Health
    }

    fn sample(&self) -> serde_json::Value {
        serde_json::to_value(self.0.snapshot()).unwrap_or_else(|_| serde_json::json!({}))
    }
}

pub struct ReliabilitySource(pub Arc<Doctor>);

impl PeriodicSource for ReliabilitySource {
    fn topic(&self) -> twinclaw_common::Topic {
        twinclaw_common::Topic::Reliability
    }

    fn sample(&self) -> serde_json::Value {
        serde_json::to_value(self.0.snapshot().delivery).unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// Snapshot provider backed by the same cached report the periodic
/// sources sample from, so a client that subscribes between ticks sees
/// the same numbers the next broadcast will carry.
pub struct DoctorSnapshots {
    pub doctor: Arc<Doctor>,
}

impl SnapshotProvider for DoctorSnapshots {
    fn snapshot(&self, topic: twinclaw_common::Topic) -> serde_json::Value {
        match topic {
            twinclaw_common::Topic::Health => {
                serde_json::to_value(self.doctor.snapshot()).unwrap_or_else(|_| serde_json::json!({}))
            }
            twinclaw_common::Topic::Reliability => {
                serde_json::to_value(self.doctor.snapshot().delivery).unwrap_or_else(|_| serde_json::json!({}))
            }
            twinclaw_common::Topic::Incidents | twinclaw_common::Topic::Routing => serde_json::json!({}),
        }
    }
}
