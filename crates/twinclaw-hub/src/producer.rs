//! Periodic event producer (C12, spec §4.7): samples each registered
//! source on a fixed tick and publishes the result onto its topic, so a
//! subscribed client sees steady updates even when nothing noteworthy
//! happened.

use std::time::Duration;
use tokio::task::JoinHandle;
use twinclaw_common::Topic;

use crate::hub::Hub;

pub trait PeriodicSource: Send + Sync {
    fn topic(&self) -> Topic;
    fn sample(&self) -> serde_json::Value;
}

pub struct Producer {
    hub: std::sync::Arc<Hub>,
    sources: Vec<Box<dyn PeriodicSource>>,
    tick_interval: Duration,
}

impl Producer {
    pub fn new(hub: std::sync::Arc<Hub>, sources: Vec<Box<dyn PeriodicSource>>, tick_interval: Duration) -> Self {
        Self {
            hub,
            sources,
            tick_interval,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                for source in &self.sources {
                    self.hub.publish(source.topic(), source.sample());
                }
            }
        })
    }
}
