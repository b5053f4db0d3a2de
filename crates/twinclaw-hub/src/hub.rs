//! Central fan-out point for events published onto any [`Topic`] (C11).

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use twinclaw_common::{now_iso, EventEnvelope, Topic};

const ENVELOPE_VERSION: u8 = 1;

pub struct Hub {
    auth_token: String,
    tx: broadcast::Sender<EventEnvelope>,
    seqs: DashMap<Topic, AtomicU64>,
}

impl Hub {
    /// `capacity` bounds how many unconsumed events the broadcast channel
    /// holds before a lagging subscriber starts missing them; sized from
    /// `HubConfig::max_client_queue_kb` by the caller.
    pub fn new(auth_token: String, capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(16));
        Self {
            auth_token,
            tx,
            seqs: DashMap::new(),
        }
    }

    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Publish an event on `topic`, assigning it the next per-topic
    /// sequence number. A publish with no connected subscribers is not an
    /// error; the event is simply dropped.
    pub fn publish(&self, topic: Topic, payload: serde_json::Value) -> u64 {
        let seq = self
            .seqs
            .entry(topic)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::SeqCst)
            + 1;

        let envelope = EventEnvelope {
            v: ENVELOPE_VERSION,
            topic,
            seq,
            ts: now_iso(),
            payload,
        };
        let _ = self.tx.send(envelope);
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sequence_numbers_increment_per_topic_independently() {
        let hub = Hub::new("secret".to_string(), 16);
        assert_eq!(hub.publish(Topic::Health, json!({})), 1);
        assert_eq!(hub.publish(Topic::Health, json!({})), 2);
        assert_eq!(hub.publish(Topic::Reliability, json!({})), 1);
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let hub = Hub::new("secret".to_string(), 16);
        let mut rx = hub.subscribe();
        hub.publish(Topic::Routing, json!({"n": 1}));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, Topic::Routing);
        assert_eq!(event.payload, json!({"n": 1}));
    }
}
