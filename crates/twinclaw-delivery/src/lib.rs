//! Persistent, per-chat-serialized delivery queue (C7, spec §4.3).
//!
//! Mirrors the durable-outbox shape: every outbound chunk lands in SQLite
//! before anything is attempted, a ticking processor claims due records
//! and hands them to a [`Sender`], and a crash-recovery pass on startup
//! resets anything left mid-flight from an unclean shutdown.

mod error;

pub use error::{DeliveryError, DeliveryResult};

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use twinclaw_common::Platform;
use twinclaw_store::delivery::DeliveryStats;
use twinclaw_store::Store;

/// Sends one chunk of text to a chat on the target platform. Implemented
/// by the gateway adapter; kept as a trait so the processor never depends
/// on Telegram/WhatsApp client details.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, platform: Platform, chat_id: &str, body: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct DeliveryTuning {
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub tick_interval_ms: u64,
    pub min_send_interval_ms: u64,
}

impl Default for DeliveryTuning {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            backoff_factor: 2.0,
            max_delay_ms: 15_000,
            max_attempts: 3,
            tick_interval_ms: 500,
            min_send_interval_ms: 1_500,
        }
    }
}

fn backoff_delay_ms(tuning: &DeliveryTuning, attempt: u32) -> i64 {
    let scaled = tuning.base_delay_ms as f64 * tuning.backoff_factor.powi(attempt as i32);
    scaled.min(tuning.max_delay_ms as f64) as i64
}

pub struct DeliveryProcessor {
    store: Store,
    sender: Arc<dyn Sender>,
    tuning: DeliveryTuning,
    /// Last successful send per `(platform, chat_id)`, enforcing
    /// `min_send_interval_ms` so a burst of queued chunks doesn't read as
    /// spam to the platform or the recipient.
    last_sent: DashMap<String, Instant>,
}

impl DeliveryProcessor {
    pub fn new(store: Store, sender: Arc<dyn Sender>, tuning: DeliveryTuning) -> Arc<Self> {
        Arc::new(Self {
            store,
            sender,
            tuning,
            last_sent: DashMap::new(),
        })
    }

    pub async fn enqueue(
        &self,
        platform: Platform,
        chat_id: &str,
        body: &str,
        correlation_task_id: Option<&str>,
    ) -> DeliveryResult<String> {
        Ok(self
            .store
            .delivery()
            .enqueue(platform, chat_id, body, correlation_task_id)
            .await?)
    }

    pub async fn requeue_dead_letter(&self, id: &str) -> DeliveryResult<()> {
        self.store.delivery().requeue_dead_letter(id).await?;
        Ok(())
    }

    pub async fn stats(&self) -> DeliveryResult<DeliveryStats> {
        Ok(self.store.delivery().stats().await?)
    }

    fn chat_key(platform: Platform, chat_id: &str) -> String {
        format!("{platform}:{chat_id}")
    }

    fn due_for_send(&self, platform: Platform, chat_id: &str) -> bool {
        let key = Self::chat_key(platform, chat_id);
        match self.last_sent.get(&key) {
            Some(last) => last.elapsed() >= Duration::from_millis(self.tuning.min_send_interval_ms),
            None => true,
        }
    }

    fn record_sent(&self, platform: Platform, chat_id: &str) {
        self.last_sent
            .insert(Self::chat_key(platform, chat_id), Instant::now());
    }

    /// Run crash recovery once, then start the ticking processor loop.
    /// Spawns its own task and returns the handle; the caller keeps it
    /// alive for the life of the process.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            match self
                .store
                .delivery()
                .recover_stuck_sending(self.tuning.max_attempts, self.tuning.base_delay_ms as i64)
                .await
            {
                Ok(0) => {}
                Ok(n) => warn!(recovered = n, "reset delivery records stuck in 'sending' on startup"),
                Err(e) => error!(error = %e, "delivery crash recovery failed"),
            }

            let mut ticker = tokio::time::interval(Duration::from_millis(self.tuning.tick_interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if let Err(e) = self.process_due().await {
                    error!(error = %e, "delivery tick failed");
                }
            }
        })
    }

    async fn process_due(&self) -> DeliveryResult<()> {
        let due = self.store.delivery().fetch_due(32).await?;

        for record in due {
            if !self.due_for_send(record.platform, &record.chat_id) {
                continue;
            }

            if !self.store.delivery().try_mark_sending(&record.id).await? {
                // another tick (or a concurrent worker) already claimed it
                continue;
            }

            match self
                .sender
                .send(record.platform, &record.chat_id, &record.body)
                .await
            {
                Ok(()) => {
                    self.store.delivery().mark_sent(&record.id).await?;
                    self.record_sent(record.platform, &record.chat_id);
                    metrics::counter!("twinclaw_delivery_sent_total").increment(1);
                    debug!(id = %record.id, "delivered chunk");
                }
                Err(e) => {
                    let next_attempt_at =
                        chrono::Utc::now().timestamp_millis() + backoff_delay_ms(&self.tuning, record.attempt_count);
                    let new_state = self
                        .store
                        .delivery()
                        .mark_failed_attempt(
                            &record.id,
                            &e.to_string(),
                            self.tuning.max_attempts,
                            next_attempt_at,
                        )
                        .await?;
                    metrics::counter!("twinclaw_delivery_failed_total").increment(1);
                    warn!(id = %record.id, state = ?new_state, error = %e, "delivery attempt failed");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct FlakySender {
        fail_first_n: u32,
        attempts: AtomicU32,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Sender for FlakySender {
        async fn send(&self, _platform: Platform, chat_id: &str, body: &str) -> anyhow::Result<()> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                anyhow::bail!("simulated transient failure");
            }
            self.sent.lock().unwrap().push(format!("{chat_id}:{body}"));
            Ok(())
        }
    }

    async fn store() -> Store {
        let store = Store::connect_memory().await.unwrap();
        store.init_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn successful_send_marks_record_sent() {
        let sender = Arc::new(FlakySender {
            fail_first_n: 0,
            attempts: AtomicU32::new(0),
            sent: Mutex::new(vec![]),
        });
        let processor = DeliveryProcessor::new(
            store().await,
            sender.clone(),
            DeliveryTuning {
                min_send_interval_ms: 0,
                ..Default::default()
            },
        );

        let id = processor
            .enqueue(Platform::Telegram, "c1", "hi", None)
            .await
            .unwrap();
        processor.process_due().await.unwrap();

        let stats = processor.stats().await.unwrap();
        assert_eq!(stats.sent, 1);
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
        assert_eq!(processor.store.delivery().get(&id).await.unwrap().unwrap().state, twinclaw_store::delivery::DeliveryState::Sent);
    }

    #[tokio::test]
    async fn retries_then_recovers_before_exhausting_attempts() {
        let sender = Arc::new(FlakySender {
            fail_first_n: 1,
            attempts: AtomicU32::new(0),
            sent: Mutex::new(vec![]),
        });
        let processor = DeliveryProcessor::new(
            store().await,
            sender.clone(),
            DeliveryTuning {
                min_send_interval_ms: 0,
                base_delay_ms: 0,
                ..Default::default()
            },
        );

        processor
            .enqueue(Platform::Telegram, "c2", "hi", None)
            .await
            .unwrap();

        processor.process_due().await.unwrap();
        let stats = processor.stats().await.unwrap();
        assert_eq!(stats.retrying, 1);

        processor.process_due().await.unwrap();
        let stats = processor.stats().await.unwrap();
        assert_eq!(stats.sent, 1);
    }

    #[tokio::test]
    async fn exhausting_attempts_lands_in_dead_letter_and_can_be_requeued() {
        let sender = Arc::new(FlakySender {
            fail_first_n: 100,
            attempts: AtomicU32::new(0),
            sent: Mutex::new(vec![]),
        });
        let processor = DeliveryProcessor::new(
            store().await,
            sender,
            DeliveryTuning {
                min_send_interval_ms: 0,
                base_delay_ms: 0,
                max_attempts: 2,
                ..Default::default()
            },
        );

        let id = processor
            .enqueue(Platform::Telegram, "c3", "hi", None)
            .await
            .unwrap();

        processor.process_due().await.unwrap();
        processor.process_due().await.unwrap();

        let stats = processor.stats().await.unwrap();
        assert_eq!(stats.dead_letter, 1);

        processor.requeue_dead_letter(&id).await.unwrap();
        let stats = processor.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
    }
}
