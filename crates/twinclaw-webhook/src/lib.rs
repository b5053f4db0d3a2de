//! Inbound orchestration webhook handling (C9, spec §3/§4.5).

mod error;
mod sanitize;

pub use error::{WebhookError, WebhookResult};

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};
use twinclaw_store::callback::{idempotency_key, CallbackOutcome, CallbackReceipt};
use twinclaw_store::Store;

/// Hands a webhook's summarized outcome to the agent gateway as a new
/// turn in the session that originally delegated the task. Implemented
/// by the binary; out of scope for this crate.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn process_text(&self, session_id: &str, text: &str) -> anyhow::Result<()>;
}

/// Builds the `system`-tagged summary handed to the gateway for an
/// accepted webhook receipt.
fn summarize(event_type: &str, task_id: &str, status: &str, result: Option<&Value>, error: Option<&Value>) -> String {
    let detail = result
        .or(error)
        .map(|v| v.to_string())
        .unwrap_or_default();

    if detail.is_empty() {
        format!("[system] task {task_id} ({event_type}) reported status={status}")
    } else {
        format!("[system] task {task_id} ({event_type}) reported status={status}: {detail}")
    }
}

pub struct WebhookService {
    store: Store,
    gateway: Arc<dyn Gateway>,
}

impl WebhookService {
    pub fn new(store: Store, gateway: Arc<dyn Gateway>) -> Self {
        Self { store, gateway }
    }

    /// Record a webhook delivery and, if this is the first time this exact
    /// `(task_id, event_type, status)` triple has been seen, reconcile the
    /// matching `DeliveryRecord` against the outcome. Looks up any existing
    /// receipt by idempotency key first: if one exists, responds with
    /// `outcome=duplicate` and does nothing else. If processing fails after
    /// the receipt was accepted, the stored receipt is flipped to
    /// `outcome=rejected` and the caller is owed a 500.
    pub async fn handle(
        &self,
        task_id: &str,
        event_type: &str,
        status: &str,
        result: Option<Value>,
        error: Option<Value>,
    ) -> WebhookResult<CallbackReceipt> {
        let key = idempotency_key(task_id, event_type, status);
        if let Some(existing) = self.store.callback().find_by_key(&key).await? {
            info!(task_id, event_type, status, "duplicate webhook delivery ignored");
            return Ok(CallbackReceipt {
                outcome: CallbackOutcome::Duplicate,
                status_code: CallbackOutcome::Duplicate.status_code(),
                ..existing
            });
        }

        let mut fields = Map::new();
        if let Some(r) = &result {
            fields.insert("result".to_string(), sanitize::sanitize(r));
        }
        if let Some(e) = &error {
            fields.insert("error".to_string(), sanitize::sanitize(e));
        }
        let sanitized = Value::Object(fields);

        let receipt = self
            .store
            .callback()
            .record(task_id, event_type, status, sanitized)
            .await?;

        let Some(receipt) = receipt else {
            // lost a race with another delivery of the same event
            let existing = self.store.callback().find_by_key(&key).await?;
            let existing = existing.ok_or_else(|| {
                WebhookError::Processing(format!("receipt for {key} vanished after insert race"))
            })?;
            return Ok(CallbackReceipt {
                outcome: CallbackOutcome::Duplicate,
                status_code: CallbackOutcome::Duplicate.status_code(),
                ..existing
            });
        };

        if let Err(e) = self.reconcile_and_notify(task_id, event_type, status, &result, &error).await {
            warn!(task_id, error = %e, "webhook processing failed after accept, marking rejected");
            self.store.callback().mark_rejected(&receipt.id).await?;
            return Err(WebhookError::Processing(e.to_string()));
        }

        Ok(receipt)
    }

    async fn reconcile_and_notify(
        &self,
        task_id: &str,
        event_type: &str,
        status: &str,
        result: &Option<Value>,
        error: &Option<Value>,
    ) -> WebhookResult<()> {
        match status {
            "completed" => {
                let reconciled = self.store.delivery().reconcile_by_task(task_id, true).await?;
                if reconciled {
                    info!(task_id, "reconciled delivery record as sent");
                }
            }
            "failed" => {
                let reconciled = self.store.delivery().reconcile_by_task(task_id, false).await?;
                if reconciled {
                    warn!(task_id, "reconciled delivery record as failed");
                }
            }
            other => {
                info!(task_id, status = other, "non-terminal webhook event recorded");
            }
        }

        let summary = summarize(event_type, task_id, status, result.as_ref(), error.as_ref());
        let gateway = self.gateway.clone();
        let session_id = format!("webhook:{task_id}");
        tokio::spawn(async move {
            if let Err(e) = gateway.process_text(&session_id, &summary).await {
                warn!(error = %e, session_id, "gateway rejected webhook summary");
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use twinclaw_common::Platform;

    struct RecordingGateway {
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Gateway for RecordingGateway {
        async fn process_text(&self, session_id: &str, text: &str) -> anyhow::Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((session_id.to_string(), text.to_string()));
            Ok(())
        }
    }

    async fn service_with_pending_delivery() -> (WebhookService, Arc<RecordingGateway>, String) {
        let store = Store::connect_memory().await.unwrap();
        store.init_schema().await.unwrap();
        let id = store
            .delivery()
            .enqueue(Platform::Telegram, "c1", "hi", Some("task-1"))
            .await
            .unwrap();
        store.delivery().try_mark_sending(&id).await.unwrap();
        let gateway = Arc::new(RecordingGateway { calls: Mutex::new(vec![]) });
        (WebhookService::new(store, gateway.clone()), gateway, id)
    }

    #[tokio::test]
    async fn success_webhook_reconciles_delivery_as_sent() {
        let (svc, _gateway, id) = service_with_pending_delivery().await;
        let receipt = svc
            .handle("task-1", "done", "completed", Some(json!({"ok": true})), None)
            .await
            .unwrap();
        assert_eq!(receipt.outcome, CallbackOutcome::Accepted);

        let record = svc.store.delivery().get(&id).await.unwrap().unwrap();
        assert_eq!(record.state, twinclaw_store::delivery::DeliveryState::Sent);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_not_reprocessed() {
        let (svc, _gateway, _) = service_with_pending_delivery().await;
        svc.handle("task-1", "done", "completed", None, None)
            .await
            .unwrap();
        let second = svc
            .handle("task-1", "done", "completed", None, None)
            .await
            .unwrap();
        assert_eq!(second.outcome, CallbackOutcome::Duplicate);
        assert_eq!(second.status_code, 200);
    }

    #[tokio::test]
    async fn failure_webhook_reconciles_delivery_as_failed() {
        let (svc, _gateway, id) = service_with_pending_delivery().await;
        svc.handle("task-1", "done", "failed", None, Some(json!({"reason": "timeout"})))
            .await
            .unwrap();

        let record = svc.store.delivery().get(&id).await.unwrap().unwrap();
        assert_eq!(record.state, twinclaw_store::delivery::DeliveryState::Failed);
    }

    #[tokio::test]
    async fn accepted_receipt_forwards_a_system_summary_to_the_gateway() {
        let (svc, gateway, _id) = service_with_pending_delivery().await;
        svc.handle("task-1", "scrape.done", "completed", Some(json!("42 rows")), None)
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let calls = gateway.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "webhook:task-1");
        assert!(calls[0].1.contains("scrape.done"));
        assert!(calls[0].1.contains("42 rows"));
    }
}
