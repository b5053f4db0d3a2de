//! Webhook callback receipts (C9, spec §3/§4.5).
//!
//! Idempotency is enforced at the database layer: `idempotency_key` carries
//! a unique index so a duplicate delivery of the same webhook event is
//! detected by constraint violation rather than a read-then-write race.

use crate::error::{StoreError, StoreResult};
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    Accepted,
    Duplicate,
    Rejected,
}

impl CallbackOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            CallbackOutcome::Accepted => "accepted",
            CallbackOutcome::Duplicate => "duplicate",
            CallbackOutcome::Rejected => "rejected",
        }
    }

    pub fn status_code(self) -> i64 {
        match self {
            CallbackOutcome::Accepted => 202,
            CallbackOutcome::Duplicate => 200,
            CallbackOutcome::Rejected => 500,
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "duplicate" => CallbackOutcome::Duplicate,
            "rejected" => CallbackOutcome::Rejected,
            _ => CallbackOutcome::Accepted,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallbackReceipt {
    pub id: String,
    pub idempotency_key: String,
    pub task_id: String,
    pub event_type: String,
    pub status: String,
    pub payload: Value,
    pub outcome: CallbackOutcome,
    pub status_code: i64,
    pub received_at: i64,
}

pub fn idempotency_key(task_id: &str, event_type: &str, status: &str) -> String {
    format!("{task_id}:{event_type}:{status}")
}

pub async fn init_schema(pool: &SqlitePool) -> StoreResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS callback_receipts (
            id TEXT PRIMARY KEY,
            idempotency_key TEXT NOT NULL,
            task_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            status TEXT NOT NULL,
            payload TEXT NOT NULL,
            outcome TEXT NOT NULL DEFAULT 'accepted',
            status_code INTEGER NOT NULL DEFAULT 202,
            received_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_callback_idempotency ON callback_receipts (idempotency_key)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_callback_task ON callback_receipts (task_id)")
        .execute(pool)
        .await?;

    Ok(())
}

#[derive(Clone)]
pub struct CallbackRepository {
    pool: SqlitePool,
}

impl CallbackRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Look up an existing receipt by idempotency key, if a delivery with
    /// this exact `(task_id, event_type, status)` triple was already seen.
    pub async fn find_by_key(&self, key: &str) -> StoreResult<Option<CallbackReceipt>> {
        let row = sqlx::query("SELECT * FROM callback_receipts WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_receipt).transpose()
    }

    /// Record a webhook receipt with `outcome=accepted`. Returns `Ok(None)`
    /// if this exact event was already recorded (duplicate delivery),
    /// rather than erroring — the caller still owes the webhook sender a
    /// 200 with `outcome=duplicate`.
    pub async fn record(
        &self,
        task_id: &str,
        event_type: &str,
        status: &str,
        payload: Value,
    ) -> StoreResult<Option<CallbackReceipt>> {
        let key = idempotency_key(task_id, event_type, status);
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();
        let payload_text = serde_json::to_string(&payload)?;
        let outcome = CallbackOutcome::Accepted;

        let result = sqlx::query(
            r#"
            INSERT INTO callback_receipts
                (id, idempotency_key, task_id, event_type, status, payload, outcome, status_code, received_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&key)
        .bind(task_id)
        .bind(event_type)
        .bind(status)
        .bind(&payload_text)
        .bind(outcome.as_str())
        .bind(outcome.status_code())
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(Some(CallbackReceipt {
                id,
                idempotency_key: key,
                task_id: task_id.to_string(),
                event_type: event_type.to_string(),
                status: status.to_string(),
                payload,
                outcome,
                status_code: outcome.status_code(),
                received_at: now,
            })),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Flip an already-recorded receipt to `outcome=rejected` after
    /// downstream processing (reconciliation, gateway handoff) fails.
    /// The idempotency key stays put; only the outcome is corrected.
    pub async fn mark_rejected(&self, id: &str) -> StoreResult<()> {
        sqlx::query("UPDATE callback_receipts SET outcome = ?, status_code = ? WHERE id = ?")
            .bind(CallbackOutcome::Rejected.as_str())
            .bind(CallbackOutcome::Rejected.status_code())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn total_count(&self) -> StoreResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM callback_receipts")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    pub async fn by_task(&self, task_id: &str) -> StoreResult<Vec<CallbackReceipt>> {
        let rows = sqlx::query(
            "SELECT * FROM callback_receipts WHERE task_id = ? ORDER BY received_at ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_receipt).collect()
    }
}

fn row_to_receipt(row: SqliteRow) -> StoreResult<CallbackReceipt> {
    let payload_text: String = row.get("payload");
    let outcome_text: String = row.get("outcome");
    Ok(CallbackReceipt {
        id: row.get("id"),
        idempotency_key: row.get("idempotency_key"),
        task_id: row.get("task_id"),
        event_type: row.get("event_type"),
        status: row.get("status"),
        payload: serde_json::from_str(&payload_text)?,
        outcome: CallbackOutcome::from_str(&outcome_text),
        status_code: row.get("status_code"),
        received_at: row.get("received_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn repo() -> CallbackRepository {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_schema(&pool).await.unwrap();
        CallbackRepository::new(pool)
    }

    #[tokio::test]
    async fn duplicate_webhook_delivery_is_absorbed_not_errored() {
        let repo = repo().await;
        let first = repo
            .record("task-1", "done", "success", json!({"n": 1}))
            .await
            .unwrap();
        assert!(first.is_some());

        let second = repo
            .record("task-1", "done", "success", json!({"n": 1}))
            .await
            .unwrap();
        assert!(second.is_none());

        let receipts = repo.by_task("task-1").await.unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].outcome, CallbackOutcome::Accepted);
        assert_eq!(receipts[0].status_code, 202);
    }

    #[tokio::test]
    async fn find_by_key_locates_an_existing_receipt() {
        let repo = repo().await;
        repo.record("task-3", "done", "success", json!({}))
            .await
            .unwrap();

        let key = idempotency_key("task-3", "done", "success");
        let found = repo.find_by_key(&key).await.unwrap();
        assert!(found.is_some());
        assert!(repo.find_by_key("task-3:done:missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_rejected_flips_outcome_and_status_code() {
        let repo = repo().await;
        let receipt = repo
            .record("task-4", "done", "success", json!({}))
            .await
            .unwrap()
            .unwrap();

        repo.mark_rejected(&receipt.id).await.unwrap();

        let reloaded = repo.find_by_key(&receipt.idempotency_key).await.unwrap().unwrap();
        assert_eq!(reloaded.outcome, CallbackOutcome::Rejected);
        assert_eq!(reloaded.status_code, 500);
    }

    #[tokio::test]
    async fn distinct_status_for_same_task_is_a_new_receipt() {
        let repo = repo().await;
        repo.record("task-2", "done", "success", json!({}))
            .await
            .unwrap();
        repo.record("task-2", "done", "failed", json!({}))
            .await
            .unwrap();

        let receipts = repo.by_task("task-2").await.unwrap();
        assert_eq!(receipts.len(), 2);
    }
}
