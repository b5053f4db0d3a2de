//! Durable outbound delivery records (C7 `DeliveryRecord`, spec §3/§4.3).

use crate::error::{StoreError, StoreResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use twinclaw_common::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Sending,
    Retrying,
    Sent,
    Failed,
    DeadLetter,
}

impl DeliveryState {
    fn as_str(self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Sending => "sending",
            DeliveryState::Retrying => "retrying",
            DeliveryState::Sent => "sent",
            DeliveryState::Failed => "failed",
            DeliveryState::DeadLetter => "dead_letter",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "pending" => DeliveryState::Pending,
            "sending" => DeliveryState::Sending,
            "retrying" => DeliveryState::Retrying,
            "sent" => DeliveryState::Sent,
            "failed" => DeliveryState::Failed,
            "dead_letter" => DeliveryState::DeadLetter,
            other => panic!("unknown delivery state in store: {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub id: String,
    pub platform: Platform,
    pub chat_id: String,
    pub body: String,
    pub state: DeliveryState,
    pub attempt_count: u32,
    pub next_attempt_at: i64,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub sent_at: Option<i64>,
    pub correlation_task_id: Option<String>,
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> DeliveryRecord {
    let platform_str: String = row.get("platform");
    DeliveryRecord {
        id: row.get("id"),
        platform: platform_str.parse().unwrap_or(Platform::Telegram),
        chat_id: row.get("chat_id"),
        body: row.get("body"),
        state: DeliveryState::from_str(&row.get::<String, _>("state")),
        attempt_count: row.get::<i64, _>("attempt_count") as u32,
        next_attempt_at: row.get("next_attempt_at"),
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        sent_at: row.get("sent_at"),
        correlation_task_id: row.get("correlation_task_id"),
    }
}

pub async fn init_schema(pool: &SqlitePool) -> StoreResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS delivery_records (
            id TEXT PRIMARY KEY,
            platform TEXT NOT NULL,
            chat_id TEXT NOT NULL,
            body TEXT NOT NULL,
            state TEXT NOT NULL,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            next_attempt_at INTEGER NOT NULL,
            last_error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            sent_at INTEGER,
            correlation_task_id TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_delivery_due ON delivery_records (state, next_attempt_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_delivery_chat ON delivery_records (platform, chat_id, state)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_delivery_task ON delivery_records (correlation_task_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct DeliveryStats {
    pub pending: u64,
    pub sending: u64,
    pub retrying: u64,
    pub sent: u64,
    pub failed: u64,
    pub dead_letter: u64,
}

#[derive(Clone)]
pub struct DeliveryRepository {
    pool: SqlitePool,
}

impl DeliveryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Durably insert a new `pending` record. Synchronous before returning,
    /// as required by `Enqueue`'s contract.
    pub async fn enqueue(
        &self,
        platform: Platform,
        chat_id: &str,
        body: &str,
        correlation_task_id: Option<&str>,
    ) -> StoreResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();

        sqlx::query(
            r#"
            INSERT INTO delivery_records
                (id, platform, chat_id, body, state, attempt_count, next_attempt_at,
                 last_error, created_at, updated_at, sent_at, correlation_task_id)
            VALUES (?, ?, ?, ?, 'pending', 0, ?, NULL, ?, ?, NULL, ?)
            "#,
        )
        .bind(&id)
        .bind(platform.to_string())
        .bind(chat_id)
        .bind(body)
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(correlation_task_id)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn get(&self, id: &str) -> StoreResult<Option<DeliveryRecord>> {
        let row = sqlx::query("SELECT * FROM delivery_records WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_record))
    }

    /// Records due for an attempt (`pending`/`retrying`, `next_attempt_at <=
    /// now`), excluding any `(platform, chat_id)` that already has a
    /// `sending` record in flight — the per-chat serialization invariant.
    pub async fn fetch_due(&self, limit: u32) -> StoreResult<Vec<DeliveryRecord>> {
        let now = Utc::now().timestamp_millis();
        let rows = sqlx::query(
            r#"
            SELECT d.* FROM delivery_records d
            WHERE d.state IN ('pending', 'retrying')
              AND d.next_attempt_at <= ?
              AND NOT EXISTS (
                  SELECT 1 FROM delivery_records s
                  WHERE s.platform = d.platform AND s.chat_id = d.chat_id AND s.state = 'sending'
              )
            ORDER BY d.created_at ASC
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_record).collect())
    }

    /// Transition `pending`/`retrying` -> `sending`. Returns `false` if
    /// another worker already claimed it (CAS on state).
    pub async fn try_mark_sending(&self, id: &str) -> StoreResult<bool> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            r#"
            UPDATE delivery_records
            SET state = 'sending', updated_at = ?
            WHERE id = ? AND state IN ('pending', 'retrying')
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_sent(&self, id: &str) -> StoreResult<()> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            "UPDATE delivery_records SET state = 'sent', sent_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed attempt. If `attempt_count` (post-increment) reaches
    /// `max_attempts`, the record moves to `dead_letter`; otherwise it moves
    /// to `retrying` with `next_attempt_at` set by the caller's backoff
    /// calculation.
    pub async fn mark_failed_attempt(
        &self,
        id: &str,
        error: &str,
        max_attempts: u32,
        next_attempt_at: i64,
    ) -> StoreResult<DeliveryState> {
        let now = Utc::now().timestamp_millis();
        let record = self
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let new_attempt = record.attempt_count + 1;

        let new_state = if new_attempt >= max_attempts {
            DeliveryState::DeadLetter
        } else {
            DeliveryState::Retrying
        };

        sqlx::query(
            r#"
            UPDATE delivery_records
            SET state = ?, attempt_count = ?, last_error = ?, next_attempt_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(new_state.as_str())
        .bind(new_attempt as i64)
        .bind(error)
        .bind(next_attempt_at)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(new_state)
    }

    /// Reset a `dead_letter` record for manual replay.
    pub async fn requeue_dead_letter(&self, id: &str) -> StoreResult<()> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            r#"
            UPDATE delivery_records
            SET state = 'pending', attempt_count = 0, last_error = NULL,
                next_attempt_at = ?, updated_at = ?
            WHERE id = ? AND state = 'dead_letter'
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "no dead_letter record with id {id}"
            )));
        }
        Ok(())
    }

    /// Crash recovery: any record stuck in `sending` is reset to `retrying`
    /// with an incremented attempt count, or to `dead_letter` if that
    /// attempt already exhausts `max_attempts`.
    pub async fn recover_stuck_sending(
        &self,
        max_attempts: u32,
        base_delay_ms: i64,
    ) -> StoreResult<u64> {
        let rows = sqlx::query("SELECT * FROM delivery_records WHERE state = 'sending'")
            .fetch_all(&self.pool)
            .await?;

        let now = Utc::now().timestamp_millis();
        let mut recovered = 0u64;
        for row in &rows {
            let record = row_to_record(row);
            let new_attempt = record.attempt_count + 1;
            let new_state = if new_attempt >= max_attempts {
                DeliveryState::DeadLetter
            } else {
                DeliveryState::Retrying
            };
            sqlx::query(
                r#"
                UPDATE delivery_records
                SET state = ?, attempt_count = ?, next_attempt_at = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(new_state.as_str())
            .bind(new_attempt as i64)
            .bind(now + base_delay_ms)
            .bind(now)
            .bind(&record.id)
            .execute(&self.pool)
            .await?;
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Reconcile a record by its `correlation_task_id` (C9 webhook hook).
    /// Terminal writes are idempotent: reconciling an already-terminal
    /// record is a no-op.
    pub async fn reconcile_by_task(&self, task_id: &str, succeeded: bool) -> StoreResult<bool> {
        let row = sqlx::query(
            "SELECT * FROM delivery_records WHERE correlation_task_id = ? LIMIT 1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(false);
        };
        let record = row_to_record(&row);
        if matches!(
            record.state,
            DeliveryState::Sent | DeliveryState::DeadLetter
        ) {
            return Ok(false);
        }

        let now = Utc::now().timestamp_millis();
        if succeeded {
            sqlx::query(
                "UPDATE delivery_records SET state = 'sent', sent_at = ?, updated_at = ? WHERE id = ?",
            )
            .bind(now)
            .bind(now)
            .bind(&record.id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                "UPDATE delivery_records SET state = 'failed', updated_at = ? WHERE id = ?",
            )
            .bind(now)
            .bind(&record.id)
            .execute(&self.pool)
            .await?;
        }
        Ok(true)
    }

    pub async fn stats(&self) -> StoreResult<DeliveryStats> {
        let rows = sqlx::query("SELECT state, COUNT(*) as n FROM delivery_records GROUP BY state")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = DeliveryStats::default();
        for row in rows {
            let state: String = row.get("state");
            let n: i64 = row.get("n");
            match DeliveryState::from_str(&state) {
                DeliveryState::Pending => stats.pending = n as u64,
                DeliveryState::Sending => stats.sending = n as u64,
                DeliveryState::Retrying => stats.retrying = n as u64,
                DeliveryState::Sent => stats.sent = n as u64,
                DeliveryState::Failed => stats.failed = n as u64,
                DeliveryState::DeadLetter => stats.dead_letter = n as u64,
            }
        }
        Ok(stats)
    }

    /// Bounded ring of the most recently updated records, for the
    /// `/reliability` endpoint.
    pub async fn recent(&self, limit: u32) -> StoreResult<Vec<DeliveryRecord>> {
        let rows = sqlx::query("SELECT * FROM delivery_records ORDER BY updated_at DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_record).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn repo() -> DeliveryRepository {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_schema(&pool).await.unwrap();
        DeliveryRepository::new(pool)
    }

    #[tokio::test]
    async fn enqueue_then_fetch_due_round_trips_body() {
        let repo = repo().await;
        let id = repo
            .enqueue(Platform::Telegram, "c1", "hello", None)
            .await
            .unwrap();
        let record = repo.get(&id).await.unwrap().unwrap();
        assert_eq!(record.body, "hello");
        assert_eq!(record.state, DeliveryState::Pending);

        let due = repo.fetch_due(10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, id);
    }

    #[tokio::test]
    async fn only_one_sending_record_per_chat_is_fetched_due() {
        let repo = repo().await;
        let a = repo
            .enqueue(Platform::Telegram, "c1", "a", None)
            .await
            .unwrap();
        repo.enqueue(Platform::Telegram, "c1", "b", None)
            .await
            .unwrap();

        assert!(repo.try_mark_sending(&a).await.unwrap());

        let due = repo.fetch_due(10).await.unwrap();
        assert!(due.is_empty(), "second record for same chat must wait");
    }

    #[tokio::test]
    async fn exhausting_max_attempts_moves_to_dead_letter() {
        let repo = repo().await;
        let id = repo
            .enqueue(Platform::Whatsapp, "c2", "x", None)
            .await
            .unwrap();
        repo.try_mark_sending(&id).await.unwrap();
        repo.mark_failed_attempt(&id, "boom", 3, 0).await.unwrap();
        repo.try_mark_sending(&id).await.unwrap();
        repo.mark_failed_attempt(&id, "boom", 3, 0).await.unwrap();
        repo.try_mark_sending(&id).await.unwrap();
        let state = repo.mark_failed_attempt(&id, "boom", 3, 0).await.unwrap();

        assert_eq!(state, DeliveryState::DeadLetter);
        let record = repo.get(&id).await.unwrap().unwrap();
        assert_eq!(record.attempt_count, 3);
    }

    #[tokio::test]
    async fn requeue_dead_letter_resets_attempt_count() {
        let repo = repo().await;
        let id = repo
            .enqueue(Platform::Telegram, "c3", "y", None)
            .await
            .unwrap();
        repo.try_mark_sending(&id).await.unwrap();
        repo.mark_failed_attempt(&id, "e", 1, 0).await.unwrap();

        repo.requeue_dead_letter(&id).await.unwrap();
        let record = repo.get(&id).await.unwrap().unwrap();
        assert_eq!(record.state, DeliveryState::Pending);
        assert_eq!(record.attempt_count, 0);
        assert!(record.last_error.is_none());
    }

    #[tokio::test]
    async fn reconcile_by_task_is_idempotent_on_terminal_state() {
        let repo = repo().await;
        let id = repo
            .enqueue(Platform::Telegram, "c4", "z", Some("task-1"))
            .await
            .unwrap();
        repo.try_mark_sending(&id).await.unwrap();

        assert!(repo.reconcile_by_task("task-1", true).await.unwrap());
        let record = repo.get(&id).await.unwrap().unwrap();
        assert_eq!(record.state, DeliveryState::Sent);

        // second reconcile is a no-op, not an error
        assert!(!repo.reconcile_by_task("task-1", false).await.unwrap());
        let record = repo.get(&id).await.unwrap().unwrap();
        assert_eq!(record.state, DeliveryState::Sent);
    }
}
