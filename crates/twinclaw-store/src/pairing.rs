//! Allow-list and pairing-code persistence (C3, spec §3/§4.1).

use crate::error::{StoreError, StoreResult};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use twinclaw_common::Platform;

/// Lifetime of an issued pairing code before it can no longer be approved.
/// Resolved Open Question (spec §9): fixed at 60 minutes rather than made
/// configurable, since the sweep and the UI copy both assume one constant.
pub const PAIRING_CODE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingStatus {
    Pending,
    Approved,
    Expired,
}

impl PairingStatus {
    fn as_str(&self) -> &'static str {
        match self {
            PairingStatus::Pending => "pending",
            PairingStatus::Approved => "approved",
            PairingStatus::Expired => "expired",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "pending" => PairingStatus::Pending,
            "approved" => PairingStatus::Approved,
            "expired" => PairingStatus::Expired,
            other => panic!("unknown pairing status in store: {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PairingRequest {
    pub id: String,
    pub platform: Platform,
    pub sender_id: String,
    pub code: String,
    pub status: PairingStatus,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone)]
pub struct AllowListEntry {
    pub platform: Platform,
    pub sender_id: String,
    pub added_at: i64,
}

pub async fn init_schema(pool: &SqlitePool) -> StoreResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pairing_requests (
            id TEXT PRIMARY KEY,
            platform TEXT NOT NULL,
            sender_id TEXT NOT NULL,
            code TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_pairing_code ON pairing_requests (code)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pairing_sender ON pairing_requests (platform, sender_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS allow_list (
            platform TEXT NOT NULL,
            sender_id TEXT NOT NULL,
            added_at INTEGER NOT NULL,
            PRIMARY KEY (platform, sender_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[derive(Clone)]
pub struct PairingRepository {
    pool: SqlitePool,
}

impl PairingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// `SeedAllowFrom` — operator-provided static allow-list, applied at
    /// startup. Inserting a sender already present is a no-op.
    pub async fn seed_allow(&self, platform: Platform, sender_id: &str) -> StoreResult<()> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            "INSERT OR IGNORE INTO allow_list (platform, sender_id, added_at) VALUES (?, ?, ?)",
        )
        .bind(platform.to_string())
        .bind(sender_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn is_approved(&self, platform: Platform, sender_id: &str) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 FROM allow_list WHERE platform = ? AND sender_id = ?")
            .bind(platform.to_string())
            .bind(sender_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// `RequestPairing` — issues a fresh 6-digit code, retrying generation
    /// on the rare unique-index collision. The caller supplies `code` since
    /// random generation belongs to the pairing component, not the store.
    pub async fn create_request(
        &self,
        platform: Platform,
        sender_id: &str,
        code: &str,
    ) -> StoreResult<PairingRequest> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();
        let expires_at = now + PAIRING_CODE_TTL.as_millis() as i64;

        sqlx::query(
            r#"
            INSERT INTO pairing_requests (id, platform, sender_id, code, status, created_at, expires_at)
            VALUES (?, ?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(&id)
        .bind(platform.to_string())
        .bind(sender_id)
        .bind(code)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(format!("pairing code {code} already issued"))
            }
            _ => StoreError::Database(e),
        })?;

        Ok(PairingRequest {
            id,
            platform,
            sender_id: sender_id.to_string(),
            code: code.to_string(),
            status: PairingStatus::Pending,
            created_at: now,
            expires_at,
        })
    }

    /// Looks up an unexpired `pending` request already on file for this
    /// `(platform, sender_id)`, so a sender who messages twice before
    /// approving is handed back the same code rather than a new one.
    pub async fn find_pending(&self, platform: Platform, sender_id: &str) -> StoreResult<Option<PairingRequest>> {
        let row = sqlx::query(
            "SELECT * FROM pairing_requests WHERE platform = ? AND sender_id = ? AND status = 'pending' AND expires_at >= ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(platform.to_string())
        .bind(sender_id)
        .bind(Utc::now().timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(PairingRequest {
            id: row.get("id"),
            platform,
            sender_id: sender_id.to_string(),
            code: row.get("code"),
            status: PairingStatus::from_str(&row.get::<String, _>("status")),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
        }))
    }

    pub async fn code_in_use(&self, code: &str) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 FROM pairing_requests WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// `Approve` — looks a code up, checks it is still `pending` and
    /// unexpired, promotes the sender to the allow-list, and marks the
    /// request approved. Returns the approved request, or `None` if the
    /// code is unknown, already used, or expired.
    pub async fn approve(&self, code: &str) -> StoreResult<Option<PairingRequest>> {
        let row = sqlx::query("SELECT * FROM pairing_requests WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status = PairingStatus::from_str(&row.get::<String, _>("status"));
        let expires_at: i64 = row.get("expires_at");
        let now = Utc::now().timestamp_millis();

        if status != PairingStatus::Pending || expires_at < now {
            return Ok(None);
        }

        let platform: String = row.get("platform");
        let sender_id: String = row.get("sender_id");
        let platform: Platform = platform.parse().unwrap_or(Platform::Telegram);

        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE pairing_requests SET status = 'approved' WHERE code = ?")
            .bind(code)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT OR IGNORE INTO allow_list (platform, sender_id, added_at) VALUES (?, ?, ?)",
        )
        .bind(platform.to_string())
        .bind(&sender_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(PairingRequest {
            id: row.get("id"),
            platform,
            sender_id,
            code: code.to_string(),
            status: PairingStatus::Approved,
            created_at: row.get("created_at"),
            expires_at,
        }))
    }

    pub async fn count_pending(&self, platform: Platform) -> StoreResult<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) as n FROM pairing_requests WHERE platform = ? AND status = 'pending' AND expires_at >= ?",
        )
        .bind(platform.to_string())
        .bind(Utc::now().timestamp_millis())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    /// Periodic sweep marking lapsed `pending` requests `expired`. Run on
    /// the configured `sweep_interval_secs`.
    pub async fn sweep_expired(&self) -> StoreResult<u64> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            "UPDATE pairing_requests SET status = 'expired' WHERE status = 'pending' AND expires_at < ?",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn repo() -> PairingRepository {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_schema(&pool).await.unwrap();
        PairingRepository::new(pool)
    }

    #[tokio::test]
    async fn seeded_sender_is_approved_without_a_pairing_request() {
        let repo = repo().await;
        repo.seed_allow(Platform::Telegram, "111").await.unwrap();
        assert!(repo.is_approved(Platform::Telegram, "111").await.unwrap());
        assert!(!repo.is_approved(Platform::Telegram, "222").await.unwrap());
    }

    #[tokio::test]
    async fn approving_a_code_promotes_sender_to_allow_list() {
        let repo = repo().await;
        repo.create_request(Platform::Whatsapp, "555", "123456")
            .await
            .unwrap();
        assert!(!repo.is_approved(Platform::Whatsapp, "555").await.unwrap());

        let approved = repo.approve("123456").await.unwrap();
        assert!(approved.is_some());
        assert!(repo.is_approved(Platform::Whatsapp, "555").await.unwrap());

        // re-approving the same code is a no-op (already approved, not pending)
        assert!(repo.approve("123456").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_pending_locates_an_existing_unexpired_request() {
        let repo = repo().await;
        assert!(repo.find_pending(Platform::Telegram, "42").await.unwrap().is_none());

        let req = repo
            .create_request(Platform::Telegram, "42", "222333")
            .await
            .unwrap();
        let found = repo.find_pending(Platform::Telegram, "42").await.unwrap().unwrap();
        assert_eq!(found.code, req.code);

        repo.approve(&req.code).await.unwrap();
        assert!(repo.find_pending(Platform::Telegram, "42").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_code_does_not_approve_anything() {
        let repo = repo().await;
        assert!(repo.approve("000000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_expires_lapsed_pending_requests() {
        let repo = repo().await;
        let req = repo
            .create_request(Platform::Telegram, "9", "654321")
            .await
            .unwrap();

        // force it into the past directly, sweep relies on expires_at < now
        sqlx::query("UPDATE pairing_requests SET expires_at = 0 WHERE id = ?")
            .bind(&req.id)
            .execute(&repo.pool)
            .await
            .unwrap();

        let swept = repo.sweep_expired().await.unwrap();
        assert_eq!(swept, 1);
        assert!(repo.approve("654321").await.unwrap().is_none());
    }
}
