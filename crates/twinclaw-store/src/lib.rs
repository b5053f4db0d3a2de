//! Embedded, transactional persistence for every durable entity in the
//! runtime core (C1). A single SQLite database backs the whole process;
//! each domain area owns a repository struct over the shared pool.

pub mod callback;
pub mod dag;
pub mod delivery;
pub mod error;
pub mod pairing;

pub use error::{StoreError, StoreResult};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

/// Shared handle to the embedded database. Cheaply clonable (pool is an
/// `Arc` internally).
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect to (and create if absent) the SQLite file at `path`.
    pub async fn connect(path: &str) -> StoreResult<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(|e| StoreError::Connect(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connect(e.to_string()))?;

        info!(path, "connected to embedded store");
        Ok(Self { pool })
    }

    /// Connect to an in-memory database, used by tests.
    pub async fn connect_memory() -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::Connect(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create every table and index used by the runtime core. Idempotent.
    pub async fn init_schema(&self) -> StoreResult<()> {
        delivery::init_schema(&self.pool).await?;
        pairing::init_schema(&self.pool).await?;
        callback::init_schema(&self.pool).await?;
        dag::init_schema(&self.pool).await?;
        info!("store schema initialized");
        Ok(())
    }

    pub fn delivery(&self) -> delivery::DeliveryRepository {
        delivery::DeliveryRepository::new(self.pool.clone())
    }

    pub fn pairing(&self) -> pairing::PairingRepository {
        pairing::PairingRepository::new(self.pool.clone())
    }

    pub fn callback(&self) -> callback::CallbackRepository {
        callback::CallbackRepository::new(self.pool.clone())
    }

    pub fn dag(&self) -> dag::DagRepository {
        dag::DagRepository::new(self.pool.clone())
    }
}
