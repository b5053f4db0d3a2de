//! Delegation DAG persistence (C10, spec §3/§4.4): jobs, their nodes and
//! dependency edges, and the append-only event log used to replay a run.

use crate::error::StoreResult;
use chrono::Utc;
use serde_json::Value;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "pending" => JobStatus::Pending,
            "running" => JobStatus::Running,
            "succeeded" => JobStatus::Succeeded,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            other => panic!("unknown job status in store: {other}"),
        }
    }
}

impl NodeStatus {
    fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Succeeded => "succeeded",
            NodeStatus::Failed => "failed",
            NodeStatus::Cancelled => "cancelled",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "pending" => NodeStatus::Pending,
            "running" => NodeStatus::Running,
            "succeeded" => NodeStatus::Succeeded,
            "failed" => NodeStatus::Failed,
            "cancelled" => NodeStatus::Cancelled,
            other => panic!("unknown node status in store: {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestrationJob {
    pub id: String,
    pub status: JobStatus,
    pub max_concurrency: u32,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct DagNode {
    pub job_id: String,
    pub node_id: String,
    pub brief: String,
    pub status: NodeStatus,
    pub attempt_count: u32,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct DagEdge {
    pub job_id: String,
    /// `to_node_id` depends on `from_node_id` completing first.
    pub from_node_id: String,
    pub to_node_id: String,
}

#[derive(Debug, Clone)]
pub struct DagEvent {
    pub id: i64,
    pub job_id: String,
    pub node_id: Option<String>,
    pub event_type: String,
    pub ts: i64,
    pub detail: Value,
}

pub async fn init_schema(pool: &SqlitePool) -> StoreResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dag_jobs (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            max_concurrency INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            completed_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dag_nodes (
            job_id TEXT NOT NULL,
            node_id TEXT NOT NULL,
            brief TEXT NOT NULL,
            status TEXT NOT NULL,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (job_id, node_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dag_edges (
            job_id TEXT NOT NULL,
            from_node_id TEXT NOT NULL,
            to_node_id TEXT NOT NULL,
            PRIMARY KEY (job_id, from_node_id, to_node_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dag_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id TEXT NOT NULL,
            node_id TEXT,
            event_type TEXT NOT NULL,
            ts INTEGER NOT NULL,
            detail TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_dag_events_job ON dag_events (job_id, id)")
        .execute(pool)
        .await?;

    Ok(())
}

#[derive(Clone)]
pub struct DagRepository {
    pool: SqlitePool,
}

impl DagRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_job(&self, id: &str, max_concurrency: u32) -> StoreResult<()> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO dag_jobs (id, status, max_concurrency, created_at, updated_at, completed_at)
            VALUES (?, 'pending', ?, ?, ?, NULL)
            "#,
        )
        .bind(id)
        .bind(max_concurrency as i64)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_node(&self, job_id: &str, node_id: &str, brief: &str) -> StoreResult<()> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO dag_nodes (job_id, node_id, brief, status, attempt_count, created_at, updated_at)
            VALUES (?, ?, ?, 'pending', 0, ?, ?)
            "#,
        )
        .bind(job_id)
        .bind(node_id)
        .bind(brief)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_edge(&self, job_id: &str, from_node_id: &str, to_node_id: &str) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO dag_edges (job_id, from_node_id, to_node_id) VALUES (?, ?, ?)",
        )
        .bind(job_id)
        .bind(from_node_id)
        .bind(to_node_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_job_status(&self, job_id: &str, status: JobStatus) -> StoreResult<()> {
        let now = Utc::now().timestamp_millis();
        let completed_at = matches!(
            status,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
        .then_some(now);

        sqlx::query(
            "UPDATE dag_jobs SET status = ?, updated_at = ?, completed_at = COALESCE(?, completed_at) WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(now)
        .bind(completed_at)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_node_status(
        &self,
        job_id: &str,
        node_id: &str,
        status: NodeStatus,
        bump_attempt: bool,
    ) -> StoreResult<()> {
        let now = Utc::now().timestamp_millis();
        if bump_attempt {
            sqlx::query(
                "UPDATE dag_nodes SET status = ?, attempt_count = attempt_count + 1, updated_at = ? WHERE job_id = ? AND node_id = ?",
            )
            .bind(status.as_str())
            .bind(now)
            .bind(job_id)
            .bind(node_id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                "UPDATE dag_nodes SET status = ?, updated_at = ? WHERE job_id = ? AND node_id = ?",
            )
            .bind(status.as_str())
            .bind(now)
            .bind(job_id)
            .bind(node_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn nodes(&self, job_id: &str) -> StoreResult<Vec<DagNode>> {
        let rows = sqlx::query("SELECT * FROM dag_nodes WHERE job_id = ? ORDER BY node_id ASC")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| DagNode {
                job_id: row.get("job_id"),
                node_id: row.get("node_id"),
                brief: row.get("brief"),
                status: NodeStatus::from_str(&row.get::<String, _>("status")),
                attempt_count: row.get::<i64, _>("attempt_count") as u32,
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    pub async fn edges(&self, job_id: &str) -> StoreResult<Vec<DagEdge>> {
        let rows = sqlx::query("SELECT * FROM dag_edges WHERE job_id = ?")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| DagEdge {
                job_id: row.get("job_id"),
                from_node_id: row.get("from_node_id"),
                to_node_id: row.get("to_node_id"),
            })
            .collect())
    }

    pub async fn job(&self, job_id: &str) -> StoreResult<Option<OrchestrationJob>> {
        let row = sqlx::query("SELECT * FROM dag_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| OrchestrationJob {
            id: row.get("id"),
            status: JobStatus::from_str(&row.get::<String, _>("status")),
            max_concurrency: row.get::<i64, _>("max_concurrency") as u32,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            completed_at: row.get("completed_at"),
        }))
    }

    /// Append an event (`node_started`/`succeeded`/`failed`/`cancelled`/
    /// `propagated_cancel`) for replay and observability.
    pub async fn record_event(
        &self,
        job_id: &str,
        node_id: Option<&str>,
        event_type: &str,
        detail: Value,
    ) -> StoreResult<()> {
        let now = Utc::now().timestamp_millis();
        let detail_text = serde_json::to_string(&detail)?;
        sqlx::query(
            "INSERT INTO dag_events (job_id, node_id, event_type, ts, detail) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(job_id)
        .bind(node_id)
        .bind(event_type)
        .bind(now)
        .bind(detail_text)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn events(&self, job_id: &str) -> StoreResult<Vec<DagEvent>> {
        let rows = sqlx::query("SELECT * FROM dag_events WHERE job_id = ? ORDER BY id ASC")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let detail_text: String = row.get("detail");
                Ok(DagEvent {
                    id: row.get("id"),
                    job_id: row.get("job_id"),
                    node_id: row.get("node_id"),
                    event_type: row.get("event_type"),
                    ts: row.get("ts"),
                    detail: serde_json::from_str(&detail_text)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn repo() -> DagRepository {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_schema(&pool).await.unwrap();
        DagRepository::new(pool)
    }

    #[tokio::test]
    async fn job_with_nodes_and_edges_round_trips() {
        let repo = repo().await;
        repo.create_job("job-1", 4).await.unwrap();
        repo.add_node("job-1", "a", "do a").await.unwrap();
        repo.add_node("job-1", "b", "do b").await.unwrap();
        repo.add_edge("job-1", "a", "b").await.unwrap();

        let job = repo.job("job-1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let nodes = repo.nodes("job-1").await.unwrap();
        assert_eq!(nodes.len(), 2);

        let edges = repo.edges("job-1").await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from_node_id, "a");
        assert_eq!(edges[0].to_node_id, "b");
    }

    #[tokio::test]
    async fn node_status_transitions_bump_attempt_count_when_asked() {
        let repo = repo().await;
        repo.create_job("job-2", 1).await.unwrap();
        repo.add_node("job-2", "a", "do a").await.unwrap();

        repo.set_node_status("job-2", "a", NodeStatus::Running, false)
            .await
            .unwrap();
        repo.set_node_status("job-2", "a", NodeStatus::Failed, true)
            .await
            .unwrap();

        let nodes = repo.nodes("job-2").await.unwrap();
        assert_eq!(nodes[0].status, NodeStatus::Failed);
        assert_eq!(nodes[0].attempt_count, 1);
    }

    #[tokio::test]
    async fn job_completion_sets_completed_at() {
        let repo = repo().await;
        repo.create_job("job-3", 1).await.unwrap();
        repo.set_job_status("job-3", JobStatus::Succeeded)
            .await
            .unwrap();

        let job = repo.job("job-3").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn events_are_appended_in_order() {
        let repo = repo().await;
        repo.create_job("job-4", 1).await.unwrap();
        repo.record_event("job-4", Some("a"), "node_started", json!({}))
            .await
            .unwrap();
        repo.record_event("job-4", Some("a"), "node_succeeded", json!({}))
            .await
            .unwrap();

        let events = repo.events("job-4").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "node_started");
        assert_eq!(events[1].event_type, "node_succeeded");
    }
}
