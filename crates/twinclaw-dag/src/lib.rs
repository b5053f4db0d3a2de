//! Delegation DAG orchestrator (C10, spec §4.4): validates a submitted
//! graph of delegated work, then runs it to completion with bounded
//! concurrency, per-node retry, and cascade cancellation of a failed
//! node's descendants.

mod error;
mod validate;

pub use error::{DagError, DagResult};

use async_trait::async_trait;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use twinclaw_store::dag::{JobStatus, NodeStatus};
use twinclaw_store::Store;

/// One node of a submitted delegation graph, as the caller describes it
/// before any store ids or scheduling state exist.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: String,
    pub brief: String,
    pub depends_on: Vec<String>,
}

/// Resolved Open Question (spec §9): a single node gets one retry (two
/// attempts total) by default. Callers may override per job.
pub const DEFAULT_MAX_NODE_RETRIES: u32 = 1;

/// Executes the work described by a single node's brief. Implemented by
/// whatever collaborator actually delegates to a sub-agent or tool; kept
/// generic so the orchestrator has no opinion on what a node *does*.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(&self, node_id: &str, brief: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct JobOutcome {
    pub succeeded: u32,
    pub failed: u32,
    pub cancelled: u32,
}

pub struct Orchestrator {
    store: Store,
    max_nodes: usize,
    max_depth: usize,
    max_concurrency: usize,
    max_node_retries: u32,
}

impl Orchestrator {
    pub fn new(
        store: Store,
        max_nodes: usize,
        max_depth: usize,
        max_concurrency: usize,
        max_node_retries: u32,
    ) -> Self {
        Self {
            store,
            max_nodes,
            max_depth,
            max_concurrency,
            max_node_retries,
        }
    }

    /// Validate and persist a new job. Does not run it — call [`Self::run`]
    /// (typically spawned) once the job is durably recorded.
    pub async fn submit(&self, job_id: &str, nodes: &[NodeSpec]) -> DagResult<()> {
        validate::validate(nodes, self.max_nodes, self.max_depth)?;

        self.store.dag().create_job(job_id, self.max_concurrency as u32).await?;
        for node in nodes {
            self.store.dag().add_node(job_id, &node.id, &node.brief).await?;
        }
        for node in nodes {
            for dep in &node.depends_on {
                self.store.dag().add_edge(job_id, dep, &node.id).await?;
            }
        }
        Ok(())
    }

    /// Run a previously submitted job to completion. Ready nodes (all
    /// dependencies satisfied) are dispatched in lexicographic order,
    /// bounded to `max_concurrency` in flight at once. A node that still
    /// fails after `max_node_retries` retries fails the job and cancels
    /// every transitive descendant of that node; unrelated branches run
    /// to their own conclusion.
    pub async fn run(
        &self,
        job_id: &str,
        executor: Arc<dyn NodeExecutor>,
        timeout: Option<Duration>,
    ) -> DagResult<JobOutcome> {
        let nodes = self.store.dag().nodes(job_id).await?;
        if nodes.is_empty() {
            return Err(DagError::NotFound(job_id.to_string()));
        }
        let edges = self.store.dag().edges(job_id).await?;

        let mut indegree: HashMap<String, u32> = nodes.iter().map(|n| (n.node_id.clone(), 0)).collect();
        let mut dependents: HashMap<String, Vec<String>> =
            nodes.iter().map(|n| (n.node_id.clone(), Vec::new())).collect();
        let mut briefs: HashMap<String, String> = nodes.iter().map(|n| (n.node_id.clone(), n.brief.clone())).collect();

        for edge in &edges {
            *indegree.get_mut(&edge.to_node_id).unwrap() += 1;
            dependents.get_mut(&edge.from_node_id).unwrap().push(edge.to_node_id.clone());
        }

        let mut pending: BTreeSet<String> = indegree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(id, _)| id.clone())
            .collect();
        let mut terminal: HashSet<String> = HashSet::new();
        let mut retried_once: HashSet<String> = HashSet::new();
        let mut succeeded = 0u32;
        let mut failed = 0u32;
        let mut cancelled = 0u32;

        self.store.dag().set_job_status(job_id, JobStatus::Running).await?;

        let run_body = async {
            let mut in_flight = FuturesUnordered::new();

            loop {
                while in_flight.len() < self.max_concurrency {
                    let Some(node_id) = pending.pop_first() else {
                        break;
                    };
                    self.store
                        .dag()
                        .set_node_status(job_id, &node_id, NodeStatus::Running, false)
                        .await?;
                    self.store
                        .dag()
                        .record_event(job_id, Some(&node_id), "node_started", serde_json::json!({}))
                        .await?;

                    let exec = executor.clone();
                    let brief = briefs.get(&node_id).cloned().unwrap_or_default();
                    in_flight.push(async move {
                        let result = exec.execute(&node_id, &brief).await;
                        (node_id, result)
                    });
                }

                let Some((node_id, result)) = in_flight.next().await else {
                    break;
                };

                match result {
                    Ok(()) => {
                        self.store
                            .dag()
                            .set_node_status(job_id, &node_id, NodeStatus::Succeeded, false)
                            .await?;
                        self.store
                            .dag()
                            .record_event(job_id, Some(&node_id), "node_succeeded", serde_json::json!({}))
                            .await?;
                        terminal.insert(node_id.clone());
                        succeeded += 1;

                        for dep in dependents.get(&node_id).cloned().unwrap_or_default() {
                            let d = indegree.get_mut(&dep).unwrap();
                            *d -= 1;
                            if *d == 0 && !terminal.contains(&dep) {
                                pending.insert(dep);
                            }
                        }
                    }
                    Err(e) => {
                        let already_retried = retried_once.contains(&node_id);
                        if !already_retried && self.max_node_retries > 0 {
                            retried_once.insert(node_id.clone());
                            warn!(job_id, node_id, error = %e, "node failed, retrying");
                            self.store
                                .dag()
                                .record_event(
                                    job_id,
                                    Some(&node_id),
                                    "node_failed",
                                    serde_json::json!({"error": e.to_string(), "will_retry": true}),
                                )
                                .await?;
                            pending.insert(node_id);
                        } else {
                            self.store
                                .dag()
                                .set_node_status(job_id, &node_id, NodeStatus::Failed, true)
                                .await?;
                            self.store
                                .dag()
                                .record_event(
                                    job_id,
                                    Some(&node_id),
                                    "node_failed",
                                    serde_json::json!({"error": e.to_string(), "will_retry": false}),
                                )
                                .await?;
                            terminal.insert(node_id.clone());
                            failed += 1;

                            let descendants = transitive_dependents(&node_id, &dependents);
                            for desc in descendants {
                                if terminal.contains(&desc) {
                                    continue;
                                }
                                terminal.insert(desc.clone());
                                pending.remove(&desc);
                                self.store
                                    .dag()
                                    .set_node_status(job_id, &desc, NodeStatus::Cancelled, false)
                                    .await?;
                                self.store
                                    .dag()
                                    .record_event(
                                        job_id,
                                        Some(&desc),
                                        "propagated_cancel",
                                        serde_json::json!({"parent_failed": node_id}),
                                    )
                                    .await?;
                                cancelled += 1;
                            }
                        }
                    }
                }
            }

            Ok::<(), DagError>(())
        };

        match timeout {
            Some(t) => tokio::time::timeout(t, run_body).await.map_err(|_| {
                DagError::Store(twinclaw_store::StoreError::Conflict(format!(
                    "job {job_id} exceeded its timeout"
                )))
            })??,
            None => run_body.await?,
        }

        let final_status = if failed > 0 { JobStatus::Failed } else { JobStatus::Succeeded };
        self.store.dag().set_job_status(job_id, final_status).await?;

        info!(job_id, succeeded, failed, cancelled, "dag job finished");
        Ok(JobOutcome {
            succeeded,
            failed,
            cancelled,
        })
    }
}

fn transitive_dependents(node_id: &str, dependents: &HashMap<String, Vec<String>>) -> Vec<String> {
    let mut out = Vec::new();
    let mut stack = vec![node_id.to_string()];
    let mut seen = HashSet::new();
    while let Some(current) = stack.pop() {
        if let Some(children) = dependents.get(&current) {
            for child in children {
                if seen.insert(child.clone()) {
                    out.push(child.clone());
                    stack.push(child.clone());
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Mutex as AsyncMutex;

    struct ScriptedExecutor {
        fail_nodes: HashSet<String>,
        order: AsyncMutex<Vec<String>>,
    }

    #[async_trait]
    impl NodeExecutor for ScriptedExecutor {
        async fn execute(&self, node_id: &str, _brief: &str) -> anyhow::Result<()> {
            self.order.lock().await.push(node_id.to_string());
            if self.fail_nodes.contains(node_id) {
                anyhow::bail!("scripted failure for {node_id}");
            }
            Ok(())
        }
    }

    async fn orchestrator() -> Orchestrator {
        let store = Store::connect_memory().await.unwrap();
        store.init_schema().await.unwrap();
        Orchestrator::new(store, 64, 16, 4, DEFAULT_MAX_NODE_RETRIES)
    }

    fn spec(id: &str, deps: &[&str]) -> NodeSpec {
        NodeSpec {
            id: id.to_string(),
            brief: format!("do {id}"),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn diamond_graph_runs_all_nodes_to_success() {
        let orch = orchestrator().await;
        let nodes = vec![spec("a", &[]), spec("b", &["a"]), spec("c", &["a"]), spec("d", &["b", "c"])];
        orch.submit("job-1", &nodes).await.unwrap();

        let executor = Arc::new(ScriptedExecutor {
            fail_nodes: HashSet::new(),
            order: AsyncMutex::new(vec![]),
        });
        let outcome = orch.run("job-1", executor.clone(), None).await.unwrap();

        assert_eq!(outcome.succeeded, 4);
        assert_eq!(outcome.failed, 0);
        let order = executor.order.lock().await;
        assert_eq!(order[0], "a");
        assert_eq!(*order.last().unwrap(), "d");
    }

    #[tokio::test]
    async fn permanent_failure_cancels_only_its_descendants() {
        let orch = orchestrator().await;
        // a -> b -> d ; a -> c (independent of b's failure)
        let nodes = vec![spec("a", &[]), spec("b", &["a"]), spec("c", &["a"]), spec("d", &["b"])];
        orch.submit("job-2", &nodes).await.unwrap();

        let mut fail_nodes = HashSet::new();
        fail_nodes.insert("b".to_string());
        let executor = Arc::new(ScriptedExecutor {
            fail_nodes,
            order: AsyncMutex::new(vec![]),
        });

        // with DEFAULT_MAX_NODE_RETRIES=1, b fails twice before giving up
        let outcome = orch.run("job-2", executor, None).await.unwrap();

        assert_eq!(outcome.succeeded, 2); // a, c
        assert_eq!(outcome.failed, 1); // b
        assert_eq!(outcome.cancelled, 1); // d, descendant of b
    }

    #[tokio::test]
    async fn node_recovers_on_its_single_retry() {
        let orch = Orchestrator::new(Store::connect_memory().await.unwrap(), 64, 16, 4, 1);
        orch.store.init_schema().await.unwrap();
        let nodes = vec![spec("a", &[])];
        orch.submit("job-3", &nodes).await.unwrap();

        let attempts = Arc::new(AtomicU32::new(0));
        struct FlakyOnce {
            attempts: Arc<AtomicU32>,
        }
        #[async_trait]
        impl NodeExecutor for FlakyOnce {
            async fn execute(&self, _node_id: &str, _brief: &str) -> anyhow::Result<()> {
                if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("first attempt fails");
                }
                Ok(())
            }
        }

        let outcome = orch
            .run("job-3", Arc::new(FlakyOnce { attempts: attempts.clone() }), None)
            .await
            .unwrap();

        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failed, 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn transitive_dependents_follows_multiple_hops() {
        let mut dependents = HashMap::new();
        dependents.insert("a".to_string(), vec!["b".to_string()]);
        dependents.insert("b".to_string(), vec!["c".to_string()]);
        dependents.insert("c".to_string(), vec![]);

        let result = transitive_dependents("a", &dependents);
        assert_eq!(result, vec!["b".to_string(), "c".to_string()]);
    }
}
