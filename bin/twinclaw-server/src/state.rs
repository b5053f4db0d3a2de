//! Shared application state handed to every HTTP and WebSocket handler.

use std::sync::Arc;
use tokio::sync::watch;
use twinclaw_config::AppConfig;
use twinclaw_dag::Orchestrator;
use twinclaw_delivery::DeliveryProcessor;
use twinclaw_dispatch::Dispatcher;
use twinclaw_hub::{Hub, SessionTuning, SnapshotProvider};
use twinclaw_pairing::PairingService;
use twinclaw_store::Store;
use twinclaw_webhook::WebhookService;

use crate::doctor::Doctor;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub config: Arc<AppConfig>,
    pub pairing: Arc<PairingService>,
    pub delivery: Arc<DeliveryProcessor>,
    pub webhook: Arc<WebhookService>,
    /// Delegation DAG orchestrator. Kept on state for internal use (future
    /// node executors may submit jobs), never exposed over HTTP directly —
    /// the control plane has no DAG-trigger route.
    pub dag: Arc<Orchestrator>,
    pub dispatcher: Arc<Dispatcher>,
    pub hub: Arc<Hub>,
    pub snapshots: Arc<dyn SnapshotProvider>,
    pub session_tuning: SessionTuning,
    pub doctor: Arc<Doctor>,
    pub shutdown: watch::Sender<bool>,
}

/// State consumed only by the signing middleware, kept separate from
/// [`AppState`] so a route group that doesn't need the secret never sees it.
#[derive(Clone)]
pub struct SigningState {
    pub secret: Arc<String>,
}
