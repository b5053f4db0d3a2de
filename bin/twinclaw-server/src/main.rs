//! TwinClaw server: the single-host autonomous chat agent's runtime core.
//!
//! Wires the thirteen runtime-core components together, starts every
//! background loop (pairing sweep, delivery processing, scheduled jobs,
//! event hub producer), and serves the HTTP control plane and `/ws` event
//! stream until told to shut down.

mod adapters;
mod api;
mod doctor;
mod signing_mw;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::{net::TcpListener, signal};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use twinclaw_config::AppConfig;
use twinclaw_dag::Orchestrator;
use twinclaw_delivery::{DeliveryProcessor, DeliveryTuning};
use twinclaw_dispatch::{Boundary, ChunkerConfig as DispatchChunkerConfig, DebounceConfig as DispatchDebounceConfig, Dispatcher, PairingPolicy};
use twinclaw_hub::{EmptySnapshots, Hub, Producer, SessionTuning, SnapshotProvider};
use twinclaw_pairing::PairingService;
use twinclaw_scheduler::Scheduler;
use twinclaw_store::Store;
use twinclaw_webhook::WebhookService;

use adapters::{
    DeliveryDigestJob, HubJobEventSink, LoggingDispatchGateway, LoggingNodeExecutor, LoggingSender,
    LoggingWebhookGateway,
};
use doctor::{Doctor, DoctorSnapshots, HealthSource, ReliabilitySource};
use state::{AppState, SigningState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    twinclaw_common::logging::init_logging("twinclaw-server");

    let config = Arc::new(AppConfig::load().context("failed to load configuration")?);
    info!(port = config.http.port, dev_mode = config.dev_mode, "starting twinclaw-server");

    let signing_secret = twinclaw_signing::resolve_secret(&config.signing.secret_env_var)
        .context("signing secret must be configured before startup")?;

    let store = Store::connect(&config.store.path).await.context("failed to connect to store")?;
    store.init_schema().await.context("failed to initialize store schema")?;

    // C3 — pairing.
    let pairing = Arc::new(PairingService::new(store.clone(), config.pairing.max_pending_per_channel));
    pairing.clone().spawn_sweeper(Duration::from_secs(config.pairing.sweep_interval_secs));

    // C7 — delivery queue. No channel adapter is wired in this build; the
    // logging sender stands in for whatever Telegram/WhatsApp client the
    // deployment configures.
    let delivery = DeliveryProcessor::new(
        store.clone(),
        Arc::new(LoggingSender),
        DeliveryTuning {
            base_delay_ms: config.delivery.base_delay_ms,
            backoff_factor: config.delivery.backoff_factor,
            max_delay_ms: config.delivery.max_delay_ms,
            max_attempts: config.delivery.max_attempts,
            tick_interval_ms: config.delivery.tick_interval_ms,
            min_send_interval_ms: config.delivery.min_send_interval_ms,
        },
    );
    delivery.clone().spawn();

    // C9 — webhook intake, handing accepted outcomes back as a system turn.
    let webhook = Arc::new(WebhookService::new(store.clone(), Arc::new(LoggingWebhookGateway)));

    // C10 — delegation DAG orchestrator. Internal capability only: the
    // control plane has no route that submits or runs a job directly.
    let dag = Arc::new(Orchestrator::new(
        store.clone(),
        config.dag.max_nodes,
        config.dag.max_depth,
        config.dag.max_concurrency,
        config.dag.max_node_retries,
    ));
    let _node_executor: Arc<dyn twinclaw_dag::NodeExecutor> = Arc::new(LoggingNodeExecutor);

    // C13 — readiness aggregator.
    let doctor = Doctor::new(delivery.clone());
    doctor.clone().spawn(Duration::from_secs(5));

    // C11 — event hub.
    let hub = Arc::new(Hub::new(signing_secret.clone(), config.hub.max_client_queue_kb as usize * 4));

    // C12 — periodic producer feeding the hub from the doctor's cache.
    let producer = Producer::new(
        hub.clone(),
        vec![Box::new(HealthSource(doctor.clone())), Box::new(ReliabilitySource(doctor.clone()))],
        Duration::from_secs(config.hub.producer_tick_secs),
    );
    producer.spawn();

    let snapshots: Arc<dyn SnapshotProvider> = if config.dev_mode {
        Arc::new(EmptySnapshots)
    } else {
        Arc::new(DoctorSnapshots { doctor: doctor.clone() })
    };

    // C2 — scheduler. Pairing and delivery already tick themselves; the
    // scheduler drives cron-shaped jobs layered on top of them.
    let job_sink = Arc::new(HubJobEventSink { hub: hub.clone(), doctor: doctor.clone() });
    let mut scheduler = Scheduler::new(job_sink, Duration::from_millis(config.scheduler.tick_interval_ms));
    scheduler
        .register(
            "delivery-digest",
            "0 */5 * * * *",
            Arc::new(DeliveryDigestJob { delivery: delivery.clone() }),
        )
        .context("failed to register delivery-digest job")?;
    scheduler.spawn();

    // C5/C6/C8 — debounce, chunk, and hand off to the agent gateway.
    let dispatcher = Dispatcher::new(
        pairing.clone(),
        PairingPolicy::parse(&config.pairing.policy),
        delivery.clone(),
        DispatchDebounceConfig {
            debounce_ms: config.debounce.debounce_ms,
            coalesce_audio: config.debounce.coalesce_audio,
        },
        None,
        Arc::new(LoggingDispatchGateway),
        DispatchChunkerConfig {
            min_chars: config.chunker.min_chars,
            max_chars: config.chunker.max_chars,
            boundary: Boundary::parse(&config.chunker.boundary),
        },
        Duration::from_millis(config.debounce.debounce_ms),
    );
    dispatcher.clone().spawn();

    let (shutdown_tx, _shutdown_rx) = tokio::sync::watch::channel(false);

    let app_state = AppState {
        store: store.clone(),
        config: config.clone(),
        pairing: pairing.clone(),
        delivery: delivery.clone(),
        webhook: webhook.clone(),
        dag: dag.clone(),
        dispatcher: dispatcher.clone(),
        hub: hub.clone(),
        snapshots,
        session_tuning: SessionTuning {
            auth_timeout: Duration::from_millis(config.hub.auth_timeout_ms),
            heartbeat_interval: Duration::from_secs(config.hub.heartbeat_interval_secs),
        },
        doctor: doctor.clone(),
        shutdown: shutdown_tx.clone(),
    };

    let signing_state = SigningState { secret: Arc::new(signing_secret) };

    let cors_origins: Vec<axum::http::HeaderValue> = config
        .http
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    let app = api::build_router(app_state, signing_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(AllowOrigin::list(cors_origins)));

    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = TcpListener::bind(&addr).await.with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "control plane listening");

    let mut shutdown_rx_for_server = shutdown_tx.subscribe();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx_for_server.changed().await;
            })
            .await;
        if let Err(e) = result {
            error!(error = %e, "http server exited with an error");
        }
    });

    shutdown_signal(shutdown_tx.clone()).await;
    info!("shutdown signal received, draining in-flight work");

    if tokio::time::timeout(Duration::from_secs(10), server).await.is_err() {
        warn!("http server did not shut down within 10s");
    }

    info!("twinclaw-server shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown_tx: tokio::sync::watch::Sender<bool>) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let mut from_halt = shutdown_tx.subscribe();
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = from_halt.changed() => {},
    }

    let _ = shutdown_tx.send(true);
}
