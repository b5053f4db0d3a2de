//! HTTP control plane and WebSocket upgrade (spec §6).
//!
//! | Route                        | Auth    | Purpose                              |
//! |-------------------------------|---------|---------------------------------------|
//! | `GET  /health`                 | none    | liveness + readiness summary          |
//! | `GET  /health/live`            | none    | process is up                         |
//! | `GET  /health/ready`           | none    | 503 once the doctor calls degraded    |
//! | `GET  /metrics`                | none    | Prometheus-text delivery/scheduler gauges |
//! | `GET  /reliability`            | signed  | delivery + callback counters          |
//! | `POST /reliability/replay/:id` | signed  | requeue a dead-lettered chunk         |
//! | `POST /callback/webhook`       | signed  | orchestration task outcome            |
//! | `POST /system/halt`            | signed  | acknowledge then begin shutdown       |
//! | `GET  /ws/metrics`             | signed  | hub connection/backlog counters       |
//! | `GET  /ws`                     | in-band | event hub stream (auth is first frame)|

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum::middleware::from_fn_with_state;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use twinclaw_common::{ApiEnvelope, ErrorKind};

use crate::signing_mw::require_signature;
use crate::state::{AppState, SigningState};

pub fn build_router(state: AppState, signing: SigningState) -> Router {
    let signed = Router::new()
        .route("/reliability", get(reliability))
        .route("/reliability/replay/:id", post(replay_dead_letter))
        .route("/callback/webhook", post(webhook))
        .route("/system/halt", post(system_halt))
        .route("/ws/metrics", get(ws_metrics))
        .layer(from_fn_with_state(signing, require_signature));

    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(health_live))
        .route("/health/ready", get(health_ready))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws_upgrade))
        .merge(signed)
        .with_state(state)
}

async fn metrics(State(state): State<AppState>) -> Response {
    let report = state.doctor.snapshot();
    let body = format!(
        "# HELP twinclaw_delivery_pending_total Chunks waiting to be sent\n\
         # TYPE twinclaw_delivery_pending_total gauge\n\
         twinclaw_delivery_pending_total {pending}\n\
         # HELP twinclaw_delivery_dead_letter_total Chunks exhausted of retries\n\
         # TYPE twinclaw_delivery_dead_letter_total gauge\n\
         twinclaw_delivery_dead_letter_total {dead_letter}\n\
         # HELP twinclaw_delivery_sent_total Chunks successfully delivered\n\
         # TYPE twinclaw_delivery_sent_total counter\n\
         twinclaw_delivery_sent_total {sent}\n\
         # HELP twinclaw_scheduler_last_tick_age_seconds Seconds since any scheduled job last fired\n\
         # TYPE twinclaw_scheduler_last_tick_age_seconds gauge\n\
         twinclaw_scheduler_last_tick_age_seconds {tick_age}\n",
        pending = report.delivery.pending,
        dead_letter = report.delivery.dead_letter,
        sent = report.delivery.sent,
        tick_age = report.scheduler_last_tick_age_secs,
    );

    (StatusCode::OK, [("content-type", "text/plain; version=0.0.4")], body).into_response()
}

async fn health(State(state): State<AppState>) -> Json<ApiEnvelope<serde_json::Value>> {
    let report = state.doctor.snapshot();
    Json(ApiEnvelope::ok(json!({
        "status": report.status,
        "issues": report.issues,
        "devMode": state.config.dev_mode,
    })))
}

async fn health_live() -> Json<ApiEnvelope<serde_json::Value>> {
    Json(ApiEnvelope::ok(json!({ "status": "live" })))
}

async fn health_ready(State(state): State<AppState>) -> Response {
    let report = state.doctor.snapshot();
    if state.doctor.is_ready() {
        (StatusCode::OK, Json(ApiEnvelope::ok(report))).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(ApiEnvelope::ok(report))).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ReliabilityResponse {
    #[serde(flatten)]
    delivery: twinclaw_store::delivery::DeliveryStats,
    callback_receipts_total: i64,
}

async fn reliability(State(state): State<AppState>) -> Response {
    let delivery = match state.delivery.stats().await {
        Ok(d) => d,
        Err(e) => return error_response(e.kind().status_code(), "delivery", &e.to_string()),
    };
    let callback_receipts_total = match state.store.callback().total_count().await {
        Ok(n) => n,
        Err(e) => return error_response(e.kind().status_code(), "store", &e.to_string()),
    };

    (
        StatusCode::OK,
        Json(ApiEnvelope::ok(ReliabilityResponse { delivery, callback_receipts_total })),
    )
        .into_response()
}

async fn replay_dead_letter(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.delivery.requeue_dead_letter(&id).await {
        Ok(()) => {
            info!(id, "requeued dead-lettered delivery");
            (StatusCode::OK, Json(ApiEnvelope::ok(json!({ "id": id, "requeued": true })))).into_response()
        }
        Err(e) => error_response(e.kind().status_code(), "delivery", &e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct WebhookRequest {
    #[serde(rename = "taskId")]
    task_id: String,
    #[serde(rename = "eventType")]
    event_type: String,
    status: String,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

async fn webhook(State(state): State<AppState>, Json(body): Json<WebhookRequest>) -> Response {
    match state
        .webhook
        .handle(&body.task_id, &body.event_type, &body.status, body.result, body.error)
        .await
    {
        Ok(receipt) => {
            let status = StatusCode::from_u16(receipt.status_code as u16)
                .unwrap_or(StatusCode::ACCEPTED);
            (
                status,
                Json(ApiEnvelope::ok(json!({
                    "receiptId": receipt.id,
                    "outcome": receipt.outcome.as_str(),
                }))),
            )
                .into_response()
        }
        Err(e) => error_response(e.kind().status_code(), "webhook", &e.to_string()),
    }
}

async fn system_halt(State(state): State<AppState>) -> Response {
    warn!("system halt requested over the control plane");
    let response = (StatusCode::ACCEPTED, Json(ApiEnvelope::ok(json!({ "shuttingDown": true })))).into_response();
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let _ = shutdown.send(true);
    });
    response
}

async fn ws_metrics(State(state): State<AppState>) -> Json<ApiEnvelope<serde_json::Value>> {
    Json(ApiEnvelope::ok(json!({
        "auth_timeout_ms": state.session_tuning.auth_timeout.as_millis(),
        "heartbeat_interval_secs": state.session_tuning.heartbeat_interval.as_secs(),
    })))
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let hub = state.hub.clone();
    let snapshots = state.snapshots.clone();
    let tuning = state.session_tuning.clone();
    let shutdown_rx = state.shutdown.subscribe();

    ws.on_upgrade(move |socket| async move {
        twinclaw_hub::run_session(socket, hub.as_ref(), snapshots.as_ref(), tuning, shutdown_rx).await;
    })
}

fn error_response(status: u16, kind: &str, message: &str) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ApiEnvelope::<()>::err(kind, message))).into_response()
}
