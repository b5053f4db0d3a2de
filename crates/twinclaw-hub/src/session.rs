//! Per-connection `/ws` session loop (C11, spec §4.7/§6).
//!
//! The handshake and heartbeat shape follow the same pattern as any
//! bearer-token WebSocket gateway: authenticate first with a bounded
//! timeout, then alternate between reading client frames and forwarding
//! broadcast events, closing with a specific code for each failure mode
//! so a client can tell a bad token from a stale connection.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use std::collections::HashSet;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use twinclaw_common::Topic;

use crate::frame::{close_code, ClientFrame, ServerFrame};
use crate::hub::Hub;
use crate::snapshot::SnapshotProvider;

#[derive(Debug, Clone)]
pub struct SessionTuning {
    pub auth_timeout: Duration,
    pub heartbeat_interval: Duration,
}

async fn close_with(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame<'_>) -> bool {
    match serde_json::to_string(frame) {
        Ok(text) => socket.send(Message::Text(text)).await.is_ok(),
        Err(_) => false,
    }
}

/// Drive one client connection until it closes, the server shuts down, or
/// a protocol violation forces a close. Never returns an error: every
/// failure mode is a specific WebSocket close code instead.
pub async fn run(
    mut socket: WebSocket,
    hub: &Hub,
    snapshots: &dyn SnapshotProvider,
    tuning: SessionTuning,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let first = tokio::time::timeout(tuning.auth_timeout, socket.recv()).await;
    let authed = match first {
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Auth { token }) => {
                let expected = hub.auth_token().as_bytes();
                bool::from(expected.ct_eq(token.as_bytes()))
            }
            _ => false,
        },
        _ => false,
    };

    if !authed {
        warn!("websocket client failed authentication");
        close_with(socket, close_code::AUTH_FAILED, "auth failed or timed out").await;
        return;
    }

    let mut subscribed: HashSet<Topic> = HashSet::new();
    let mut broadcast_rx = hub.subscribe();
    let mut heartbeat = tokio::time::interval(tuning.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut missed_heartbeats = 0u32;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    close_with(socket, close_code::SERVER_SHUTDOWN, "server shutting down").await;
                    return;
                }
            }

            _ = heartbeat.tick() => {
                missed_heartbeats += 1;
                if missed_heartbeats > 2 {
                    close_with(socket, close_code::HEARTBEAT_STALE, "no pong received").await;
                    return;
                }
                if !send_frame(&mut socket, &ServerFrame::Pong).await {
                    return;
                }
            }

            incoming = socket.recv() => {
                match incoming {
                    None => {
                        debug!("websocket client disconnected");
                        return;
                    }
                    Some(Err(_)) => return,
                    Some(Ok(Message::Close(_))) => return,
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        missed_heartbeats = 0;
                    }
                    Some(Ok(Message::Text(text))) => {
                        missed_heartbeats = 0;
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(ClientFrame::Subscribe { topics }) => {
                                let mut resolved = Vec::with_capacity(topics.len());
                                for raw in &topics {
                                    match raw.parse::<Topic>() {
                                        Ok(topic) => resolved.push(topic),
                                        Err(_) => {
                                            close_with(socket, close_code::UNKNOWN_TOPIC, "unknown topic").await;
                                            return;
                                        }
                                    }
                                }
                                for topic in &resolved {
                                    if subscribed.insert(*topic) {
                                        let payload = snapshots.snapshot(*topic);
                                        if !send_frame(&mut socket, &ServerFrame::Snapshot { topic: *topic, payload }).await {
                                            return;
                                        }
                                    }
                                }
                                if !send_frame(&mut socket, &ServerFrame::Subscribed { topics: resolved }).await {
                                    return;
                                }
                            }
                            Ok(ClientFrame::Ping) => {
                                if !send_frame(&mut socket, &ServerFrame::Pong).await {
                                    return;
                                }
                            }
                            Ok(ClientFrame::Auth { .. }) | Err(_) => {
                                close_with(socket, close_code::PROTOCOL_ERROR, "unexpected or malformed frame").await;
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        close_with(socket, close_code::PROTOCOL_ERROR, "binary frames are not supported").await;
                        return;
                    }
                }
            }

            event = broadcast_rx.recv() => {
                match event {
                    Ok(envelope) if subscribed.contains(&envelope.topic) => {
                        if !send_frame(&mut socket, &ServerFrame::Event { envelope: &envelope }).await {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        metrics::counter!("twinclaw_hub_dropped_events_total").increment(skipped);
                        warn!(skipped, "websocket client lagged, dropping events");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    }
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_millis(5_000),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tuning_matches_documented_defaults() {
        let tuning = SessionTuning::default();
        assert_eq!(tuning.auth_timeout, Duration::from_millis(5_000));
        assert_eq!(tuning.heartbeat_interval, Duration::from_secs(30));
    }
}
