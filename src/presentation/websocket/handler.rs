//! WebSocket Connection Handler
//!
//! Handles individual gateway connections: Hello, Identify handshake,
//! heartbeat intake (which feeds the session link monitor), and targeted
//! event dispatch.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, timeout};
use uuid::Uuid;

use super::connection::ConnectionState;
use super::messages::{
    GatewaySend, HeartbeatPayload, HelloPayload, IdentifyPayload, OpCode, ReadyPayload,
};
use crate::application::services::SessionService;
use crate::infrastructure::metrics;
use crate::presentation::http::handlers::session::session_service;
use crate::presentation::middleware::auth::validate_token;
use crate::startup::AppState;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_message_size(state.settings.websocket.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4().to_string();
    let mut conn_state = ConnectionState::new(connection_id.clone());

    tracing::debug!(connection_id = %connection_id, "New WebSocket connection");

    // Split socket for concurrent read/write
    let (mut sender, mut receiver) = socket.split();

    // Create channel for outgoing messages
    let (tx, mut rx) = mpsc::unbounded_channel::<GatewaySend>();

    // Send Hello message immediately
    let hello = GatewaySend {
        op: OpCode::Hello as u8,
        d: Some(
            serde_json::to_value(HelloPayload {
                heartbeat_interval: state.gateway.heartbeat_interval(),
            })
            .unwrap_or_default(),
        ),
        s: None,
        t: None,
    };

    let hello_text = match serde_json::to_string(&hello) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("Failed to serialize Hello: {}", e);
            return;
        }
    };
    if let Err(e) = sender.send(Message::Text(hello_text.into())).await {
        tracing::error!("Failed to send Hello: {}", e);
        return;
    }

    // Spawn task to forward messages from channel to WebSocket
    let sender_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Wait for Identify (with timeout)
    let identify_timeout = Duration::from_secs(state.settings.websocket.identify_timeout_secs);
    let identify_result = timeout(identify_timeout, async {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Ok(payload) = serde_json::from_str::<serde_json::Value>(&text) {
                        if payload.get("op").and_then(|v| v.as_u64())
                            == Some(OpCode::Identify as u64)
                        {
                            if let Some(d) = payload.get("d") {
                                if let Ok(identify) =
                                    serde_json::from_value::<IdentifyPayload>(d.clone())
                                {
                                    return Some(identify);
                                }
                            }
                        }
                    }
                }
                Ok(Message::Close(_)) => return None,
                Err(_) => return None,
                _ => continue,
            }
        }
        None
    })
    .await;

    let identify = match identify_result {
        Ok(Some(id)) => id,
        Ok(None) => {
            tracing::debug!(connection_id = %connection_id, "Connection closed before Identify");
            sender_task.abort();
            return;
        }
        Err(_) => {
            tracing::debug!(connection_id = %connection_id, "Identify timeout");
            let _ = tx.send(GatewaySend {
                op: OpCode::InvalidSession as u8,
                d: Some(json!(false)),
                s: None,
                t: None,
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
            sender_task.abort();
            return;
        }
    };

    // Validate token from the identity provider
    let user_id = match validate_token(&identify.token, &state.settings.jwt.secret) {
        Ok(auth) => auth.user_id,
        Err(e) => {
            tracing::debug!(connection_id = %connection_id, error = %e, "Invalid token");
            let _ = tx.send(GatewaySend {
                op: OpCode::InvalidSession as u8,
                d: Some(json!(false)),
                s: None,
                t: None,
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
            sender_task.abort();
            return;
        }
    };

    // Update connection state
    conn_state.user_id = user_id;
    conn_state.identified = true;

    // Register connection with gateway
    state
        .gateway
        .register_connection(connection_id.clone(), user_id, tx.clone());
    metrics::WEBSOCKET_CONNECTIONS_ACTIVE.inc();

    // Send READY event
    let ready_sequence = conn_state.next_sequence();
    let ready = GatewaySend {
        op: OpCode::Dispatch as u8,
        d: Some(
            serde_json::to_value(ReadyPayload {
                user_id: user_id.to_string(),
                connection_id: connection_id.clone(),
            })
            .unwrap_or_default(),
        ),
        s: Some(ready_sequence),
        t: Some("READY".to_string()),
    };

    if tx.send(ready).is_err() {
        state.gateway.unregister_connection(&connection_id);
        metrics::WEBSOCKET_CONNECTIONS_ACTIVE.dec();
        sender_task.abort();
        return;
    }

    tracing::info!(
        user_id = user_id,
        connection_id = %connection_id,
        "User connected and identified"
    );

    // Subscribe to gateway events
    let mut event_rx = state.gateway.subscribe();

    // Heartbeat liveness check
    let heartbeat_interval_ms = state.gateway.heartbeat_interval();
    let mut heartbeat_check = interval(Duration::from_millis(heartbeat_interval_ms + 10000));
    heartbeat_check.tick().await; // Skip first immediate tick

    // Main message loop
    loop {
        tokio::select! {
            // Handle incoming messages
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_message(
                            &text,
                            &mut conn_state,
                            &tx,
                            &state,
                        ).await {
                            tracing::debug!(
                                connection_id = %connection_id,
                                error = %e,
                                "Error handling message"
                            );
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(connection_id = %connection_id, "Connection closed");
                        break;
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // Pong is handled automatically by axum
                    }
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }

            // Handle gateway events
            event = event_rx.recv() => {
                match event {
                    Ok(routed_event) => {
                        if routed_event.target_users.contains(&conn_state.user_id) {
                            let sequence = conn_state.next_sequence();
                            let dispatch = GatewaySend {
                                op: OpCode::Dispatch as u8,
                                d: Some(routed_event.event.to_json()),
                                s: Some(sequence),
                                t: Some(routed_event.event.event_name().to_string()),
                            };
                            if tx.send(dispatch).is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(
                            connection_id = %connection_id,
                            skipped = n,
                            "Event receiver lagged"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::error!("Gateway event channel closed");
                        break;
                    }
                }
            }

            // Check heartbeat timeout
            _ = heartbeat_check.tick() => {
                let timeout_ms = heartbeat_interval_ms + 10000; // 10 second grace
                if !conn_state.is_alive(timeout_ms) {
                    tracing::info!(
                        connection_id = %connection_id,
                        "Heartbeat timeout, closing connection"
                    );
                    break;
                }
            }
        }
    }

    // Cleanup
    state.gateway.unregister_connection(&connection_id);
    metrics::WEBSOCKET_CONNECTIONS_ACTIVE.dec();
    sender_task.abort();

    tracing::info!(
        user_id = user_id,
        connection_id = %connection_id,
        "User disconnected"
    );
}

/// Handle incoming WebSocket message
async fn handle_message(
    text: &str,
    conn_state: &mut ConnectionState,
    tx: &mpsc::UnboundedSender<GatewaySend>,
    state: &AppState,
) -> Result<(), String> {
    let payload: serde_json::Value =
        serde_json::from_str(text).map_err(|e| format!("Invalid JSON: {}", e))?;

    let op = payload
        .get("op")
        .and_then(|v| v.as_u64())
        .ok_or("Missing op field")?;

    match op {
        op if op == OpCode::Heartbeat as u64 => {
            conn_state.heartbeat();
            let _ = tx.send(GatewaySend {
                op: OpCode::HeartbeatAck as u8,
                d: None,
                s: None,
                t: None,
            });

            // A heartbeat naming a session also feeds its link monitor
            let session_id = payload
                .get("d")
                .cloned()
                .and_then(|d| serde_json::from_value::<HeartbeatPayload>(d).ok())
                .and_then(|p| p.session_id);
            if let Some(session_id) = session_id {
                if let Err(e) = session_service(state)
                    .heartbeat(session_id, conn_state.user_id)
                    .await
                {
                    tracing::debug!(
                        session_id = %session_id,
                        user_id = conn_state.user_id,
                        error = %e,
                        "Session heartbeat rejected"
                    );
                }
            }
        }

        _ => {
            tracing::debug!(
                connection_id = %conn_state.connection_id,
                op = op,
                "Unknown opcode"
            );
        }
    }

    Ok(())
}
