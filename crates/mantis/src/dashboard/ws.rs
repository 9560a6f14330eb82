// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket broadcaster. Each client subscribes to the storage event and
//! alert channels plus the dashboard control channel and forwards frames
//! until it errors or hangs up. Per-channel ordering is preserved; there is
//! no ordering guarantee across channels.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use crate::dashboard::DashboardState;

/// `GET /ws` — upgrade and stream. Auth was already enforced by the
/// middleware (including the `?token=` form).
pub async fn ws_handler(
    State(state): State<Arc<DashboardState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<DashboardState>) {
    let mut events = state.storage.subscribe_events();
    let mut alerts = state.storage.subscribe_alerts();
    let mut control = state.control_tx.subscribe();
    let (mut ws_tx, mut ws_rx) = socket.split();

    tracing::debug!("websocket client connected");

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let frame = serde_json::json!({"type": "event", "data": event});
                        if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    // Lagged: the oldest undelivered items were dropped so
                    // this slow client cannot stall capture. Keep going.
                    Err(RecvError::Lagged(dropped)) => {
                        tracing::debug!(dropped, "websocket client lagged on events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            alert = alerts.recv() => {
                match alert {
                    Ok(alert) => {
                        let frame = serde_json::json!({"type": "alert", "data": alert});
                        if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(dropped)) => {
                        tracing::debug!(dropped, "websocket client lagged on alerts");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            frame = control.recv() => {
                match frame {
                    Ok(frame) => {
                        if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
            incoming = ws_rx.next() => {
                // The dashboard only pushes; client frames are drained and a
                // close (or error) ends the task.
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    tracing::debug!("websocket client disconnected");
}
