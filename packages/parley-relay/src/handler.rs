//! WebSocket connection handler.
//!
//! Owns one client socket for its lifetime: a writer task drains the
//! connection's outbound channel, the read loop parses frames and hands
//! them to the router, and the registry entry is dropped on the way out.

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::protocol::{ClientMessage, Notice};
use crate::registry::{ConnectionHandle, Outbound};
use crate::router;
use crate::state::RelayState;

/// Handle a single WebSocket connection.
///
/// 1. Spawns a writer task for the connection's outbound channel
/// 2. Processes incoming frames until the socket closes or the writer
///    stops (e.g. the registration was superseded)
/// 3. Unregisters the connection
pub async fn handle_websocket(socket: WebSocket, state: RelayState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let conn = ConnectionHandle::new(tx);
    let connection_id = conn.id();
    tracing::debug!(connection = %connection_id, "WebSocket connected");

    // ── Writer Task ───────────────────────────────────────────────────────

    let mut sender_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Message(msg) => match serde_json::to_string(&msg) {
                    Ok(json) => {
                        if ws_sender.send(Message::Text(json)).await.is_err() {
                            break; // Connection closed
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to serialize server message: {}", e);
                    }
                },
                Outbound::Close => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    // ── Read Loop ─────────────────────────────────────────────────────────

    loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => handle_text(&state, &conn, &text),
                    Some(Ok(Message::Binary(_))) => {
                        conn.send(Notice::Error {
                            message: "Binary frames are not supported".to_string(),
                        });
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(connection = %connection_id, "Client closed socket");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(connection = %connection_id, error = %e, "WebSocket error");
                        break;
                    }
                    Some(Ok(_)) => {} // Ping/Pong are answered by axum
                }
            }
            _ = &mut sender_task => {
                tracing::debug!(connection = %connection_id, "Writer stopped");
                break;
            }
        }
    }

    // ── Cleanup ───────────────────────────────────────────────────────────

    router::disconnect(&state, &conn);
    sender_task.abort();
    tracing::info!(
        connection = %connection_id,
        connected_secs = (Utc::now() - conn.connected_at()).num_seconds(),
        "WebSocket disconnected"
    );
}

fn handle_text(state: &RelayState, conn: &ConnectionHandle, text: &str) {
    match ClientMessage::parse(text) {
        Ok(message) => router::dispatch(state, conn, message),
        Err(e) => {
            tracing::warn!(connection = %conn.id(), error = %e, "Failed to parse client message");
            conn.send(Notice::Error {
                message: format!("Invalid message format: {}", e),
            });
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
