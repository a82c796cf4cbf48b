//! Push stream endpoint: best-effort live delivery over WebSocket.
//!
//! A connecting client is subscribed to the broadcaster and receives
//! `{type, data, timestamp, job_id}` messages as they are published — no
//! replay; a client that was away must consult `GET /api/status` for what it
//! missed. Inbound frames other than pong/close are ignored: the protocol is
//! push-only. Disconnecting (or failing a delivery) unregisters the
//! subscriber and never affects the running job.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use tokio::time::Instant;

use super::api::SharedState;
use crate::broadcast::{Broadcaster, Subscription};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    let broadcaster = Arc::clone(&state.broadcaster);
    ws.on_upgrade(move |socket| handle_socket(socket, broadcaster))
}

async fn handle_socket(socket: WebSocket, broadcaster: Arc<Broadcaster>) {
    let subscription = broadcaster.subscribe();
    let id = subscription.id();
    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, subscription).await;
    broadcaster.unsubscribe(id);
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Combines broadcast forwarding, client frame handling, and periodic
/// ping/pong health checking into a single select loop. If no Pong is
/// received within [`PONG_TIMEOUT`] after a Ping is sent, the connection
/// is considered dead and the loop exits.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut subscription: Subscription,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            // ── Periodic ping ───────────────────────────────────────
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            // ── Broadcast forwarding ────────────────────────────────
            message = subscription.recv() => {
                match message {
                    Some(msg) => match serde_json::to_string(&msg) {
                        Ok(json) => {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            tracing::error!(%err, "failed to serialize push message");
                        }
                    },
                    // Unsubscribed by the broadcaster (failed delivery).
                    None => break,
                }
            }

            // ── Client frames (pong, close, etc.) ───────────────────
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Inbound client messages are ignored; the stream is
                        // push-only.
                    }
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}
