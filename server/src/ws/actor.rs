use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{interval, timeout};

use crate::presence::Flow;
use crate::state::AppState;
use crate::ws::{protocol, Connection, Outbound};

/// Ping interval: server sends WebSocket ping every 30 seconds.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the writer may keep flushing queued frames after the reader ends.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Run the actor-per-connection pattern for an upgraded WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, drains the connection's bounded outbound queue
/// - Reader loop: decodes frames and hands them to the hub
///
/// `join` and the message history events (send, edit, delete) run inline,
/// so they are persisted and relayed in client order. Other events run as
/// their own tasks, at most `max_inflight_events` at a time; once that many
/// are pending the reader stops pulling frames.
pub async fn run_connection(socket: WebSocket, state: AppState, verified_user: Option<String>) {
    let hub = state.hub.clone();
    let config = hub.config().clone();

    let (ws_sender, mut ws_receiver) = socket.split();
    let (conn, rx) = Connection::new(verified_user, config.outbound_buffer);

    hub.on_connect(&conn);

    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    let ping_tx = conn.sender().clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Outbound::Ping(vec![1, 2, 3, 4])).await.is_err() {
                // Writer task has died, connection is gone
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx
                        .send(Outbound::Close {
                            code: 1001,
                            reason: "Pong timeout".to_string(),
                        })
                        .await;
                    break;
                }
            }
        }
    });

    let inflight = Arc::new(Semaphore::new(config.max_inflight_events.max(1)));

    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    let Some(frame) = protocol::decode_text(&conn, text.as_str()) else {
                        continue;
                    };

                    if protocol::is_ordered(&frame) {
                        if let Flow::Close { code, reason } = hub.dispatch(&conn, frame).await {
                            conn.send(Outbound::Close { code, reason });
                            break;
                        }
                        continue;
                    }

                    let Ok(permit) = inflight.clone().acquire_owned().await else {
                        break;
                    };
                    let hub = hub.clone();
                    let conn = conn.clone();
                    tokio::spawn(async move {
                        if let Flow::Close { code, reason } = hub.dispatch(&conn, frame).await {
                            conn.send(Outbound::Close { code, reason });
                        }
                        drop(permit);
                    });
                }
                Message::Binary(data) => {
                    tracing::debug!(
                        connection_id = %conn.id,
                        bytes = data.len(),
                        "Ignoring binary frame"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    conn.send(Outbound::Pong(data.to_vec()));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        connection_id = %conn.id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    connection_id = %conn.id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(connection_id = %conn.id, "WebSocket stream ended");
                break;
            }
        }
    }

    ping_handle.abort();
    hub.on_disconnect(&conn);
    drop(conn);

    // Give a queued close frame the chance to go out
    if timeout(WRITER_DRAIN, &mut writer_handle).await.is_err() {
        writer_handle.abort();
    }
}

/// Writer task: drains the outbound queue into the WebSocket sink.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
) {
    while let Some(frame) = rx.recv().await {
        let (msg, last) = match frame {
            Outbound::Text(text) => (Message::Text(text.as_ref().into()), false),
            Outbound::Ping(data) => (Message::Ping(data.into()), false),
            Outbound::Pong(data) => (Message::Pong(data.into()), false),
            Outbound::Close { code, reason } => (
                Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })),
                true,
            ),
        };

        if ws_sender.send(msg).await.is_err() || last {
            break;
        }
    }
}
