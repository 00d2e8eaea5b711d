//! Per-connection session: one inbound loop, one outbound loop.
//!
//! The loops share nothing but the bounded outbound queue and the hub's
//! channels. The outbound loop drains the queue and pings on an interval;
//! the inbound loop enforces a read deadline that any frame (including
//! pong) resets. Either side failing tears the whole connection down.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time;

use linklet_common::id::{prefix, prefixed_ulid};

use crate::AppState;

use super::dispatch::SessionContext;
use super::hub::SessionHandle;

/// Write deadline for a single outbound frame.
const WRITE_WAIT: Duration = Duration::from_secs(10);
/// Read deadline; any inbound frame resets it.
const PONG_WAIT: Duration = Duration::from_secs(60);
/// Ping interval; must stay under the read deadline.
const PING_PERIOD: Duration = Duration::from_secs(54);
/// Maximum inbound frame size in bytes.
const MAX_FRAME_BYTES: usize = 2048;
/// Capacity of the per-session outbound queue.
const OUTBOUND_QUEUE: usize = 512;

/// Drive one upgraded socket until it disconnects. `user_id` has already
/// been resolved by the auth collaborator.
pub async fn serve_socket(socket: WebSocket, state: AppState, user_id: String) {
    let session_id = prefixed_ulid(prefix::SESSION);
    let (ws_tx, ws_rx) = socket.split();
    let (queue_tx, queue_rx) = mpsc::channel::<Arc<str>>(OUTBOUND_QUEUE);

    let session = SessionHandle::new(session_id.clone(), user_id.clone(), queue_tx);
    if let Err(err) = state.hub.register(session).await {
        tracing::warn!(?err, %user_id, "failed to register session");
        return;
    }

    let writer = tokio::spawn(outbound_loop(session_id.clone(), ws_tx, queue_rx));

    let ctx = SessionContext {
        session_id: session_id.clone(),
        user_id: user_id.clone(),
        state: state.clone(),
    };
    inbound_loop(ws_rx, &ctx).await;

    // Unregistering drops the queue's only sender, which ends the
    // outbound loop after it drains.
    state.hub.unregister(session_id.clone()).await;
    if let Err(err) = writer.await {
        // A panic in the outbound loop is contained to this connection.
        tracing::error!(?err, %session_id, "outbound loop aborted");
    }

    tracing::info!(%session_id, %user_id, "session ended");
}

async fn inbound_loop(mut ws_rx: SplitStream<WebSocket>, ctx: &SessionContext) {
    loop {
        let msg = match time::timeout(PONG_WAIT, ws_rx.next()).await {
            Err(_) => {
                tracing::debug!(session_id = %ctx.session_id, "read deadline exceeded");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                tracing::debug!(?err, session_id = %ctx.session_id, "socket read error");
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => {
                if text.len() > MAX_FRAME_BYTES {
                    tracing::debug!(
                        session_id = %ctx.session_id,
                        len = text.len(),
                        "oversized frame — closing connection"
                    );
                    break;
                }
                ctx.dispatch(text.as_str()).await;
            }
            // Any traffic resets the deadline; probes need no handling.
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Binary(_) => {
                tracing::debug!(session_id = %ctx.session_id, "dropping binary frame");
            }
            Message::Close(_) => break,
        }
    }
}

async fn outbound_loop(
    session_id: String,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut queue_rx: mpsc::Receiver<Arc<str>>,
) {
    let mut ping = time::interval(PING_PERIOD);
    ping.tick().await; // First tick fires immediately; skip it.

    loop {
        tokio::select! {
            maybe = queue_rx.recv() => match maybe {
                Some(frame) => {
                    let send = ws_tx.send(Message::Text(frame.as_ref().into()));
                    match time::timeout(WRITE_WAIT, send).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            tracing::debug!(?err, %session_id, "socket write error");
                            break;
                        }
                        Err(_) => {
                            tracing::debug!(%session_id, "write deadline exceeded");
                            break;
                        }
                    }
                }
                None => {
                    // Queue closed by unregistration.
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            },
            _ = ping.tick() => {
                match time::timeout(WRITE_WAIT, ws_tx.send(Message::Ping(Bytes::new()))).await {
                    Ok(Ok(())) => {}
                    _ => {
                        tracing::debug!(%session_id, "failed to send keepalive probe");
                        break;
                    }
                }
            }
        }
    }
}
