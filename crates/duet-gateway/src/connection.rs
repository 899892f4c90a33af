use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use duet_types::events::{ClientCommand, ServerEvent};
use duet_types::models::UserId;

use crate::auth::HandshakeParams;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::{Gateway, SessionConfig};

/// Lifecycle of one websocket session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Active,
    Closing,
    Closed,
}

/// Why the active loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitReason {
    ClientClosed,
    StreamEnded,
    ReadError,
    DecodeError,
    IdleTimeout,
    WriterStopped,
}

/// `GET /ws?user_id=..&token=..`
pub async fn ws_upgrade(
    State(gateway): State<Gateway>,
    Query(params): Query<HandshakeParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, gateway, params))
}

/// Drive one upgraded websocket until it closes.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway, params: HandshakeParams) {
    ConnectionSession::new(gateway).run(socket, params).await
}

struct ConnectionSession {
    gateway: Gateway,
    state: SessionState,
}

impl ConnectionSession {
    fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            state: SessionState::Connecting,
        }
    }

    fn transition(&mut self, next: SessionState) {
        trace!("Session {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    async fn run(mut self, mut socket: WebSocket, params: HandshakeParams) {
        self.transition(SessionState::Authenticating);

        let user_id = match self.gateway.authenticate(&params) {
            Ok(id) => id,
            Err(e) => {
                warn!("Rejecting websocket connection: {}", e);
                self.transition(SessionState::Closed);
                let _ = socket.close().await;
                return;
            }
        };

        let config = self.gateway.config().clone();
        let (handle, outbound) =
            open_handle(self.gateway.registry(), user_id, config.outbound_capacity);
        let guard = SessionGuard {
            registry: self.gateway.registry().clone(),
            handle: handle.clone(),
        };
        self.transition(SessionState::Active);
        info!("User {} connected to gateway (connection {})", user_id, handle.id());

        let (sink, stream) = socket.split();
        let mut writer = tokio::spawn(write_loop(sink, outbound, handle.clone(), config.clone()));

        let reason = tokio::select! {
            reason = self.read_loop(stream, &handle, config.idle_timeout) => reason,
            _ = &mut writer => ExitReason::WriterStopped,
        };

        self.transition(SessionState::Closing);
        handle.close();
        if reason != ExitReason::WriterStopped {
            // Bounded by the write timeout on the final Close frame.
            let _ = writer.await;
        }
        drop(guard);
        self.transition(SessionState::Closed);

        info!("User {} disconnected from gateway ({:?})", user_id, reason);
    }

    async fn read_loop(
        &self,
        mut stream: SplitStream<WebSocket>,
        handle: &ConnectionHandle,
        idle_timeout: Duration,
    ) -> ExitReason {
        let user_id = handle.user_id();
        let dispatcher = self.gateway.dispatcher();

        loop {
            // Re-armed for every frame, so pongs keep an idle client alive.
            let next = match tokio::time::timeout(idle_timeout, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    info!("User {} idle for {:?}, closing", user_id, idle_timeout);
                    return ExitReason::IdleTimeout;
                }
            };

            let msg = match next {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    debug!("Error reading websocket message from user {}: {}", user_id, e);
                    return ExitReason::ReadError;
                }
                None => return ExitReason::StreamEnded,
            };

            let raw: &[u8] = match &msg {
                Message::Text(text) => text.as_str().as_bytes(),
                Message::Binary(data) => &data[..],
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(_) => return ExitReason::ClientClosed,
            };

            match ClientCommand::decode(raw) {
                Ok(cmd) => {
                    trace!("User {} -> {}", user_id, cmd.kind());
                    dispatcher.dispatch(handle, cmd).await;
                }
                Err(e) => {
                    warn!(
                        "User {} sent undecodable frame: {} -- raw: {}",
                        user_id,
                        e,
                        String::from_utf8_lossy(&raw[..raw.len().min(200)])
                    );
                    return ExitReason::DecodeError;
                }
            }
        }
    }
}

/// Create a handle with `connected` already queued, then publish it. Until
/// `register` nothing else can reach the queue, so `connected` is always the
/// first event a session sees.
fn open_handle(
    registry: &ConnectionRegistry,
    user_id: UserId,
    capacity: usize,
) -> (ConnectionHandle, mpsc::Receiver<ServerEvent>) {
    let (handle, outbound) = ConnectionHandle::new(user_id, capacity);
    // Fresh, open, empty queue: this cannot fail.
    let _ = handle.send(ServerEvent::connected());
    registry.register(handle.clone());
    (handle, outbound)
}

/// Removes the registry entry and closes the handle when the session ends,
/// whichever way it ends, including the session task being dropped.
struct SessionGuard {
    registry: ConnectionRegistry,
    handle: ConnectionHandle,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry
            .unregister_connection(self.handle.user_id(), self.handle.id());
        self.handle.close();
    }
}

/// Owns the socket sink: drains queued events, sends heartbeat pings, and
/// sends a Close frame once the handle is closed. Every write is bounded by
/// the write timeout; a failed write closes the handle.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ServerEvent>,
    handle: ConnectionHandle,
    config: SessionConfig,
) {
    let user_id = handle.user_id();
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.tick().await;

    loop {
        let frame = tokio::select! {
            biased;
            _ = handle.closed() => {
                let _ = tokio::time::timeout(config.write_timeout, sink.send(Message::Close(None))).await;
                break;
            }
            event = outbound.recv() => {
                let Some(event) = event else { break };
                match serde_json::to_string(&event) {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        warn!("Failed to serialize {} event: {}", event.kind(), e);
                        continue;
                    }
                }
            }
            _ = heartbeat.tick() => Message::Ping(Bytes::new()),
        };

        match tokio::time::timeout(config.write_timeout, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Error writing to user {}: {}", user_id, e);
                break;
            }
            Err(_) => {
                warn!(
                    "Write to user {} timed out after {:?}",
                    user_id, config.write_timeout
                );
                break;
            }
        }
    }

    handle.close();
}
