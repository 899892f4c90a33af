use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use duet_types::events::ServerEvent;
use duet_types::models::UserId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection closed")]
    Closed,

    #[error("outbound queue full")]
    Full,
}

/// Sending side of one live websocket. The socket itself is owned by the
/// session's writer task, which drains the queue and stops once the handle
/// is closed.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    user_id: UserId,
    tx: mpsc::Sender<ServerEvent>,
    shutdown: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(user_id: UserId, capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = Self {
            id: Uuid::new_v4(),
            user_id,
            tx,
            shutdown: CancellationToken::new(),
        };
        (handle, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Queue an event without waiting. A full queue counts as a failed write.
    pub fn send(&self, event: ServerEvent) -> Result<(), DeliveryError> {
        if self.shutdown.is_cancelled() {
            return Err(DeliveryError::Closed);
        }
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once [`ConnectionHandle::close`] has been called on any clone.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }
}

/// user_id -> live connection. At most one connection per user.
///
/// The lock is only held for the map operation itself; closing a handle
/// never happens under it.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<UserId, ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<UserId, ConnectionHandle>> {
        self.connections.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<UserId, ConnectionHandle>> {
        self.connections.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install `handle` for its user. A connection it replaces is closed.
    pub fn register(&self, handle: ConnectionHandle) {
        let user_id = handle.user_id();
        let new_id = handle.id();
        let previous = self.write().insert(user_id, handle);

        if let Some(old) = previous.filter(|old| old.id() != new_id) {
            info!(
                "User {} reconnected, closing superseded connection {}",
                user_id,
                old.id()
            );
            old.close();
        }
    }

    pub fn unregister(&self, user_id: UserId) -> Option<ConnectionHandle> {
        self.write().remove(&user_id)
    }

    /// Remove the entry for `user_id` only if it is still `conn_id`, so a
    /// stale connection never evicts the one that replaced it.
    pub fn unregister_connection(&self, user_id: UserId, conn_id: Uuid) -> bool {
        let mut connections = self.write();
        match connections.get(&user_id) {
            Some(current) if current.id() == conn_id => {
                connections.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, user_id: UserId) -> Option<ConnectionHandle> {
        self.read().get(&user_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn connected_users(&self) -> Vec<UserId> {
        self.read().keys().copied().collect()
    }

    /// Remove and close every connection. Returns how many there were.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<ConnectionHandle> = self.write().drain().map(|(_, h)| h).collect();
        for handle in &drained {
            handle.close();
        }
        drained.len()
    }
}
