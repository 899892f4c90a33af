//! Realtime side of duet: one websocket per user, a registry of live
//! connections, and per-chat fan-out of persisted messages.

pub mod auth;
pub mod broadcast;
pub mod connection;
pub mod dispatcher;
pub mod registry;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use duet_types::models::UserId;
use duet_types::store::{ChatStore, StoreError};

use crate::auth::{HandshakeError, HandshakeParams, TokenVerifier};
use crate::broadcast::Broadcaster;
use crate::dispatcher::Dispatcher;
use crate::registry::ConnectionRegistry;

/// Idle read timeout: a session with no inbound frame for this long is closed.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound on a single websocket write.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Server sends a Ping this often so quiet clients answer with Pongs
/// before the idle timeout fires.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Events queued per connection before it is treated as a failed recipient.
pub const OUTBOUND_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub idle_timeout: Duration,
    pub write_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub outbound_capacity: usize,
    /// Reject handshakes that carry no token. Off by default: tokenless
    /// clients are accepted on their claimed `user_id`.
    pub require_token: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: IDLE_TIMEOUT,
            write_timeout: WRITE_TIMEOUT,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            outbound_capacity: OUTBOUND_CAPACITY,
            require_token: false,
        }
    }
}

/// Process-wide realtime service. Built once at startup, cloned into the
/// router state, and shut down after the HTTP server stops.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    registry: ConnectionRegistry,
    dispatcher: Dispatcher,
    verifier: Arc<dyn TokenVerifier>,
    config: SessionConfig,
}

impl Gateway {
    pub fn new(
        store: Arc<dyn ChatStore>,
        verifier: Arc<dyn TokenVerifier>,
        config: SessionConfig,
    ) -> Self {
        let registry = ConnectionRegistry::new();
        let broadcaster = Broadcaster::new(store.clone(), registry.clone());
        let dispatcher = Dispatcher::new(store, broadcaster);
        Self {
            inner: Arc::new(GatewayInner {
                registry,
                dispatcher,
                verifier,
                config,
            }),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn authenticate(&self, params: &HandshakeParams) -> Result<UserId, HandshakeError> {
        auth::authenticate(
            params,
            self.inner.verifier.as_ref(),
            self.inner.config.require_token,
        )
    }

    /// Close every live connection. Returns how many were closed.
    pub fn shutdown(&self) -> usize {
        let closed = self.inner.registry.shutdown();
        info!("Gateway shut down, closed {} connections", closed);
        closed
    }
}

/// Run a synchronous store call on the blocking pool.
pub(crate) async fn run_blocking<T, F>(store: &Arc<dyn ChatStore>, f: F) -> Result<T, StoreError>
where
    F: FnOnce(&dyn ChatStore) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StoreError::Backend(anyhow::anyhow!("store call failed: {}", e))
        })?
}
