//! `Coordinator` builder and accept loop.
//!
//! This is the entry point for running a PeerLink signaling coordinator.
//! It ties the layers together: transport → protocol → registry.

use std::sync::Arc;
use std::time::Duration;

use peerlink_protocol::{Codec, JsonCodec};
use peerlink_transport::{Transport, WebSocketTransport};
use tokio::sync::Mutex;

use crate::CoordinatorError;
use crate::handler::handle_connection;
use crate::registry::PeerRegistry;

/// Shared coordinator state passed to each connection handler task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks. The
/// registry lock is held for a whole dispatch step.
pub(crate) struct CoordinatorState<C: Codec> {
    pub(crate) registry: Mutex<PeerRegistry>,
    pub(crate) codec: C,
    pub(crate) idle_timeout: Option<Duration>,
}

/// Builder for configuring and starting a coordinator.
///
/// # Example
///
/// ```rust,no_run
/// use peerlink_coordinator::Coordinator;
///
/// # async fn run() -> Result<(), peerlink_coordinator::CoordinatorError> {
/// let coordinator = Coordinator::builder()
///     .bind("0.0.0.0:8080")
///     .build()
///     .await?;
/// coordinator.run().await
/// # }
/// ```
pub struct CoordinatorBuilder {
    bind_addr: String,
    idle_timeout: Option<Duration>,
}

impl CoordinatorBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            idle_timeout: None,
        }
    }

    /// Sets the address to bind to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Drops connections that send nothing for `timeout`.
    ///
    /// Off by default: endpoints that are connected directly to all their
    /// peers may stay quiet on the signaling socket for a long time.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Binds the listener.
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`, the combination browser
    /// endpoints speak.
    pub async fn build(self) -> Result<Coordinator<JsonCodec>, CoordinatorError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;

        let state = Arc::new(CoordinatorState {
            registry: Mutex::new(PeerRegistry::new()),
            codec: JsonCodec,
            idle_timeout: self.idle_timeout,
        });

        Ok(Coordinator { transport, state })
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound coordinator.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct Coordinator<C: Codec> {
    transport: WebSocketTransport,
    state: Arc<CoordinatorState<C>>,
}

impl Coordinator<JsonCodec> {
    /// Creates a new builder.
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }
}

impl<C: Codec> Coordinator<C> {
    /// Returns the local address the coordinator is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Number of currently registered peers.
    pub async fn peer_count(&self) -> usize {
        self.state.registry.lock().await.len()
    }

    /// Runs the accept loop.
    ///
    /// Spawns a handler task for each accepted connection. Runs until
    /// the process is terminated; a failed accept is logged and skipped.
    pub async fn run(mut self) -> Result<(), CoordinatorError> {
        tracing::info!("PeerLink coordinator running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(
                                error = %e,
                                "connection ended with error"
                            );
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
