//! Server endpoint: the peer the others connect to.
//!
//! A [`SyncServer`] owns the connection registry, a listener task
//! serving the server half of the protocol, and an outbound channel
//! for podcast pushes. Starting one acquires a port within a retry
//! budget; stopping it signals the listener and joins the task.
//!
//! Inbound traffic (connect, disconnect, sync) mutates or reads the
//! registry on the listener task. Podcasts run on the controlling
//! task: the local state is read once, the registry is snapshotted,
//! and the push walks the snapshot peer by peer, so a slow or dead
//! peer delays the others but never aborts the round.

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::automation::{MediaAutomation, PlaybackState};
use crate::error::{Error, Result};
use crate::protocol::{
    ConnectRequest, ConnectResponse, DisconnectRequest, DisconnectResponse, Message,
    PodcastRequest, PodcastResponse, ServerDispatcher, ServerHandler, SyncRequest, SyncResponse,
    VoidResponse, dispatch_server,
};
use crate::registry::{ConnectionRegistry, PeerConnection};

use super::acquire::{RetryBudget, probe_free_port};
use super::listener::{ListenerHandle, PendingListener};
use super::outbound::Outbound;

// ============================================================================
// Constants
// ============================================================================

/// Address the server listener binds by default: all interfaces.
pub const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

// ============================================================================
// ServerState
// ============================================================================

/// State shared between the listener task and the controlling task.
pub(super) struct ServerState {
    /// Registered peers, one per address.
    pub(super) registry: Mutex<ConnectionRegistry>,
    /// Local playback boundary.
    pub(super) automation: Arc<dyn MediaAutomation>,
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ServerHandler for ServerState {
    async fn handle_connect_request(
        &self,
        peer: IpAddr,
        request: ConnectRequest,
    ) -> ConnectResponse {
        let accept = self
            .registry
            .lock()
            .connect(peer, request.port, request.username.as_str());
        if accept {
            info!(
                peer = %peer,
                username = %request.username,
                port = request.port,
                "peer connected"
            );
        } else {
            warn!(
                peer = %peer,
                username = %request.username,
                "connect declined, address already registered"
            );
        }
        request.generate_response(accept)
    }

    async fn handle_disconnect_request(
        &self,
        peer: IpAddr,
        request: DisconnectRequest,
    ) -> DisconnectResponse {
        let removed = self.registry.lock().disconnect(peer);
        if removed {
            info!(peer = %peer, username = %request.username, "peer disconnected");
        } else {
            warn!(peer = %peer, "disconnect from unregistered address");
        }
        request.generate_response()
    }

    async fn handle_sync_request(&self, peer: IpAddr, request: SyncRequest) -> SyncResponse {
        let connected = self.registry.lock().is_connected(peer);
        let state = if connected {
            self.automation.local_state().await
        } else {
            warn!(peer = %peer, "sync request from unregistered address");
            PlaybackState::idle()
        };
        request.generate_response(state.fingerprint, state.time, state.paused)
    }

    async fn handle_podcast_response(
        &self,
        peer: IpAddr,
        response: PodcastResponse,
    ) -> VoidResponse {
        if response.accept {
            debug!(peer = %peer, "podcast accepted");
        } else {
            warn!(peer = %peer, "podcast declined");
        }
        response.generate_response()
    }
}

// ============================================================================
// SyncServer
// ============================================================================

/// A running server endpoint.
///
/// # Lifecycle
///
/// 1. [`start`](Self::start) probes a free port and binds the listener,
///    retrying within the budget; a budget that runs out yields
///    [`Error::Unavailable`].
/// 2. Peers connect, pull state, and depart through the listener.
/// 3. [`podcast`](Self::podcast) pushes the local state to every
///    registered peer.
/// 4. [`stop`](Self::stop) consumes the server, signals the listener,
///    and joins its task.
#[derive(Debug)]
pub struct SyncServer {
    pub(super) state: Arc<ServerState>,
    outbound: Outbound,
    listener: ListenerHandle,
}

impl SyncServer {
    // ------------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------------

    /// Starts a server on all interfaces.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unavailable`] when no port could be acquired
    /// within `budget`; a zero budget fails without touching the
    /// network.
    pub async fn start(automation: Arc<dyn MediaAutomation>, budget: Duration) -> Result<Self> {
        Self::start_on(DEFAULT_BIND_IP, automation, budget).await
    }

    /// Starts a server bound to a specific interface.
    ///
    /// # Errors
    ///
    /// Same as [`start`](Self::start).
    pub async fn start_on(
        ip: IpAddr,
        automation: Arc<dyn MediaAutomation>,
        budget: Duration,
    ) -> Result<Self> {
        let state = Arc::new(ServerState {
            registry: Mutex::new(ConnectionRegistry::new()),
            automation,
        });
        let outbound = Outbound::new()?;

        let retry = RetryBudget::new(budget);
        let pending = loop {
            if retry.expired() {
                return Err(Error::unavailable(retry.timeout_ms()));
            }
            let port = match probe_free_port().await {
                Ok(port) => port,
                Err(err) if err.is_recoverable() => {
                    debug!(error = %err, "port probe failed, retrying");
                    retry.pause().await;
                    continue;
                }
                Err(err) => return Err(err),
            };
            match PendingListener::bind(ip, port).await {
                Ok(pending) => break pending,
                Err(err) if err.is_recoverable() => {
                    debug!(port, error = %err, "bind failed, retrying");
                    retry.pause().await;
                    continue;
                }
                Err(err) => return Err(err),
            }
        };

        let port = pending.port();
        let listener = pending.spawn(Arc::new(ServerDispatcher::new(state.clone())));
        info!(ip = %ip, port, "server endpoint started");

        Ok(Self {
            state,
            outbound,
            listener,
        })
    }

    // ------------------------------------------------------------------------
    // Public API
    // ------------------------------------------------------------------------

    /// Port the listener is bound to.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.listener.port()
    }

    /// Snapshot of the registered peers, in connection order.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerConnection> {
        self.state.registry.lock().podcast_targets()
    }

    /// Pushes the current local state to every registered peer.
    ///
    /// The state is read once and delivered to a snapshot of the
    /// registry. Per-peer failures, transport or protocol, are logged
    /// and skipped; replies are routed through the regular server
    /// dispatch so a declined push is visible in the logs.
    pub async fn podcast(&self) {
        let state = self.state.automation.local_state().await;
        let targets = self.state.registry.lock().podcast_targets();
        if targets.is_empty() {
            debug!("podcast skipped, no peers registered");
            return;
        }

        let request = PodcastRequest {
            fingerprint: state.fingerprint,
            time: state.time,
            paused: state.paused,
        };
        info!(peers = targets.len(), url = %request.fingerprint, "podcasting state");
        let message: Message = request.into();

        for target in targets {
            let peer = SocketAddr::new(target.address, target.port);
            let reply = match self.outbound.call(peer, &message).await {
                Ok(reply) => reply,
                Err(err) => {
                    warn!(
                        peer = %peer,
                        username = %target.username,
                        error = %err,
                        "podcast delivery failed"
                    );
                    continue;
                }
            };
            if let Err(err) = dispatch_server(self.state.as_ref(), target.address, reply).await {
                warn!(peer = %peer, error = %err, "podcast reply refused");
            }
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Stops the listener and joins its task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ListenerFailed`] if the listener task
    /// panicked.
    pub async fn stop(self) -> Result<()> {
        info!(port = self.listener.port(), "stopping server endpoint");
        self.listener.stop().await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::automation::ScriptedAutomation;
    use crate::protocol::UrlFingerprint;
    use crate::session::acquire::DEFAULT_BUDGET;

    fn fresh_state(automation: ScriptedAutomation) -> ServerState {
        ServerState {
            registry: Mutex::new(ConnectionRegistry::new()),
            automation: Arc::new(automation),
        }
    }

    fn addr(last: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, last])
    }

    #[tokio::test]
    async fn test_connect_registers_then_declines_duplicate() {
        let state = fresh_state(ScriptedAutomation::idle());
        let request = ConnectRequest {
            username: "alice".to_string(),
            port: 9000,
        };

        let first = state.handle_connect_request(addr(2), request.clone()).await;
        assert!(first.accept);

        let second = state.handle_connect_request(addr(2), request).await;
        assert!(!second.accept);
        assert_eq!(state.registry.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_gated_on_registration() {
        let playing = PlaybackState {
            fingerprint: UrlFingerprint::parse("https://www.bilibili.com/video/BV1vx4y147cK"),
            time: 42.5,
            paused: false,
        };
        let state = fresh_state(ScriptedAutomation::with_state(playing.clone()));

        let idle = state.handle_sync_request(addr(2), SyncRequest {}).await;
        assert!(idle.fingerprint.is_void());
        assert_eq!(idle.time, 0.0);

        state
            .handle_connect_request(
                addr(2),
                ConnectRequest {
                    username: "alice".to_string(),
                    port: 9000,
                },
            )
            .await;
        let synced = state.handle_sync_request(addr(2), SyncRequest {}).await;
        assert_eq!(synced.fingerprint, playing.fingerprint);
        assert_eq!(synced.time, 42.5);
        assert!(!synced.paused);
    }

    #[tokio::test]
    async fn test_disconnect_unregisters() {
        let state = fresh_state(ScriptedAutomation::idle());
        state
            .handle_connect_request(
                addr(2),
                ConnectRequest {
                    username: "alice".to_string(),
                    port: 9000,
                },
            )
            .await;

        state
            .handle_disconnect_request(
                addr(2),
                DisconnectRequest {
                    username: "alice".to_string(),
                },
            )
            .await;
        assert!(state.registry.lock().is_empty());
    }

    async fn local_server() -> SyncServer {
        SyncServer::start_on(addr(1), Arc::new(ScriptedAutomation::idle()), DEFAULT_BUDGET)
            .await
            .expect("start")
    }

    #[tokio::test]
    async fn test_start_acquires_port_and_stop_joins() {
        let server = local_server().await;
        assert_ne!(server.port(), 0);
        assert!(server.peers().is_empty());

        server.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_zero_budget_start_is_unavailable() {
        let automation = Arc::new(ScriptedAutomation::idle());
        let err = SyncServer::start_on(addr(1), automation, Duration::ZERO)
            .await
            .expect_err("must fail");
        assert!(err.is_timeout());
        assert!(matches!(err, Error::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_podcast_without_peers_is_noop() {
        let server = local_server().await;

        server.podcast().await;

        server.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_podcast_skips_dead_peer() {
        let server = local_server().await;
        let dead_port = probe_free_port().await.expect("probe");
        server
            .state
            .registry
            .lock()
            .connect(addr(9), dead_port, "ghost");

        // Must return despite the unreachable peer.
        server.podcast().await;
        assert_eq!(server.peers().len(), 1);

        server.stop().await.expect("stop");
    }
}
