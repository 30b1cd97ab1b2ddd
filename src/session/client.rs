//! Client endpoint: joined to one server.
//!
//! A [`SyncClient`] starts by acquiring a local port within a retry
//! budget: probe a free port, announce it to the server in a connect
//! request, then bind the listener on it. The order matters — the
//! server learns the port before the listener exists, so a bind
//! failure withdraws the registration with a best-effort disconnect
//! before the next attempt. A declined handshake is definitive and
//! ends the budget early; only transport failures are retried.
//!
//! Once started, the listener task answers the server's pushes while
//! the controlling task pulls state on demand. Both paths funnel
//! through the same client dispatch, so a pulled sync response and a
//! pushed podcast request apply state identically.

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::automation::MediaAutomation;
use crate::error::{Error, Result};
use crate::protocol::{
    ClientDispatcher, ClientHandler, ConnectRequest, ConnectResponse, DisconnectRequest,
    DisconnectResponse, Message, PodcastRequest, PodcastResponse, Role, SyncRequest, SyncResponse,
    VoidResponse, dispatch_client,
};

use super::acquire::{RetryBudget, probe_free_port};
use super::listener::{ListenerHandle, PendingListener};
use super::outbound::Outbound;
use super::server::DEFAULT_BIND_IP;

// ============================================================================
// ClientState
// ============================================================================

/// State shared between the listener task and the controlling task.
pub(super) struct ClientState {
    /// Local playback boundary.
    pub(super) automation: Arc<dyn MediaAutomation>,
}

impl std::fmt::Debug for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientState").finish_non_exhaustive()
    }
}

#[async_trait]
impl ClientHandler for ClientState {
    async fn handle_connect_response(&self, response: ConnectResponse) -> VoidResponse {
        // The handshake reads its verdict inline; one arriving here is
        // outside any exchange we initiated.
        debug!(accept = response.accept, "unsolicited connect response");
        response.generate_response()
    }

    async fn handle_disconnect_response(&self, response: DisconnectResponse) -> VoidResponse {
        debug!("departure acknowledged");
        response.generate_response()
    }

    async fn handle_sync_response(&self, response: SyncResponse) -> VoidResponse {
        debug!(url = %response.fingerprint, time = response.time, "sync state received");
        let void = response.generate_response();
        self.automation.apply_state(response.into()).await;
        void
    }

    async fn handle_podcast_request(&self, request: PodcastRequest) -> PodcastResponse {
        info!(
            url = %request.fingerprint,
            time = request.time,
            paused = request.paused,
            "podcast received"
        );
        let reply = request.generate_response(true);
        self.automation.apply_state(request.into()).await;
        reply
    }
}

// ============================================================================
// SyncClient
// ============================================================================

/// A running client endpoint.
///
/// # Lifecycle
///
/// 1. [`start`](Self::start) acquires a local port, registers with the
///    server, and binds the listener; the retry budget bounds the whole
///    sequence. A declined registration yields
///    [`Error::ConnectRejected`], an exhausted budget
///    [`Error::Unavailable`].
/// 2. [`sync`](Self::sync) pulls the server's state and applies it;
///    pushed podcasts apply through the listener without intervention.
/// 3. [`stop`](Self::stop) consumes the client, sends a best-effort
///    departure notice, and joins the listener task.
#[derive(Debug)]
pub struct SyncClient {
    state: Arc<ClientState>,
    outbound: Outbound,
    server: SocketAddr,
    username: String,
    listener: ListenerHandle,
}

impl SyncClient {
    // ------------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------------

    /// Starts a client listening on all interfaces.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectRejected`] when the server declines the
    /// registration and [`Error::Unavailable`] when no port could be
    /// acquired within `budget`; a zero budget fails without touching
    /// the network.
    pub async fn start(
        server: SocketAddr,
        username: impl Into<String>,
        automation: Arc<dyn MediaAutomation>,
        budget: Duration,
    ) -> Result<Self> {
        Self::start_on(DEFAULT_BIND_IP, server, username, automation, budget).await
    }

    /// Starts a client with the listener bound to a specific interface.
    ///
    /// # Errors
    ///
    /// Same as [`start`](Self::start).
    pub async fn start_on(
        ip: IpAddr,
        server: SocketAddr,
        username: impl Into<String>,
        automation: Arc<dyn MediaAutomation>,
        budget: Duration,
    ) -> Result<Self> {
        let username = username.into();
        let state = Arc::new(ClientState { automation });
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
            match Self::request_join(&outbound, server, &username, port).await {
                Ok(true) => {}
                Ok(false) => return Err(Error::ConnectRejected),
                Err(err) if err.is_recoverable() => {
                    debug!(error = %err, "handshake failed, retrying");
                    retry.pause().await;
                    continue;
                }
                Err(err) => return Err(err),
            }
            match PendingListener::bind(ip, port).await {
                Ok(pending) => break pending,
                Err(err) => {
                    // The server already holds our registration; take
                    // it back before the next attempt re-announces.
                    warn!(port, error = %err, "bind failed after acceptance, withdrawing");
                    Self::send_departure(&outbound, server, &username).await;
                    if err.is_recoverable() {
                        retry.pause().await;
                        continue;
                    }
                    return Err(err);
                }
            }
        };

        let listener = pending.spawn(Arc::new(ClientDispatcher::new(state.clone())));
        info!(
            server = %server,
            port = listener.port(),
            username = %username,
            "client endpoint started"
        );

        Ok(Self {
            state,
            outbound,
            server,
            username,
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

    /// Address of the server this client registered with.
    #[inline]
    #[must_use]
    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Username announced to the server.
    #[inline]
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Re-announces this client to the server.
    ///
    /// Returns the server's verdict; a server that still holds our
    /// registration declines the duplicate.
    ///
    /// # Errors
    ///
    /// Transport failures and ill-matched replies.
    pub async fn connect(&self) -> Result<bool> {
        Self::request_join(&self.outbound, self.server, &self.username, self.port()).await
    }

    /// Pulls the server's playback state and applies it locally.
    ///
    /// # Errors
    ///
    /// Transport failures and ill-matched replies; the apply itself
    /// never fails.
    pub async fn sync(&self) -> Result<()> {
        let request: Message = SyncRequest {}.into();
        let reply = self.outbound.call(self.server, &request).await?;
        dispatch_client(self.state.as_ref(), reply).await?;
        Ok(())
    }

    /// Notifies the server of our departure, best effort.
    pub async fn disconnect(&self) {
        Self::send_departure(&self.outbound, self.server, &self.username).await;
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Stops the client: departure notice, then listener shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ListenerFailed`] if the listener task
    /// panicked; the departure notice itself never fails.
    pub async fn stop(self) -> Result<()> {
        self.disconnect().await;
        info!(port = self.listener.port(), "stopping client endpoint");
        self.listener.stop().await
    }

    // ------------------------------------------------------------------------
    // Handshake
    // ------------------------------------------------------------------------

    /// Announces `username` with a callback `port`; returns the verdict.
    async fn request_join(
        outbound: &Outbound,
        server: SocketAddr,
        username: &str,
        port: u16,
    ) -> Result<bool> {
        let request: Message = ConnectRequest {
            username: username.to_string(),
            port,
        }
        .into();
        match outbound.call(server, &request).await? {
            Message::ConnectResponse(response) => Ok(response.accept),
            other => Err(Error::unexpected_message(other.tag(), Role::Client)),
        }
    }

    /// Sends a disconnect request, logging instead of failing.
    async fn send_departure(outbound: &Outbound, server: SocketAddr, username: &str) {
        let request: Message = DisconnectRequest {
            username: username.to_string(),
        }
        .into();
        match outbound.call(server, &request).await {
            Ok(Message::DisconnectResponse(_)) => debug!("departure acknowledged"),
            Ok(other) => warn!(tag = other.tag(), "unexpected departure reply"),
            Err(err) => warn!(error = %err, "departure notice failed"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
