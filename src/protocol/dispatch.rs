//! Role-split dispatch of inbound messages.
//!
//! Server and client endpoints accept disjoint halves of the message
//! set; a message landing on the wrong role is refused, never ignored:
//!
//! | Role | Accepted tags |
//! |------|---------------|
//! | server | `connect-request`, `disconnect-request`, `sync-request`, `podcast-response` |
//! | client | `connect-response`, `disconnect-response`, `sync-response`, `podcast-request` |
//!
//! Handler methods are infallible: whatever the local automation layer
//! may be going through, the protocol answer is always a well-formed
//! message. The only failures dispatch can produce are protocol-class
//! (undecodable envelope, wrong-role tag).

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};

use super::message::{
    ConnectRequest, ConnectResponse, DisconnectRequest, DisconnectResponse, Message,
    PodcastRequest, PodcastResponse, SyncRequest, SyncResponse, VoidResponse,
};

// ============================================================================
// Role
// ============================================================================

/// Which half of the protocol an endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepts peers and answers their requests.
    Server,
    /// Connected to one server; answers its pushes.
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => f.write_str("server"),
            Self::Client => f.write_str("client"),
        }
    }
}

// ============================================================================
// Handler Traits
// ============================================================================

/// Server-side message handlers.
///
/// Every method receives the caller's address; connect and disconnect
/// use it as the peer's identity, sync uses it to decide whether the
/// caller is a registered peer.
#[async_trait]
pub trait ServerHandler: Send + Sync {
    /// Handles a join request.
    async fn handle_connect_request(&self, peer: IpAddr, request: ConnectRequest)
    -> ConnectResponse;

    /// Handles a departure notice.
    async fn handle_disconnect_request(
        &self,
        peer: IpAddr,
        request: DisconnectRequest,
    ) -> DisconnectResponse;

    /// Handles a state pull.
    async fn handle_sync_request(&self, peer: IpAddr, request: SyncRequest) -> SyncResponse;

    /// Handles a client's verdict on a pushed state.
    async fn handle_podcast_response(
        &self,
        peer: IpAddr,
        response: PodcastResponse,
    ) -> VoidResponse;
}

/// Client-side message handlers.
#[async_trait]
pub trait ClientHandler: Send + Sync {
    /// Handles the server's verdict on our join request.
    async fn handle_connect_response(&self, response: ConnectResponse) -> VoidResponse;

    /// Handles the acknowledgement of our departure.
    async fn handle_disconnect_response(&self, response: DisconnectResponse) -> VoidResponse;

    /// Handles the state we pulled from the server.
    async fn handle_sync_response(&self, response: SyncResponse) -> VoidResponse;

    /// Handles a state pushed by the server.
    async fn handle_podcast_request(&self, request: PodcastRequest) -> PodcastResponse;
}

// ============================================================================
// Dispatch
// ============================================================================

/// Routes one message to a server-role handler.
///
/// # Errors
///
/// Returns [`Error::UnexpectedMessage`] for tags outside the server
/// set, including `void-response`.
pub async fn dispatch_server<H>(handler: &H, peer: IpAddr, message: Message) -> Result<Message>
where
    H: ServerHandler + ?Sized,
{
    match message {
        Message::ConnectRequest(request) => {
            Ok(handler.handle_connect_request(peer, request).await.into())
        }
        Message::DisconnectRequest(request) => Ok(handler
            .handle_disconnect_request(peer, request)
            .await
            .into()),
        Message::SyncRequest(request) => {
            Ok(handler.handle_sync_request(peer, request).await.into())
        }
        Message::PodcastResponse(response) => Ok(handler
            .handle_podcast_response(peer, response)
            .await
            .into()),
        other => Err(Error::unexpected_message(other.tag(), Role::Server)),
    }
}

/// Routes one message to a client-role handler.
///
/// # Errors
///
/// Returns [`Error::UnexpectedMessage`] for tags outside the client
/// set, including `void-response`.
pub async fn dispatch_client<H>(handler: &H, message: Message) -> Result<Message>
where
    H: ClientHandler + ?Sized,
{
    match message {
        Message::ConnectResponse(response) => {
            Ok(handler.handle_connect_response(response).await.into())
        }
        Message::DisconnectResponse(response) => {
            Ok(handler.handle_disconnect_response(response).await.into())
        }
        Message::SyncResponse(response) => Ok(handler.handle_sync_response(response).await.into()),
        Message::PodcastRequest(request) => {
            Ok(handler.handle_podcast_request(request).await.into())
        }
        other => Err(Error::unexpected_message(other.tag(), Role::Client)),
    }
}

// ============================================================================
// Envelope Adapters
// ============================================================================

/// Byte-level handler the listener serves: decode, dispatch, encode.
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    /// Handles one wire envelope and produces the response envelope.
    ///
    /// # Errors
    ///
    /// Protocol-class errors only; they map to an HTTP 400 at the
    /// listener.
    async fn handle(&self, peer: IpAddr, body: &[u8]) -> Result<Vec<u8>>;
}

/// Wires a [`ServerHandler`] into the listener.
pub struct ServerDispatcher {
    handler: Arc<dyn ServerHandler>,
}

impl ServerDispatcher {
    /// Creates a dispatcher around a server-role handler.
    #[inline]
    pub fn new(handler: Arc<dyn ServerHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl EnvelopeHandler for ServerDispatcher {
    async fn handle(&self, peer: IpAddr, body: &[u8]) -> Result<Vec<u8>> {
        let message = Message::decode(body)?;
        debug!(peer = %peer, tag = message.tag(), "dispatching server message");
        let response = dispatch_server(self.handler.as_ref(), peer, message).await?;
        response.encode()
    }
}

/// Wires a [`ClientHandler`] into the listener.
pub struct ClientDispatcher {
    handler: Arc<dyn ClientHandler>,
}

impl ClientDispatcher {
    /// Creates a dispatcher around a client-role handler.
    #[inline]
    pub fn new(handler: Arc<dyn ClientHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl EnvelopeHandler for ClientDispatcher {
    async fn handle(&self, peer: IpAddr, body: &[u8]) -> Result<Vec<u8>> {
        let message = Message::decode(body)?;
        debug!(peer = %peer, tag = message.tag(), "dispatching client message");
        let response = dispatch_client(self.handler.as_ref(), message).await?;
        response.encode()
    }
}

// ============================================================================
// Tests
// ============================================================================
