//! Outbound protocol calls.
//!
//! One call is one HTTP POST to the peer's `/` carrying a message
//! envelope; the reply body is decoded as the response envelope before
//! the call returns. Calls are synchronous from the caller's point of
//! view: no pipelining, requests to one peer resolve in issue order.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::Message;

// ============================================================================
// Constants
// ============================================================================

/// Transport timeout for one outbound exchange.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Outbound
// ============================================================================

/// Outbound side of an endpoint.
#[derive(Clone, Debug)]
pub struct Outbound {
    http: reqwest::Client,
}

impl Outbound {
    /// Creates the outbound caller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder().timeout(CALL_TIMEOUT).build()?;
        Ok(Self { http })
    }

    /// Sends one message to a peer and decodes the reply envelope.
    ///
    /// # Errors
    ///
    /// - [`Error::Http`] if the peer is unreachable or the exchange
    ///   times out.
    /// - [`Error::Protocol`] if the peer answers a non-success status
    ///   or an undecodable body.
    pub async fn call(&self, peer: SocketAddr, message: &Message) -> Result<Message> {
        let url = format!("http://{peer}/");
        debug!(peer = %peer, tag = message.tag(), "outbound call");

        let response = self.http.post(&url).json(message).send().await?;

        let status = response.status();
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            return Err(Error::protocol(format!("peer answered {status}: {reason}")));
        }

        let body = response.bytes().await?;
        Message::decode(&body)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::protocol::{ConnectRequest, ConnectResponse, EnvelopeHandler};
    use crate::session::acquire::probe_free_port;
    use crate::session::listener::PendingListener;

    /// Answers every envelope with a fixed connect verdict.
    struct VerdictHandler {
        accept: bool,
    }

    #[async_trait]
    impl EnvelopeHandler for VerdictHandler {
        async fn handle(&self, _peer: IpAddr, _body: &[u8]) -> Result<Vec<u8>> {
            let response: Message = ConnectResponse {
                accept: self.accept,
            }
            .into();
            response.encode()
        }
    }

    struct RejectingHandler;

    #[async_trait]
    impl EnvelopeHandler for RejectingHandler {
        async fn handle(&self, _peer: IpAddr, _body: &[u8]) -> Result<Vec<u8>> {
            Err(Error::protocol("unacceptable envelope"))
        }
    }

    fn local_peer(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[tokio::test]
    async fn test_call_decodes_typed_response() {
        let handle = PendingListener::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .expect("bind")
            .spawn(Arc::new(VerdictHandler { accept: true }));

        let outbound = Outbound::new().expect("outbound");
        let request: Message = ConnectRequest {
            username: "alice".to_string(),
            port: 9000,
        }
        .into();

        let response = outbound
            .call(local_peer(handle.port()), &request)
            .await
            .expect("call");
        assert!(matches!(
            response,
            Message::ConnectResponse(ConnectResponse { accept: true })
        ));

        handle.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_non_success_status_is_protocol_error() {
        let handle = PendingListener::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .expect("bind")
            .spawn(Arc::new(RejectingHandler));

        let outbound = Outbound::new().expect("outbound");
        let request: Message = ConnectRequest {
            username: "alice".to_string(),
            port: 9000,
        }
        .into();

        let err = outbound
            .call(local_peer(handle.port()), &request)
            .await
            .expect_err("must fail");
        assert!(err.is_protocol());

        handle.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_recoverable() {
        // A freshly probed port has nothing listening on it.
        let port = probe_free_port().await.expect("probe");

        let outbound = Outbound::new().expect("outbound");
        let request: Message = ConnectRequest {
            username: "alice".to_string(),
            port: 9000,
        }
        .into();

        let err = outbound
            .call(local_peer(port), &request)
            .await
            .expect_err("must fail");
        assert!(err.is_recoverable());
    }
}
