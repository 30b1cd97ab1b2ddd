//! Inbound HTTP listener for protocol envelopes.
//!
//! Each endpoint runs exactly one listener on a dedicated task. The
//! accept loop serves one connection at a time, to completion, before
//! accepting the next: handlers on an endpoint never overlap, and
//! requests observe each other's registry effects in arrival order.
//! Keep-alive is off; every exchange is its own connection.
//!
//! # Wire Mapping
//!
//! | Condition | Status |
//! |-----------|--------|
//! | POST `/` with a well-formed envelope | 200, response envelope |
//! | POST `/` with a malformed envelope | 400, bare-text reason |
//! | other path | 404 |
//! | other method | 405 |

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, SocketAddr};
use std::result::Result as StdResult;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, header};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::protocol::EnvelopeHandler;

// ============================================================================
// Constants
// ============================================================================

/// Cap on serving a single connection; protects the loop from wedged
/// or idle peers.
const SERVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Accept poll interval; bounds how long shutdown waits for the loop
/// to notice the flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// PendingListener
// ============================================================================

/// A listener that is bound but not yet serving.
///
/// Binding and serving are separate steps so a client endpoint can
/// claim its port, run the connect handshake, and only then start
/// serving; the bound port is already known in between.
///
/// # Example
///
/// ```ignore
/// use std::net::{IpAddr, Ipv4Addr};
///
/// let pending = PendingListener::bind(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0).await?;
/// let port = pending.port();
/// let handle = pending.spawn(dispatcher);
/// // ...
/// handle.stop().await?;
/// ```
pub struct PendingListener {
    /// TCP listener for incoming connections.
    listener: TcpListener,
    /// Port the listener is bound to.
    port: u16,
}

impl PendingListener {
    /// Binds a listener to the specified address and port.
    ///
    /// Use port 0 to let the OS assign a random available port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(ip: IpAddr, port: u16) -> Result<Self> {
        let addr = SocketAddr::new(ip, port);
        let listener = TcpListener::bind(addr).await?;
        let actual_port = listener.local_addr()?.port();

        debug!(port = actual_port, "listener bound");

        Ok(Self {
            listener,
            port: actual_port,
        })
    }

    /// Returns the port the listener is bound to.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Starts the accept loop on a dedicated task.
    ///
    /// The handler decides how envelopes are answered; the listener
    /// owns everything HTTP.
    #[must_use]
    pub fn spawn(self, handler: Arc<dyn EnvelopeHandler>) -> ListenerHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let port = self.port;

        let task = tokio::spawn(accept_loop(self.listener, handler, flag));

        info!(port, "listener started");

        ListenerHandle {
            port,
            shutdown,
            task,
        }
    }
}

// ============================================================================
// ListenerHandle
// ============================================================================

/// Running listener task. Dropping the handle without calling
/// [`ListenerHandle::stop`] leaves the task serving until the runtime
/// shuts down.
#[derive(Debug)]
pub struct ListenerHandle {
    port: u16,
    shutdown: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Returns the port the listener serves on.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Signals the accept loop to stop and joins it.
    ///
    /// An in-flight exchange finishes before this returns; afterwards
    /// the port is free to bind again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ListenerFailed`] if the listener task
    /// panicked.
    pub async fn stop(self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.task.await?;

        debug!(port = self.port, "listener stopped");
        Ok(())
    }
}

// ============================================================================
// Accept Loop
// ============================================================================

/// Background task that accepts and serves connections sequentially.
async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn EnvelopeHandler>,
    shutdown: Arc<AtomicBool>,
) {
    debug!("accept loop started");

    loop {
        if shutdown.load(Ordering::SeqCst) {
            debug!("accept loop shutting down");
            break;
        }

        // Accept with timeout to allow checking the shutdown flag.
        match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
            Ok(Ok((stream, addr))) => {
                // Served inline: the next connection is not accepted
                // until this exchange completes.
                if let Err(err) = serve_connection(stream, addr, &handler).await {
                    warn!(error = %err, ?addr, "connection serve failed");
                }
            }
            Ok(Err(err)) => {
                error!(error = %err, "accept failed");
            }
            Err(_) => {
                // Poll timeout, recheck the shutdown flag.
                continue;
            }
        }
    }

    debug!("accept loop terminated");
}

/// Serves the single HTTP exchange of one connection.
async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handler: &Arc<dyn EnvelopeHandler>,
) -> Result<()> {
    debug!(?addr, "connection accepted");

    let peer = addr.ip();
    let handler = Arc::clone(handler);
    let service = service_fn(move |request: Request<Incoming>| {
        let handler = Arc::clone(&handler);
        async move { respond(handler.as_ref(), peer, request).await }
    });

    let connection = http1::Builder::new()
        .keep_alive(false)
        .serve_connection(TokioIo::new(stream), service);

    match timeout(SERVE_TIMEOUT, connection).await {
        Ok(result) => result.map_err(Error::from),
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "serving connection timed out",
        )
        .into()),
    }
}

/// Maps one HTTP request onto the envelope handler.
async fn respond(
    handler: &dyn EnvelopeHandler,
    peer: IpAddr,
    request: Request<Incoming>,
) -> StdResult<Response<Full<Bytes>>, hyper::Error> {
    if request.method() != Method::POST {
        return Ok(plain_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "method not allowed",
        ));
    }
    if request.uri().path() != "/" {
        return Ok(plain_response(StatusCode::NOT_FOUND, "not found"));
    }

    let body = request.into_body().collect().await?.to_bytes();

    match handler.handle(peer, &body).await {
        Ok(bytes) => Ok(envelope_response(bytes)),
        Err(err) => {
            warn!(peer = %peer, error = %err, "rejected inbound envelope");
            let mut response = Response::new(Full::new(Bytes::from(err.to_string())));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            Ok(response)
        }
    }
}

fn envelope_response(bytes: Vec<u8>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(bytes)));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}

fn plain_response(status: StatusCode, reason: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(reason.as_bytes())));
    *response.status_mut() = status;
    response
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::Ipv4Addr;

    use async_trait::async_trait;

    struct EchoHandler;

    #[async_trait]
    impl EnvelopeHandler for EchoHandler {
        async fn handle(&self, _peer: IpAddr, body: &[u8]) -> Result<Vec<u8>> {
            Ok(body.to_vec())
        }
    }

    struct RejectingHandler;

    #[async_trait]
    impl EnvelopeHandler for RejectingHandler {
        async fn handle(&self, _peer: IpAddr, _body: &[u8]) -> Result<Vec<u8>> {
            Err(Error::protocol("unacceptable envelope"))
        }
    }

    async fn spawn_listener(handler: Arc<dyn EnvelopeHandler>) -> ListenerHandle {
        PendingListener::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .expect("bind")
            .spawn(handler)
    }

    #[tokio::test]
    async fn test_bind_random_port() {
        let pending = PendingListener::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .expect("bind");
        assert!(pending.port() > 0);
    }

    #[tokio::test]
    async fn test_post_round_trip() {
        let handle = spawn_listener(Arc::new(EchoHandler)).await;
        let url = format!("http://127.0.0.1:{}/", handle.port());

        let response = reqwest::Client::new()
            .post(&url)
            .body(r#"{"type":"sync-request"}"#)
            .send()
            .await
            .expect("post");

        assert_eq!(response.status(), 200);
        let body = response.text().await.expect("body");
        assert_eq!(body, r#"{"type":"sync-request"}"#);

        handle.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_rejects_non_post() {
        let handle = spawn_listener(Arc::new(EchoHandler)).await;
        let url = format!("http://127.0.0.1:{}/", handle.port());

        let response = reqwest::Client::new().get(&url).send().await.expect("get");
        assert_eq!(response.status(), 405);

        handle.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_rejects_unknown_path() {
        let handle = spawn_listener(Arc::new(EchoHandler)).await;
        let url = format!("http://127.0.0.1:{}/other", handle.port());

        let response = reqwest::Client::new()
            .post(&url)
            .body("{}")
            .send()
            .await
            .expect("post");
        assert_eq!(response.status(), 404);

        handle.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_handler_error_maps_to_400() {
        let handle = spawn_listener(Arc::new(RejectingHandler)).await;
        let url = format!("http://127.0.0.1:{}/", handle.port());

        let response = reqwest::Client::new()
            .post(&url)
            .body("{}")
            .send()
            .await
            .expect("post");

        assert_eq!(response.status(), 400);
        let reason = response.text().await.expect("body");
        assert!(reason.contains("unacceptable envelope"));

        handle.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_stop_joins_and_frees_port() {
        let handle = spawn_listener(Arc::new(EchoHandler)).await;
        let port = handle.port();

        handle.stop().await.expect("stop");

        // The port is bindable again once stop has joined.
        let rebind = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await;
        assert!(rebind.is_ok());
    }
}
