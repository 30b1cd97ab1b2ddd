//! Request and Response message types.
//!
//! Defines the JSON envelopes peers exchange over HTTP. Every envelope
//! carries a `type` tag naming one of the nine variants; the remaining
//! fields are the variant's payload. Request payloads know how to build
//! their paired response type, so a handler cannot answer a request
//! with the wrong message shape.
//!
//! # Format
//!
//! ```json
//! { "type": "connect-request", "username": "alice", "port": 18452 }
//! ```
//!
//! ```json
//! {
//!   "type": "sync-response",
//!   "fingerprint": { "site": "bilibili-video", "url": "https://www.bilibili.com/video/BV1vx4y147cK" },
//!   "time": 171.3,
//!   "paused": false
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::UrlFingerprint;

// ============================================================================
// Message Envelope
// ============================================================================

/// A protocol message, tagged on the wire by `type`.
///
/// The set is closed: an envelope with any other tag fails to decode.
/// Requests and responses share the one envelope shape because every
/// exchange is a single POST whose reply body is itself a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    /// Client asks to join; payload carries its callback port.
    ConnectRequest(ConnectRequest),
    /// Server's verdict on a connect request.
    ConnectResponse(ConnectResponse),
    /// Client announces departure.
    DisconnectRequest(DisconnectRequest),
    /// Server acknowledges a departure.
    DisconnectResponse(DisconnectResponse),
    /// Client asks for the server's playback state.
    SyncRequest(SyncRequest),
    /// Server's playback state.
    SyncResponse(SyncResponse),
    /// Server pushes its playback state to a client.
    PodcastRequest(PodcastRequest),
    /// Client's verdict on a pushed state (advisory).
    PodcastResponse(PodcastResponse),
    /// Terminal acknowledgement; never sent as a request.
    VoidResponse(VoidResponse),
}

impl Message {
    /// Decodes a wire envelope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] when the bytes are not a JSON object,
    /// the `type` tag is absent or unknown, or a required payload field
    /// is missing. Fingerprint fields are taken verbatim from the wire.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|err| Error::protocol(err.to_string()))
    }

    /// Encodes this message as a wire envelope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails, e.g. a
    /// non-finite playback time.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Returns the wire tag of this message.
    #[inline]
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::ConnectRequest(_) => "connect-request",
            Self::ConnectResponse(_) => "connect-response",
            Self::DisconnectRequest(_) => "disconnect-request",
            Self::DisconnectResponse(_) => "disconnect-response",
            Self::SyncRequest(_) => "sync-request",
            Self::SyncResponse(_) => "sync-response",
            Self::PodcastRequest(_) => "podcast-request",
            Self::PodcastResponse(_) => "podcast-response",
            Self::VoidResponse(_) => "void-response",
        }
    }
}

// ============================================================================
// Connect
// ============================================================================

/// Join request sent by a client right after it has reserved a local
/// port for its own listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectRequest {
    /// Display name of the connecting peer.
    pub username: String,
    /// Port the peer's own listener will serve on; podcast deliveries
    /// target it.
    pub port: u16,
}

impl ConnectRequest {
    /// Builds the paired [`ConnectResponse`].
    #[inline]
    #[must_use]
    pub fn generate_response(&self, accept: bool) -> ConnectResponse {
        ConnectResponse { accept }
    }
}

/// Server verdict on a [`ConnectRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectResponse {
    /// `false` when another peer is already registered at the same
    /// address.
    pub accept: bool,
}

impl ConnectResponse {
    /// Builds the terminal [`VoidResponse`].
    #[inline]
    #[must_use]
    pub fn generate_response(&self) -> VoidResponse {
        VoidResponse {}
    }
}

// ============================================================================
// Disconnect
// ============================================================================

/// Departure notice sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisconnectRequest {
    /// Display name of the departing peer.
    pub username: String,
}

impl DisconnectRequest {
    /// Builds the paired [`DisconnectResponse`].
    #[inline]
    #[must_use]
    pub fn generate_response(&self) -> DisconnectResponse {
        DisconnectResponse {}
    }
}

/// Acknowledgement of a [`DisconnectRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisconnectResponse {}

impl DisconnectResponse {
    /// Builds the terminal [`VoidResponse`].
    #[inline]
    #[must_use]
    pub fn generate_response(&self) -> VoidResponse {
        VoidResponse {}
    }
}

// ============================================================================
// Sync
// ============================================================================

/// Pull request for the server's playback state. Carries no payload;
/// the caller is identified by its address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {}

impl SyncRequest {
    /// Builds the paired [`SyncResponse`].
    #[inline]
    #[must_use]
    pub fn generate_response(
        &self,
        fingerprint: UrlFingerprint,
        time: f64,
        paused: bool,
    ) -> SyncResponse {
        SyncResponse {
            fingerprint,
            time,
            paused,
        }
    }
}

/// The server's playback state at the moment a sync request arrived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Identity of the playing page, or void.
    pub fingerprint: UrlFingerprint,
    /// Media position in seconds.
    pub time: f64,
    /// Whether playback is paused.
    pub paused: bool,
}

impl SyncResponse {
    /// Builds the terminal [`VoidResponse`].
    #[inline]
    #[must_use]
    pub fn generate_response(&self) -> VoidResponse {
        VoidResponse {}
    }
}

// ============================================================================
// Podcast
// ============================================================================

/// State pushed by the server to one connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodcastRequest {
    /// Identity of the playing page, or void.
    pub fingerprint: UrlFingerprint,
    /// Media position in seconds.
    pub time: f64,
    /// Whether playback is paused.
    pub paused: bool,
}

impl PodcastRequest {
    /// Builds the paired [`PodcastResponse`].
    #[inline]
    #[must_use]
    pub fn generate_response(&self, accept: bool) -> PodcastResponse {
        PodcastResponse { accept }
    }
}

/// Client verdict on a [`PodcastRequest`]. Advisory: the server logs a
/// decline and changes nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodcastResponse {
    /// Whether the client applied the pushed state.
    pub accept: bool,
}

impl PodcastResponse {
    /// Builds the terminal [`VoidResponse`].
    #[inline]
    #[must_use]
    pub fn generate_response(&self) -> VoidResponse {
        VoidResponse {}
    }
}

// ============================================================================
// Void
// ============================================================================

/// Terminal acknowledgement for exchanges that need no meaningful
/// reply. It has no `generate_response`; feeding it to a dispatcher is
/// a protocol error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoidResponse {}

// ============================================================================
// Conversions
// ============================================================================

impl From<ConnectRequest> for Message {
    fn from(payload: ConnectRequest) -> Self {
        Self::ConnectRequest(payload)
    }
}

impl From<ConnectResponse> for Message {
    fn from(payload: ConnectResponse) -> Self {
        Self::ConnectResponse(payload)
    }
}

impl From<DisconnectRequest> for Message {
    fn from(payload: DisconnectRequest) -> Self {
        Self::DisconnectRequest(payload)
    }
}

impl From<DisconnectResponse> for Message {
    fn from(payload: DisconnectResponse) -> Self {
        Self::DisconnectResponse(payload)
    }
}

impl From<SyncRequest> for Message {
    fn from(payload: SyncRequest) -> Self {
        Self::SyncRequest(payload)
    }
}

impl From<SyncResponse> for Message {
    fn from(payload: SyncResponse) -> Self {
        Self::SyncResponse(payload)
    }
}

impl From<PodcastRequest> for Message {
    fn from(payload: PodcastRequest) -> Self {
        Self::PodcastRequest(payload)
    }
}

impl From<PodcastResponse> for Message {
    fn from(payload: PodcastResponse) -> Self {
        Self::PodcastResponse(payload)
    }
}

impl From<VoidResponse> for Message {
    fn from(payload: VoidResponse) -> Self {
        Self::VoidResponse(payload)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_fingerprint() -> UrlFingerprint {
        UrlFingerprint::parse("https://www.bilibili.com/video/BV1vx4y147cK")
    }

    #[test]
    fn test_all_variants_round_trip() {
        let messages: Vec<Message> = vec![
            ConnectRequest {
                username: "alice".to_string(),
                port: 18452,
            }
            .into(),
            ConnectResponse { accept: true }.into(),
            DisconnectRequest {
                username: "alice".to_string(),
            }
            .into(),
            DisconnectResponse {}.into(),
            SyncRequest {}.into(),
            SyncResponse {
                fingerprint: sample_fingerprint(),
                time: 171.3,
                paused: false,
            }
            .into(),
            PodcastRequest {
                fingerprint: UrlFingerprint::Void,
                time: 0.0,
                paused: false,
            }
            .into(),
            PodcastResponse { accept: false }.into(),
            VoidResponse {}.into(),
        ];

        for message in messages {
            let bytes = message.encode().expect("encode");
            let back = Message::decode(&bytes).expect("decode");
            assert_eq!(message, back);
        }
    }

    #[test]
    fn test_wire_shape() {
        let message: Message = SyncResponse {
            fingerprint: sample_fingerprint(),
            time: 12.5,
            paused: true,
        }
        .into();

        let json = String::from_utf8(message.encode().expect("encode")).expect("utf8");
        assert!(json.contains(r#""type":"sync-response""#));
        assert!(json.contains(r#""fingerprint":{"site":"bilibili-video""#));
        assert!(json.contains(r#""time":12.5"#));
        assert!(json.contains(r#""paused":true"#));
    }

    #[test]
    fn test_empty_payload_serializes_bare() {
        let message: Message = SyncRequest {}.into();
        let json = String::from_utf8(message.encode().expect("encode")).expect("utf8");
        assert_eq!(json, r#"{"type":"sync-request"}"#);
    }

    #[test]
    fn test_decode_empty_object_fails() {
        let err = Message::decode(b"{}").expect_err("must fail");
        assert!(err.is_protocol());
    }

    #[test]
    fn test_decode_unknown_tag_fails() {
        let err = Message::decode(br#"{"type":"bogus"}"#).expect_err("must fail");
        assert!(err.is_protocol());
    }

    #[test]
    fn test_decode_missing_field_fails() {
        // connect-request without its port
        let err = Message::decode(br#"{"type":"connect-request","username":"alice"}"#)
            .expect_err("must fail");
        assert!(err.is_protocol());
    }

    #[test]
    fn test_decode_not_json_fails() {
        let err = Message::decode(b"not json at all").expect_err("must fail");
        assert!(err.is_protocol());
    }

    #[test]
    fn test_generate_response_pairing() {
        let connect = ConnectRequest {
            username: "alice".to_string(),
            port: 9000,
        };
        assert!(connect.generate_response(true).accept);
        assert!(!connect.generate_response(false).accept);

        let disconnect = DisconnectRequest {
            username: "alice".to_string(),
        };
        let _: DisconnectResponse = disconnect.generate_response();

        let sync = SyncRequest {};
        let response = sync.generate_response(sample_fingerprint(), 30.0, true);
        assert_eq!(response.fingerprint, sample_fingerprint());
        assert_eq!(response.time, 30.0);
        assert!(response.paused);

        let podcast = PodcastRequest {
            fingerprint: UrlFingerprint::Void,
            time: 0.0,
            paused: false,
        };
        assert!(podcast.generate_response(true).accept);
    }

    #[test]
    fn test_void_tag() {
        let message: Message = VoidResponse {}.into();
        assert_eq!(message.tag(), "void-response");
        let json = String::from_utf8(message.encode().expect("encode")).expect("utf8");
        assert_eq!(json, r#"{"type":"void-response"}"#);
    }
}
