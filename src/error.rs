//! Error types for the playback synchronization crate.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use sync_play::{Result, SyncClient};
//!
//! async fn example(client: &SyncClient) -> Result<()> {
//!     client.sync().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Protocol | [`Error::Protocol`], [`Error::UnexpectedMessage`] |
//! | Handshake | [`Error::ConnectRejected`], [`Error::Unavailable`] |
//! | Automation | [`Error::Automation`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::Http`], [`Error::Serve`], [`Error::ListenerFailed`] |
//!
//! A declined connection is not a transport failure: [`Error::ConnectRejected`]
//! means the peer answered and said no, while [`Error::Unavailable`] means no
//! usable answer arrived within the retry budget. Callers can rely on the
//! distinction.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::task::JoinError;

use crate::protocol::Role;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation.
    ///
    /// Returned when a wire envelope has no recognized `type` tag, is missing
    /// a required field, or a peer answered with a non-success HTTP status.
    /// Fatal for the exchange it occurred in; endpoint state is untouched.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Message outside the receiving role's set.
    ///
    /// Returned when a decoded message is valid but not one the dispatching
    /// role handles, e.g. a `sync-request` arriving at a client or a
    /// `void-response` used as a request.
    #[error("Unexpected message for {role} role: {tag}")]
    UnexpectedMessage {
        /// Wire tag of the offending message.
        tag: String,
        /// Role that refused it.
        role: Role,
    },

    // ========================================================================
    // Handshake Errors
    // ========================================================================
    /// Peer declined the connect handshake.
    ///
    /// The peer answered `accept = false`, typically because another
    /// connection from the same address is already registered. Definitive;
    /// retrying without operator action cannot succeed.
    #[error("Connection rejected by peer")]
    ConnectRejected,

    /// No endpoint could be established within the retry budget.
    ///
    /// Returned when port acquisition or the connect handshake kept failing
    /// until the deadline. A zero budget yields this immediately.
    #[error("Unavailable after {timeout_ms}ms")]
    Unavailable {
        /// Milliseconds of budget that elapsed.
        timeout_ms: u64,
    },

    // ========================================================================
    // Automation Errors
    // ========================================================================
    /// Browser automation failure.
    ///
    /// Internal to automation backends; the capability boundary degrades
    /// these to idle state or a skipped apply rather than surfacing them.
    #[error("Automation error: {message}")]
    Automation {
        /// Description of the automation failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP serve error on an inbound connection.
    #[error("HTTP serve error: {0}")]
    Serve(#[from] hyper::Error),

    /// Listener task failed to join.
    #[error("Listener task failed: {0}")]
    ListenerFailed(#[from] JoinError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an unexpected message error.
    #[inline]
    pub fn unexpected_message(tag: impl Into<String>, role: Role) -> Self {
        Self::UnexpectedMessage {
            tag: tag.into(),
            role,
        }
    }

    /// Creates an unavailable error.
    #[inline]
    pub fn unavailable(timeout_ms: u64) -> Self {
        Self::Unavailable { timeout_ms }
    }

    /// Creates an automation error.
    #[inline]
    pub fn automation(message: impl Into<String>) -> Self {
        Self::Automation {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a protocol-class error.
    ///
    /// Protocol errors abort a single exchange without touching endpoint
    /// state.
    #[inline]
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. } | Self::UnexpectedMessage { .. })
    }

    /// Returns `true` if the peer explicitly declined.
    #[inline]
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::ConnectRejected)
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Unavailable { .. } => true,
            Self::Http(err) => err.is_timeout(),
            _ => false,
        }
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry; the acquisition loop keeps
    /// going on these and gives up on everything else.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Io(_))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::protocol("missing type tag");
        assert_eq!(err.to_string(), "Protocol error: missing type tag");
    }

    #[test]
    fn test_unexpected_message_display() {
        let err = Error::unexpected_message("sync-request", Role::Client);
        assert_eq!(
            err.to_string(),
            "Unexpected message for client role: sync-request"
        );
    }

    #[test]
    fn test_is_protocol() {
        let protocol_err = Error::protocol("bad envelope");
        let unexpected_err = Error::unexpected_message("void-response", Role::Server);
        let other_err = Error::ConnectRejected;

        assert!(protocol_err.is_protocol());
        assert!(unexpected_err.is_protocol());
        assert!(!other_err.is_protocol());
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::unavailable(2000);
        let other_err = Error::protocol("test");

        assert!(timeout_err.is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_recoverable() {
        let io_err: Error = IoError::new(ErrorKind::ConnectionRefused, "refused").into();
        let rejected_err = Error::ConnectRejected;

        assert!(io_err.is_recoverable());
        assert!(!rejected_err.is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
