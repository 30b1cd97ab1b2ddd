//! Peer synchronization protocol types.
//!
//! This module defines the wire messages peers exchange, the URL
//! fingerprints those messages carry, and the role-split dispatch that
//! routes inbound messages to handler logic.
//!
//! # Protocol Overview
//!
//! | Message Tag | Direction | Purpose |
//! |-------------|-----------|---------|
//! | `connect-request` / `connect-response` | Client → Server / back | Join handshake |
//! | `disconnect-request` / `disconnect-response` | Client → Server / back | Departure |
//! | `sync-request` / `sync-response` | Client → Server / back | State pull |
//! | `podcast-request` / `podcast-response` | Server → Client / back | State push |
//! | `void-response` | either, reply only | Terminal acknowledgement |
//!
//! Every exchange is one HTTP POST to `/` carrying a JSON envelope and
//! answering with another. Which tags an endpoint accepts depends on
//! its [`Role`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `message` | Message envelope and payload types |
//! | `fingerprint` | Supported-site URL canonicalization |
//! | `dispatch` | Role-split handler traits and routing |

// ============================================================================
// Submodules
// ============================================================================

/// Role-split handler traits and routing.
pub mod dispatch;

/// Supported-site URL canonicalization.
pub mod fingerprint;

/// Message envelope and payload types.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use dispatch::{
    ClientDispatcher, ClientHandler, EnvelopeHandler, Role, ServerDispatcher, ServerHandler,
    dispatch_client, dispatch_server,
};
pub use fingerprint::{SITE_TABLE, SiteKind, UrlFingerprint};
pub use message::{
    ConnectRequest, ConnectResponse, DisconnectRequest, DisconnectResponse, Message,
    PodcastRequest, PodcastResponse, SyncRequest, SyncResponse, VoidResponse,
};
