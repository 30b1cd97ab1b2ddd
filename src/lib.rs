//! Sync Play - Synchronized media playback across browser instances.
//!
//! This library keeps several browsers playing the same media in step.
//! Peers exchange a small JSON message set over HTTP; each applies the
//! received playback state to its own browser through WebDriver.
//!
//! # Architecture
//!
//! One peer runs as the server, every other peer as a client:
//!
//! - **Server**: registers clients, answers state pulls, pushes its
//!   state to everyone (`podcast`)
//! - **Client**: registers with one server, pulls state on demand
//!   (`sync`), applies pushed state
//!
//! Key design principles:
//!
//! - Every peer is an HTTP endpoint: a listener task answers inbound
//!   messages while the controlling task drives outbound exchanges
//! - State always flows server to client, pulled or pushed
//! - Browsers stay behind [`MediaAutomation`]; a flaky page degrades
//!   playback sync but never a protocol exchange
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sync_play::{DEFAULT_BUDGET, Result, SyncServer, WebDriverAutomation};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Drive a browser through a local geckodriver
//!     let automation = Arc::new(
//!         WebDriverAutomation::connect("http://localhost:4444", "firefox").await?,
//!     );
//!
//!     // Accept peers; push them our playback state
//!     let server = SyncServer::start(automation, DEFAULT_BUDGET).await?;
//!     println!("listening on port {}", server.port());
//!     server.podcast().await;
//!
//!     server.stop().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`automation`] | Browser boundary and its WebDriver implementation |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`protocol`] | Message model, URL fingerprints, role dispatch |
//! | [`registry`] | Connected peers, one per address |
//! | [`session`] | Server and client endpoints with their HTTP plumbing |
//!
//! # Supported Sites
//!
//! bilibili video and bangumi pages, mutefun players, and kugou song
//! pages; the recognition table lives at [`protocol::SITE_TABLE`].

// ============================================================================
// Modules
// ============================================================================

/// Browser automation boundary.
///
/// The protocol layer sees one capability, [`MediaAutomation`];
/// [`WebDriverAutomation`] implements it over a local driver process.
pub mod automation;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Protocol message types, URL fingerprints, and dispatch.
///
/// The nine-message model with its request/response pairing, plus the
/// role-split routing of inbound messages.
pub mod protocol;

/// Registry of connected peers.
///
/// One entry per address, in connection order.
pub mod registry;

/// Session endpoints.
///
/// [`SyncServer`] and [`SyncClient`] with the listener, outbound, and
/// port-acquisition plumbing under them.
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

// Automation types
pub use automation::webdriver::{DEFAULT_WEBDRIVER_URL, WebDriverAutomation};
pub use automation::{MediaAutomation, PlaybackState};

// Error types
pub use error::{Error, Result};

// Protocol types
pub use protocol::{Message, SiteKind, UrlFingerprint};

// Registry types
pub use registry::{ConnectionRegistry, PeerConnection};

// Session types
pub use session::{DEFAULT_BUDGET, SyncClient, SyncServer};
