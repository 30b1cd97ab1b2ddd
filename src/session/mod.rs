//! Session endpoints and their HTTP plumbing.
//!
//! Every peer is an HTTP endpoint: a listener task answers inbound
//! messages while the controlling task drives outbound exchanges. The
//! same plumbing carries both roles; only the dispatched half of the
//! protocol differs.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  connect / disconnect / sync  ┌──────────────┐
//! │    client    │──────────────────────────────►│    server    │
//! │ controlling  │         HTTP POST /           │   listener   │
//! └──────────────┘                               └──────────────┘
//! ┌──────────────┐           podcast             ┌──────────────┐
//! │    client    │◄──────────────────────────────│    server    │
//! │   listener   │         HTTP POST /           │ controlling  │
//! └──────────────┘                               └──────────────┘
//! ```
//!
//! # Endpoint Lifecycle
//!
//! 1. [`SyncServer::start`] - Probe a free port and bind the listener,
//!    within a retry budget
//! 2. [`SyncClient::start`] - Probe, register with the server, bind
//! 3. [`SyncClient::sync`] / [`SyncServer::podcast`] - State flows
//!    server to client, pulled or pushed
//! 4. `stop` - Departure notice (client only), then listener signal
//!    and join
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `acquire` | Port probing and retry budgets |
//! | `listener` | Listener task serving the wire protocol |
//! | `outbound` | Requests to peer endpoints |
//! | `server` | Server endpoint |
//! | `client` | Client endpoint |

// ============================================================================
// Submodules
// ============================================================================

/// Port probing and retry budgets.
pub mod acquire;

/// Client endpoint.
pub mod client;

/// Listener task serving the wire protocol.
pub mod listener;

/// Requests to peer endpoints.
pub mod outbound;

/// Server endpoint.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use acquire::{DEFAULT_BUDGET, RetryBudget, probe_free_port};
pub use client::SyncClient;
pub use listener::{ListenerHandle, PendingListener};
pub use outbound::Outbound;
pub use server::{DEFAULT_BIND_IP, SyncServer};

// ============================================================================
// Tests
// ============================================================================
