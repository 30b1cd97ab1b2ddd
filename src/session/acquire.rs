//! Bounded-retry resource acquisition.
//!
//! Starting an endpoint needs a free local port and, for clients, a
//! completed connect handshake. Both are raced against other processes
//! and the network, so each startup attempt runs inside a wall-clock
//! budget: failures pause briefly and retry until the deadline, then
//! surface as a definite [`Error::Unavailable`] value. A zero budget
//! fails before the first attempt, without touching the network.

// ============================================================================
// Imports
// ============================================================================

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::error::Result;

// ============================================================================
// Constants
// ============================================================================

/// Default wall-clock budget for starting an endpoint.
pub const DEFAULT_BUDGET: Duration = Duration::from_secs(2);

/// Pause between attempts inside the budget.
const RETRY_PAUSE: Duration = Duration::from_millis(100);

// ============================================================================
// Port Probe
// ============================================================================

/// Asks the OS for a currently free port.
///
/// Binds port 0, reads the assigned port and releases the socket. The
/// port may be taken again before the caller binds it; the retry budget
/// covers that race.
///
/// # Errors
///
/// Returns [`Error::Io`] if the probe bind fails.
///
/// [`Error::Io`]: crate::Error::Io
pub async fn probe_free_port() -> Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    let port = listener.local_addr()?.port();
    drop(listener);

    debug!(port, "probed free port");
    Ok(port)
}

// ============================================================================
// RetryBudget
// ============================================================================

/// Wall-clock deadline for a startup sequence.
///
/// # Example
///
/// ```ignore
/// let budget = RetryBudget::new(DEFAULT_BUDGET);
/// loop {
///     if budget.expired() {
///         return Err(Error::unavailable(budget.timeout_ms()));
///     }
///     match attempt().await {
///         Ok(endpoint) => return Ok(endpoint),
///         Err(err) if err.is_recoverable() => budget.pause().await,
///         Err(err) => return Err(err),
///     }
/// }
/// ```
#[derive(Debug)]
pub struct RetryBudget {
    deadline: Instant,
    budget: Duration,
}

impl RetryBudget {
    /// Starts a budget ending `budget` from now.
    #[must_use]
    pub fn new(budget: Duration) -> Self {
        Self {
            deadline: Instant::now() + budget,
            budget,
        }
    }

    /// Returns `true` once the deadline has passed.
    ///
    /// A zero budget is expired from the start.
    #[inline]
    #[must_use]
    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// The full budget in milliseconds, for error reporting.
    #[inline]
    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        self.budget.as_millis() as u64
    }

    /// Sleeps the inter-attempt pause.
    pub async fn pause(&self) {
        sleep(RETRY_PAUSE).await;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_returns_usable_port() {
        let port = probe_free_port().await.expect("probe");
        assert!(port > 0);

        // The probe released the port, so binding it should work.
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .expect("bind probed port");
        drop(listener);
    }

    #[tokio::test]
    async fn test_consecutive_probes_do_not_conflict() {
        let first = probe_free_port().await.expect("probe");
        let second = probe_free_port().await.expect("probe");
        // Ports may coincide after release; both must simply be valid.
        assert!(first > 0);
        assert!(second > 0);
    }

    #[test]
    fn test_zero_budget_is_expired() {
        let budget = RetryBudget::new(Duration::ZERO);
        assert!(budget.expired());
        assert_eq!(budget.timeout_ms(), 0);
    }

    #[test]
    fn test_fresh_budget_is_not_expired() {
        let budget = RetryBudget::new(Duration::from_secs(2));
        assert!(!budget.expired());
        assert_eq!(budget.timeout_ms(), 2000);
    }
}
