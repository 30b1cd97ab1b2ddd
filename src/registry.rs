//! Connected-peer registry kept by server endpoints.
//!
//! One entry per peer address: a second connect from an address that is
//! already registered is declined until the first entry disconnects.
//! The registry itself is a plain collection; the owning endpoint wraps
//! it in a mutex because the listener task and the controlling task
//! both touch it.

// ============================================================================
// Imports
// ============================================================================

use std::net::IpAddr;

// ============================================================================
// PeerConnection
// ============================================================================

/// One registered peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConnection {
    /// Peer address; the identity key.
    pub address: IpAddr,
    /// Port the peer's listener serves on; podcast deliveries target it.
    pub port: u16,
    /// Display name the peer connected with.
    pub username: String,
}

// ============================================================================
// ConnectionRegistry
// ============================================================================

/// Ordered set of connected peers, at most one per address.
///
/// Identity is the address alone: the username is display data and the
/// port may differ between two connect attempts from the same host
/// without making them distinct peers.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Vec<PeerConnection>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a peer.
    ///
    /// Returns `false` without mutating anything when the address is
    /// already registered.
    pub fn connect(&mut self, address: IpAddr, port: u16, username: impl Into<String>) -> bool {
        if self.is_connected(address) {
            return false;
        }
        self.connections.push(PeerConnection {
            address,
            port,
            username: username.into(),
        });
        true
    }

    /// Removes the peer registered at `address`.
    ///
    /// Returns `false` when no such peer exists; removing an absent
    /// peer is a no-op.
    pub fn disconnect(&mut self, address: IpAddr) -> bool {
        match self.connections.iter().position(|c| c.address == address) {
            Some(index) => {
                self.connections.remove(index);
                true
            }
            None => false,
        }
    }

    /// Returns `true` if a peer is registered at `address`.
    #[inline]
    #[must_use]
    pub fn is_connected(&self, address: IpAddr) -> bool {
        self.connections.iter().any(|c| c.address == address)
    }

    /// Snapshot of all peers, in connection order.
    ///
    /// A podcast iterates this snapshot; connects and disconnects that
    /// land mid-broadcast do not affect it.
    #[must_use]
    pub fn podcast_targets(&self) -> Vec<PeerConnection> {
        self.connections.clone()
    }

    /// Number of registered peers.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` if no peers are registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> IpAddr {
        IpAddr::from([192, 168, 1, last])
    }

    #[test]
    fn test_one_entry_per_address() {
        let mut registry = ConnectionRegistry::new();

        assert!(registry.connect(addr(2), 9000, "alice"));
        // Same address, different port and name: still declined.
        assert!(!registry.connect(addr(2), 9001, "bob"));
        assert_eq!(registry.len(), 1);

        assert!(registry.disconnect(addr(2)));
        assert!(!registry.disconnect(addr(2)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_declined_connect_does_not_mutate() {
        let mut registry = ConnectionRegistry::new();
        registry.connect(addr(2), 9000, "alice");
        registry.connect(addr(2), 9001, "bob");

        let targets = registry.podcast_targets();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].port, 9000);
        assert_eq!(targets[0].username, "alice");
    }

    #[test]
    fn test_connection_order_preserved() {
        let mut registry = ConnectionRegistry::new();
        registry.connect(addr(2), 9000, "alice");
        registry.connect(addr(3), 9100, "bob");
        registry.connect(addr(4), 9200, "carol");

        let targets = registry.podcast_targets();
        let names: Vec<&str> = targets.iter().map(|c| c.username.as_str()).collect();
        assert_eq!(names, ["alice", "bob", "carol"]);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut registry = ConnectionRegistry::new();
        registry.connect(addr(2), 9000, "alice");
        registry.connect(addr(3), 9100, "bob");

        let snapshot = registry.podcast_targets();
        registry.disconnect(addr(2));

        // The snapshot still holds both peers.
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reconnect_after_disconnect() {
        let mut registry = ConnectionRegistry::new();
        registry.connect(addr(2), 9000, "alice");
        registry.disconnect(addr(2));

        assert!(registry.connect(addr(2), 9002, "alice"));
        assert!(registry.is_connected(addr(2)));
    }
}
