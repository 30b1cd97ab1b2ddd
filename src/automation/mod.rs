//! Browser automation boundary.
//!
//! The protocol layer never talks to a browser directly; it sees one
//! capability: read the local playback state, apply a peer's playback
//! state. Implementations never fail past this boundary — a failed
//! read degrades to the idle state and a failed apply is logged and
//! swallowed, so a flaky browser can stall playback sync but never a
//! protocol exchange.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `webdriver` | W3C WebDriver implementation |

// ============================================================================
// Submodules
// ============================================================================

/// W3C WebDriver implementation.
pub mod webdriver;

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;

use crate::protocol::{PodcastRequest, SyncResponse, UrlFingerprint};

// ============================================================================
// PlaybackState
// ============================================================================

/// Media state of one endpoint at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    /// Identity of the playing page, or void.
    pub fingerprint: UrlFingerprint,
    /// Media position in seconds.
    pub time: f64,
    /// Whether playback is paused.
    pub paused: bool,
}

impl PlaybackState {
    /// The state reported when no supported page is active.
    #[inline]
    #[must_use]
    pub fn idle() -> Self {
        Self {
            fingerprint: UrlFingerprint::Void,
            time: 0.0,
            paused: false,
        }
    }

    /// Returns `true` if no supported page was active.
    #[inline]
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.fingerprint.is_void()
    }
}

impl From<SyncResponse> for PlaybackState {
    fn from(response: SyncResponse) -> Self {
        Self {
            fingerprint: response.fingerprint,
            time: response.time,
            paused: response.paused,
        }
    }
}

impl From<PodcastRequest> for PlaybackState {
    fn from(request: PodcastRequest) -> Self {
        Self {
            fingerprint: request.fingerprint,
            time: request.time,
            paused: request.paused,
        }
    }
}

// ============================================================================
// MediaAutomation
// ============================================================================

/// Capability to observe and steer the local browser's media playback.
///
/// Both endpoint tasks share one handle: the listener task calls into
/// it from handlers, the controlling task from sync and podcast.
/// Implementations serialize their own interior access.
#[async_trait]
pub trait MediaAutomation: Send + Sync {
    /// Reads the current local playback state.
    ///
    /// Returns [`PlaybackState::idle`] when no supported page is
    /// active or the read fails for any internal reason.
    async fn local_state(&self) -> PlaybackState;

    /// Applies a peer's playback state locally.
    ///
    /// A void fingerprint is a no-op; internal failures are logged and
    /// swallowed.
    async fn apply_state(&self, state: PlaybackState);
}

// ============================================================================
// Test Support
// ============================================================================

/// Scriptable in-memory automation used by endpoint tests.
#[cfg(test)]
pub struct ScriptedAutomation {
    state: parking_lot::Mutex<PlaybackState>,
    applied: parking_lot::Mutex<Vec<PlaybackState>>,
}

#[cfg(test)]
impl ScriptedAutomation {
    /// Automation reporting the idle state.
    pub fn idle() -> Self {
        Self::with_state(PlaybackState::idle())
    }

    /// Automation reporting a fixed state.
    pub fn with_state(state: PlaybackState) -> Self {
        Self {
            state: parking_lot::Mutex::new(state),
            applied: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Replaces the reported state.
    pub fn set_state(&self, state: PlaybackState) {
        *self.state.lock() = state;
    }

    /// Every state applied so far, in order.
    pub fn applied(&self) -> Vec<PlaybackState> {
        self.applied.lock().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl MediaAutomation for ScriptedAutomation {
    async fn local_state(&self) -> PlaybackState {
        self.state.lock().clone()
    }

    async fn apply_state(&self, state: PlaybackState) {
        self.applied.lock().push(state);
    }
}

// ============================================================================
// Tests
// ============================================================================
