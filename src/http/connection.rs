//! Relay state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Make the upgrade decision explicit (`classify`)
//! - Track each relay's phase (Received → WebSocket | HTTP → Closed | Errored)
//! - Generate unique relay IDs for tracing
//! - Count in-flight relays for status reporting

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::http::{header, HeaderMap};

/// Global atomic counter for relay IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static RELAY_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a relayed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelayId(u64);

impl RelayId {
    /// Generate a new unique relay ID.
    pub fn new() -> Self {
        Self(RELAY_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for RelayId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RelayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "relay-{}", self.0)
    }
}

/// Phase of a single inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPhase {
    /// Request accepted, nothing decided yet.
    Received,
    /// Client upgraded; frames are relayed to an upstream socket.
    UpgradedToWebSocket,
    /// Request forwarded upstream as plain HTTP.
    ProxiedHttp,
    /// Finished normally.
    Closed,
    /// Finished with an error.
    Errored,
}

impl RelayPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayPhase::Received => "received",
            RelayPhase::UpgradedToWebSocket => "upgraded-to-websocket",
            RelayPhase::ProxiedHttp => "proxied-http",
            RelayPhase::Closed => "closed",
            RelayPhase::Errored => "errored",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, RelayPhase::Closed | RelayPhase::Errored)
    }
}

impl std::fmt::Display for RelayPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the upgrade decision point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// `Upgrade: websocket`.
    WebSocket,
    /// No upgrade requested.
    Http,
    /// Some other upgrade protocol; carries the requested token.
    UnsupportedUpgrade(String),
}

/// Decide how a received request is relayed.
pub fn classify(headers: &HeaderMap) -> Dispatch {
    let Some(upgrade) = headers.get(header::UPGRADE) else {
        return Dispatch::Http;
    };

    let token = upgrade.to_str().unwrap_or_default().trim();
    if token
        .split(',')
        .any(|protocol| protocol.trim().eq_ignore_ascii_case("websocket"))
    {
        Dispatch::WebSocket
    } else {
        Dispatch::UnsupportedUpgrade(token.to_string())
    }
}

/// Tracks in-flight relays.
#[derive(Debug, Clone, Default)]
pub struct RelayTracker {
    active_count: Arc<AtomicU64>,
    websocket_count: Arc<AtomicU64>,
}

impl RelayTracker {
    /// Create a new relay tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly received request. Returns a guard that decrements on drop.
    pub fn track(&self) -> RelayGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        RelayGuard {
            active_count: Arc::clone(&self.active_count),
            websocket_count: Arc::clone(&self.websocket_count),
            id: RelayId::new(),
            phase: RelayPhase::Received,
        }
    }

    /// Relays that have not reached a terminal phase.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Currently open WebSocket relays.
    pub fn websocket_count(&self) -> u64 {
        self.websocket_count.load(Ordering::SeqCst)
    }
}

/// Guard that tracks a relay's lifetime and phase.
///
/// Dropping a guard that never reached a terminal phase counts as `Closed`.
#[derive(Debug)]
pub struct RelayGuard {
    active_count: Arc<AtomicU64>,
    websocket_count: Arc<AtomicU64>,
    id: RelayId,
    phase: RelayPhase,
}

impl RelayGuard {
    /// Get this relay's ID.
    pub fn id(&self) -> RelayId {
        self.id
    }

    /// Current phase.
    pub fn phase(&self) -> RelayPhase {
        self.phase
    }

    /// Move to `next`. Transitions out of a terminal phase are ignored.
    pub fn transition(&mut self, next: RelayPhase) {
        if self.phase.is_terminal() || self.phase == next {
            return;
        }

        tracing::trace!(relay_id = %self.id, from = %self.phase, to = %next, "Relay phase transition");

        if next == RelayPhase::UpgradedToWebSocket {
            self.websocket_count.fetch_add(1, Ordering::SeqCst);
        }
        if self.phase == RelayPhase::UpgradedToWebSocket {
            self.websocket_count.fetch_sub(1, Ordering::SeqCst);
        }
        if next.is_terminal() {
            self.active_count.fetch_sub(1, Ordering::SeqCst);
        }

        self.phase = next;
    }
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        self.transition(RelayPhase::Closed);
    }
}
