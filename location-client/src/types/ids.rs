//! Opaque identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Identifies one [`LocationClient`](crate::client::LocationClient) instance.
///
/// Identifiers are allocated by the hub, starting at 1. [`ClientId::HUB`] is
/// reserved for requests the hub issues on its own behalf (orphan eviction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClientId(u64);

impl ClientId {
    /// Reserved identifier for hub-originated requests.
    pub const HUB: Self = Self(0);

    /// Create a client identifier from a raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Correlates an engine request with its asynchronous response.
///
/// Unique per client; the engine echoes it back in
/// [`EngineEvent::Response`](crate::engine::EngineEvent::Response).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RequestId(u64);

impl RequestId {
    /// Create a request identifier from a raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Geofence identifier assigned by the positioning engine.
///
/// Engine identifiers are unique across all clients of one engine. Breach
/// events carry this identifier; the owning client maps it back to its own
/// [`GeofenceHandle`](crate::geofence::GeofenceHandle)s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EngineGeofenceId(u64);

impl EngineGeofenceId {
    /// Create an engine geofence identifier from a raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EngineGeofenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "efg-{}", self.0)
    }
}

/// Monotonic identifier allocator starting at 1.
#[derive(Debug)]
pub(crate) struct IdSequence(AtomicU64);

impl IdSequence {
    pub(crate) const fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub(crate) fn next_client(&self) -> ClientId {
        ClientId(self.0.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn next_request(&self) -> RequestId {
        RequestId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdSequence {
    fn default() -> Self {
        Self::new()
    }
}
