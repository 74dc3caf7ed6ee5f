//! Session parameters and the client-visible session state.

use std::fmt;

use serde::Serialize;

use crate::types::EngineMask;

/// One of the two independent session categories of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionAxis {
    /// Live position reports.
    Tracking,
    /// Batched position reports.
    Batching,
}

impl fmt::Display for SessionAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionAxis::Tracking => f.write_str("tracking"),
            SessionAxis::Batching => f.write_str("batching"),
        }
    }
}

/// Requested tracking rates.
///
/// Both rates are lower bounds; the engine may round them up to its own
/// granularity (see [`EffectiveParams`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TrackingParams {
    /// Minimum time between reports. `0` means passive listening: no engine
    /// session is requested and reports of other clients' sessions are
    /// received instead.
    pub interval_ms: u32,
    /// Minimum distance between reports. `0` means time-based only.
    pub distance_m: u32,
    /// Engine streams to receive.
    pub engines: EngineMask,
}

impl TrackingParams {
    /// Time-based tracking of the fused stream.
    pub fn new(interval_ms: u32) -> Self {
        Self {
            interval_ms,
            distance_m: 0,
            engines: EngineMask::FUSED,
        }
    }

    pub fn with_distance(mut self, distance_m: u32) -> Self {
        self.distance_m = distance_m;
        self
    }

    /// Select engine streams. An empty mask selects the fused stream.
    pub fn with_engines(mut self, engines: EngineMask) -> Self {
        self.engines = if engines.is_empty() {
            EngineMask::FUSED
        } else {
            engines
        };
        self
    }

    /// True if no engine session is requested.
    pub fn is_passive(&self) -> bool {
        self.interval_ms == 0
    }
}

/// Batching flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BatchingMode {
    /// Batch fixes by time and/or distance until stopped.
    Routine,
    /// Batch fixes until a trip distance has been traversed.
    Trip,
}

impl fmt::Display for BatchingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchingMode::Routine => f.write_str("routine"),
            BatchingMode::Trip => f.write_str("trip"),
        }
    }
}

/// Requested batching rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BatchingParams {
    pub mode: BatchingMode,
    /// Minimum time between batched fixes; `0` means don't care.
    pub min_interval_ms: u32,
    /// Routine: minimum distance between batched fixes. Trip: trip distance.
    /// `0` means don't care.
    pub distance_m: u32,
}

impl BatchingParams {
    pub fn routine(min_interval_ms: u32, min_distance_m: u32) -> Self {
        Self {
            mode: BatchingMode::Routine,
            min_interval_ms,
            distance_m: min_distance_m,
        }
    }

    pub fn trip(min_interval_ms: u32, trip_distance_m: u32) -> Self {
        Self {
            mode: BatchingMode::Trip,
            min_interval_ms,
            distance_m: trip_distance_m,
        }
    }

    /// True if neither rate constrains the session.
    pub fn is_dont_care(&self) -> bool {
        self.min_interval_ms == 0 && self.distance_m == 0
    }
}

/// Rates the engine acknowledged for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct EffectiveParams {
    pub interval_ms: u32,
    pub distance_m: u32,
}

/// Client-visible state of one session axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// No session on this axis.
    Idle,
    /// A tracking session with its requested params.
    Tracking(TrackingParams),
    /// A batching session with its requested params.
    Batching(BatchingParams),
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, SessionState::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passive_tracking() {
        assert!(TrackingParams::new(0).is_passive());
        assert!(!TrackingParams::new(1000).is_passive());
    }

    #[test]
    fn test_empty_engine_mask_selects_fused() {
        let params = TrackingParams::new(1000).with_engines(EngineMask::NONE);
        assert_eq!(params.engines, EngineMask::FUSED);

        let params = TrackingParams::new(1000).with_engines(EngineMask::PPE);
        assert_eq!(params.engines, EngineMask::PPE);
    }

    #[test]
    fn test_batching_dont_care() {
        assert!(BatchingParams::routine(0, 0).is_dont_care());
        assert!(BatchingParams::trip(0, 0).is_dont_care());
        assert!(!BatchingParams::trip(0, 5000).is_dont_care());
        assert!(!BatchingParams::routine(60_000, 0).is_dont_care());
    }
}
