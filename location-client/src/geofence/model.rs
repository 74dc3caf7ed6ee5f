//! Geofence value object and registry handle.

use std::fmt;

use serde::Serialize;

use crate::types::{ClientId, GeofenceBreachMask};

/// Generation-checked reference to a record in a client's geofence arena.
///
/// A handle stays valid until its record is removed; after that the slot's
/// generation moves on and the handle no longer resolves, even if the slot is
/// reused by a later geofence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GeofenceHandle {
    pub(crate) client: ClientId,
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl GeofenceHandle {
    /// Client that owns the record.
    pub fn client(&self) -> ClientId {
        self.client
    }
}

impl fmt::Display for GeofenceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/gf-{}.{}", self.client, self.index, self.generation)
    }
}

/// Registered state of a geofence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GeofenceState {
    /// Breaches are monitored and delivered.
    Active,
    /// The record is kept but no breach is delivered.
    Paused,
}

/// The modifiable part of a geofence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GeofenceTriggers {
    /// Transitions to report.
    pub breach_types: GeofenceBreachMask,
    /// Detection responsiveness in milliseconds.
    pub responsiveness_ms: u32,
    /// Dwell time in milliseconds.
    pub dwell_time_ms: u32,
}

/// Geometry of a geofence; immutable once added.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeofenceRegion {
    /// Degrees.
    pub latitude: f64,
    /// Degrees.
    pub longitude: f64,
    /// Meters.
    pub radius_m: f64,
}

/// A geofence descriptor.
///
/// The value is a local snapshot. Once it has been passed to
/// [`add_geofences`](crate::client::LocationClient::add_geofences) it carries
/// a [`GeofenceHandle`], and every clone refers to the same registered record.
/// Changing a clone's fields with the setters affects only that clone until it
/// is passed to [`modify_geofences`](crate::client::LocationClient::modify_geofences).
#[derive(Debug, Clone)]
pub struct Geofence {
    handle: Option<GeofenceHandle>,
    region: GeofenceRegion,
    triggers: GeofenceTriggers,
}

impl Geofence {
    /// Create an unregistered geofence.
    pub fn new(
        latitude: f64,
        longitude: f64,
        radius_m: f64,
        breach_types: GeofenceBreachMask,
        responsiveness_ms: u32,
        dwell_time_ms: u32,
    ) -> Self {
        Self {
            handle: None,
            region: GeofenceRegion {
                latitude,
                longitude,
                radius_m,
            },
            triggers: GeofenceTriggers {
                breach_types,
                responsiveness_ms,
                dwell_time_ms,
            },
        }
    }

    pub(crate) fn bound(handle: GeofenceHandle, region: GeofenceRegion, triggers: GeofenceTriggers) -> Self {
        Self {
            handle: Some(handle),
            region,
            triggers,
        }
    }

    pub(crate) fn bind(&mut self, handle: GeofenceHandle) {
        self.handle = Some(handle);
    }

    /// Registry handle, once the geofence has been added.
    pub fn handle(&self) -> Option<GeofenceHandle> {
        self.handle
    }

    /// True if both values refer to the same registered record.
    pub fn same_geofence(&self, other: &Geofence) -> bool {
        self.handle.is_some() && self.handle == other.handle
    }

    pub fn latitude(&self) -> f64 {
        self.region.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.region.longitude
    }

    pub fn radius_m(&self) -> f64 {
        self.region.radius_m
    }

    pub fn breach_types(&self) -> GeofenceBreachMask {
        self.triggers.breach_types
    }

    pub fn responsiveness_ms(&self) -> u32 {
        self.triggers.responsiveness_ms
    }

    pub fn dwell_time_ms(&self) -> u32 {
        self.triggers.dwell_time_ms
    }

    pub fn set_breach_types(&mut self, breach_types: GeofenceBreachMask) {
        self.triggers.breach_types = breach_types;
    }

    pub fn set_responsiveness_ms(&mut self, responsiveness_ms: u32) {
        self.triggers.responsiveness_ms = responsiveness_ms;
    }

    pub fn set_dwell_time_ms(&mut self, dwell_time_ms: u32) {
        self.triggers.dwell_time_ms = dwell_time_ms;
    }

    /// Geometry snapshot.
    pub fn region(&self) -> GeofenceRegion {
        self.region
    }

    /// Modifiable-field snapshot.
    pub fn triggers(&self) -> GeofenceTriggers {
        self.triggers
    }
}
