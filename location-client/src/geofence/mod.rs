//! Geofence identity, state and modification semantics.
//!
//! A [`Geofence`] is a descriptor value. Adding it binds the value (and every
//! later clone) to a record in the owning client's [`GeofenceRegistry`]
//! through a generation-checked [`GeofenceHandle`]. The registry is the only
//! authority on a record's fields and state; a value's own fields are a local
//! snapshot until passed back through `modify_geofences`.

mod model;
mod registry;

pub use model::{Geofence, GeofenceHandle, GeofenceRegion, GeofenceState, GeofenceTriggers};
pub use registry::GeofenceRegistry;
