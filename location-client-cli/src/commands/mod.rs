//! CLI command implementations.

pub mod batch;
pub mod caps;
pub mod common;
pub mod geofence;
pub mod track;
