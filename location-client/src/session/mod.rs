//! Session lifecycle for the tracking and batching axes.
//!
//! [`SessionStateMachine`] holds at most one session per axis and applies
//! start/stop transitions, parameter validation, identical-request
//! suppression and rollback of rejected starts. It never talks to the
//! positioning service directly; requests and callback deliveries are
//! collected by the owning client and flushed under its lock.

mod params;
mod state_machine;

pub use params::{
    BatchingMode, BatchingParams, EffectiveParams, SessionAxis, SessionState, TrackingParams,
};
pub use state_machine::SessionStateMachine;
