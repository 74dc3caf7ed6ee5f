//! Geofence arena of one client.
//!
//! Records live in a slot arena addressed by generation-checked
//! [`GeofenceHandle`]s. Every mutating operation is applied optimistically and
//! remembered under its request id; the engine's per-geofence answer either
//! confirms each item or rolls that item back. Items of one call never affect
//! each other: a rejected sibling leaves the accepted ones in place.
//!
//! A record is *registered* once the engine confirmed its add and until a
//! removal is requested. Remove, pause, resume and modify skip any descriptor
//! that does not resolve to a registered record.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::model::{Geofence, GeofenceHandle, GeofenceRegion, GeofenceState, GeofenceTriggers};
use crate::callbacks::{CollectiveResponseCallback, GeofenceBreachCallback};
use crate::dispatcher::{Delivery, DeliveryKind};
use crate::engine::{EngineCommand, GeofenceResult, GeofenceSpec, GeofenceTarget};
use crate::outbox::Outbox;
use crate::types::{
    ClientId, EngineGeofenceId, GeofenceBreachMask, Location, LocationResponse, RequestId,
};

struct GeofenceRecord {
    region: GeofenceRegion,
    triggers: GeofenceTriggers,
    state: GeofenceState,
    /// The engine acknowledged the add.
    confirmed: bool,
    /// A removal is in flight.
    removing: bool,
    engine_id: Option<EngineGeofenceId>,
    breach: GeofenceBreachCallback,
    collective: Option<CollectiveResponseCallback>,
}

impl GeofenceRecord {
    fn is_registered(&self) -> bool {
        self.confirmed && !self.removing
    }
}

struct Slot {
    generation: u32,
    record: Option<GeofenceRecord>,
}

/// An item of an in-flight operation on a registered record, with what its
/// answer reports if a concurrent removal released the record first.
struct Issued {
    handle: GeofenceHandle,
    last_known: Geofence,
    collective: Option<CollectiveResponseCallback>,
}

enum PendingOp {
    Add(Vec<GeofenceHandle>),
    Remove(Vec<GeofenceHandle>),
    Pause(Vec<Issued>),
    Resume(Vec<Issued>),
    /// Items with the triggers to restore on failure.
    Modify(Vec<(Issued, GeofenceTriggers)>),
}

impl PendingOp {
    fn name(&self) -> &'static str {
        match self {
            PendingOp::Add(_) => "add",
            PendingOp::Remove(_) => "remove",
            PendingOp::Pause(_) => "pause",
            PendingOp::Resume(_) => "resume",
            PendingOp::Modify(_) => "modify",
        }
    }
}

/// Geofences owned by one client.
pub struct GeofenceRegistry {
    client_id: ClientId,
    slots: Vec<Slot>,
    free: Vec<u32>,
    engine_index: HashMap<EngineGeofenceId, Vec<GeofenceHandle>>,
    pending: HashMap<RequestId, PendingOp>,
}

impl GeofenceRegistry {
    pub(crate) fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            slots: Vec::new(),
            free: Vec::new(),
            engine_index: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Arena
    // -------------------------------------------------------------------------

    fn allocate(&mut self, record: GeofenceRecord) -> GeofenceHandle {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    record: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.record = Some(record);

        GeofenceHandle {
            client: self.client_id,
            index,
            generation: slot.generation,
        }
    }

    fn release(&mut self, handle: GeofenceHandle) -> Option<GeofenceRecord> {
        let slot = self.slot_mut(handle)?;
        let record = slot.record.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);

        if let Some(engine_id) = record.engine_id {
            if let Some(aliases) = self.engine_index.get_mut(&engine_id) {
                aliases.retain(|h| *h != handle);
                if aliases.is_empty() {
                    self.engine_index.remove(&engine_id);
                }
            }
        }
        Some(record)
    }

    fn slot_mut(&mut self, handle: GeofenceHandle) -> Option<&mut Slot> {
        if handle.client != self.client_id {
            return None;
        }
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
    }

    fn record(&self, handle: GeofenceHandle) -> Option<&GeofenceRecord> {
        if handle.client != self.client_id {
            return None;
        }
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.record.as_ref())
    }

    fn record_mut(&mut self, handle: GeofenceHandle) -> Option<&mut GeofenceRecord> {
        self.slot_mut(handle).and_then(|slot| slot.record.as_mut())
    }

    /// Registered target for `geofence`, skipping duplicates already in `seen`.
    fn registered_target(
        &self,
        geofence: &Geofence,
        seen: &mut Vec<GeofenceHandle>,
    ) -> Option<(GeofenceTarget, &GeofenceRecord)> {
        let handle = geofence.handle()?;
        if seen.contains(&handle) {
            return None;
        }
        let record = self.record(handle).filter(|r| r.is_registered())?;
        let engine_id = record.engine_id?;
        seen.push(handle);
        Some((GeofenceTarget { handle, engine_id }, record))
    }

    fn snapshot(&self, handle: GeofenceHandle) -> Option<Geofence> {
        self.record(handle)
            .map(|r| Geofence::bound(handle, r.region, r.triggers))
    }

    fn issue(&self, handle: GeofenceHandle) -> Option<Issued> {
        let record = self.record(handle)?;
        Some(Issued {
            handle,
            last_known: Geofence::bound(handle, record.region, record.triggers),
            collective: record.collective.clone(),
        })
    }

    /// Outcome entry for an issued item: the live record if it still exists,
    /// otherwise what was captured when the item was issued.
    fn issued_outcome(
        &self,
        item: &Issued,
        response: LocationResponse,
    ) -> (Option<CollectiveResponseCallback>, (Geofence, LocationResponse)) {
        match self.record(item.handle) {
            Some(record) => (
                record.collective.clone(),
                (Geofence::bound(item.handle, record.region, record.triggers), response),
            ),
            None => (item.collective.clone(), (item.last_known.clone(), response)),
        }
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    /// Register `geofences` and bind each value to its new record.
    ///
    /// Returns false, touching nothing, without a breach callback or with an
    /// empty list.
    pub(crate) fn add(
        &mut self,
        geofences: &mut [Geofence],
        breach: Option<GeofenceBreachCallback>,
        collective: Option<CollectiveResponseCallback>,
        outbox: &mut Outbox<'_>,
    ) -> bool {
        let Some(breach) = breach else {
            debug!(client_id = %self.client_id, "add geofences ignored: no breach callback");
            return false;
        };
        if geofences.is_empty() {
            return false;
        }

        let mut specs = Vec::with_capacity(geofences.len());
        for geofence in geofences.iter_mut() {
            let handle = self.allocate(GeofenceRecord {
                region: geofence.region(),
                triggers: geofence.triggers(),
                state: GeofenceState::Active,
                confirmed: false,
                removing: false,
                engine_id: None,
                breach: Arc::clone(&breach),
                collective: collective.clone(),
            });
            geofence.bind(handle);
            specs.push(GeofenceSpec {
                handle,
                region: geofence.region(),
                triggers: geofence.triggers(),
            });
        }

        let handles = specs.iter().map(|s| s.handle).collect();
        let count = specs.len();
        let request_id = outbox.submit(EngineCommand::AddGeofences(specs));
        self.pending.insert(request_id, PendingOp::Add(handles));
        info!(client_id = %self.client_id, request_id = %request_id, count, "geofence add requested");
        true
    }

    /// Request removal of every registered geofence in `geofences`.
    pub(crate) fn remove(&mut self, geofences: &[Geofence], outbox: &mut Outbox<'_>) -> bool {
        let mut seen = Vec::new();
        let targets: Vec<_> = geofences
            .iter()
            .filter_map(|g| self.registered_target(g, &mut seen).map(|(t, _)| t))
            .collect();
        if targets.is_empty() {
            return false;
        }

        for target in &targets {
            if let Some(record) = self.record_mut(target.handle) {
                record.removing = true;
            }
        }
        let handles = targets.iter().map(|t| t.handle).collect();
        let request_id = outbox.submit(EngineCommand::RemoveGeofences(targets));
        self.pending.insert(request_id, PendingOp::Remove(handles));
        debug!(client_id = %self.client_id, request_id = %request_id, "geofence remove requested");
        true
    }

    /// Pause every active registered geofence in `geofences`.
    pub(crate) fn pause(&mut self, geofences: &[Geofence], outbox: &mut Outbox<'_>) -> bool {
        self.set_state(geofences, GeofenceState::Active, GeofenceState::Paused, outbox)
    }

    /// Resume every paused registered geofence in `geofences`.
    pub(crate) fn resume(&mut self, geofences: &[Geofence], outbox: &mut Outbox<'_>) -> bool {
        self.set_state(geofences, GeofenceState::Paused, GeofenceState::Active, outbox)
    }

    fn set_state(
        &mut self,
        geofences: &[Geofence],
        from: GeofenceState,
        to: GeofenceState,
        outbox: &mut Outbox<'_>,
    ) -> bool {
        let mut seen = Vec::new();
        let targets: Vec<_> = geofences
            .iter()
            .filter_map(|g| self.registered_target(g, &mut seen))
            .filter(|(_, record)| record.state == from)
            .map(|(target, _)| target)
            .collect();
        if targets.is_empty() {
            return false;
        }

        for target in &targets {
            if let Some(record) = self.record_mut(target.handle) {
                record.state = to;
            }
        }
        let issued = targets.iter().filter_map(|t| self.issue(t.handle)).collect();
        let (command, op) = match to {
            GeofenceState::Paused => (EngineCommand::PauseGeofences(targets), PendingOp::Pause(issued)),
            GeofenceState::Active => (EngineCommand::ResumeGeofences(targets), PendingOp::Resume(issued)),
        };
        let request_id = outbox.submit(command);
        debug!(client_id = %self.client_id, request_id = %request_id, op = op.name(), "geofence state change requested");
        self.pending.insert(request_id, op);
        true
    }

    /// Apply the modifiable fields of each value to its registered record.
    ///
    /// Geometry is never modified. Values whose fields already match are
    /// skipped.
    pub(crate) fn modify(&mut self, geofences: &[Geofence], outbox: &mut Outbox<'_>) -> bool {
        let mut seen = Vec::new();
        let changes: Vec<_> = geofences
            .iter()
            .filter_map(|g| {
                self.registered_target(g, &mut seen)
                    .filter(|(_, record)| record.triggers != g.triggers())
                    .map(|(target, record)| (target, record.triggers, g.triggers()))
            })
            .collect();
        if changes.is_empty() {
            return false;
        }

        let mut restore = Vec::with_capacity(changes.len());
        let mut updates = Vec::with_capacity(changes.len());
        for (target, previous, next) in changes {
            if let Some(record) = self.record_mut(target.handle) {
                record.triggers = next;
            }
            if let Some(item) = self.issue(target.handle) {
                restore.push((item, previous));
            }
            updates.push((target, next));
        }
        let request_id = outbox.submit(EngineCommand::ModifyGeofences(updates));
        self.pending.insert(request_id, PendingOp::Modify(restore));
        debug!(client_id = %self.client_id, request_id = %request_id, "geofence modify requested");
        true
    }

    // -------------------------------------------------------------------------
    // Engine events
    // -------------------------------------------------------------------------

    /// Apply per-geofence results; false if `request_id` is not a geofence
    /// operation of this client.
    pub(crate) fn on_response(
        &mut self,
        request_id: RequestId,
        results: &[GeofenceResult],
        outbox: &mut Outbox<'_>,
    ) -> bool {
        let Some(op) = self.pending.remove(&request_id) else {
            return false;
        };
        let outcome_of = |handle: GeofenceHandle| {
            results
                .iter()
                .find(|r| r.handle == handle)
                .copied()
                .unwrap_or(GeofenceResult {
                    handle,
                    response: LocationResponse::UnknownFailure,
                    engine_id: None,
                })
        };

        let mut outcomes: Vec<(Option<CollectiveResponseCallback>, (Geofence, LocationResponse))> =
            Vec::new();
        let mut failed = 0usize;

        match &op {
            PendingOp::Add(handles) => {
                for &handle in handles {
                    let result = outcome_of(handle);
                    let accepted = result.response.is_success() && result.engine_id.is_some();
                    let Some(collective) = self.record(handle).map(|r| r.collective.clone()) else {
                        continue;
                    };
                    let Some(geofence) = self.snapshot(handle) else {
                        continue;
                    };

                    if accepted {
                        if let (Some(record), Some(engine_id)) =
                            (self.record_mut(handle), result.engine_id)
                        {
                            record.confirmed = true;
                            record.engine_id = Some(engine_id);
                        }
                        if let Some(engine_id) = result.engine_id {
                            self.engine_index.entry(engine_id).or_default().push(handle);
                        }
                        outcomes.push((collective, (geofence, LocationResponse::Success)));
                    } else {
                        self.release(handle);
                        failed += 1;
                        let response = if result.response.is_success() {
                            LocationResponse::UnknownFailure
                        } else {
                            result.response
                        };
                        outcomes.push((collective, (geofence, response)));
                    }
                }
            }
            PendingOp::Remove(handles) => {
                for &handle in handles {
                    let result = outcome_of(handle);
                    let Some(geofence) = self.snapshot(handle) else {
                        continue;
                    };
                    let collective = self.record(handle).and_then(|r| r.collective.clone());
                    if result.response.is_success() {
                        self.release(handle);
                    } else {
                        failed += 1;
                        if let Some(record) = self.record_mut(handle) {
                            record.removing = false;
                        }
                    }
                    outcomes.push((collective, (geofence, result.response)));
                }
            }
            PendingOp::Pause(items) | PendingOp::Resume(items) => {
                let previous = if matches!(op, PendingOp::Pause(_)) {
                    GeofenceState::Active
                } else {
                    GeofenceState::Paused
                };
                for item in items {
                    let result = outcome_of(item.handle);
                    if !result.response.is_success() {
                        failed += 1;
                        if let Some(record) = self.record_mut(item.handle) {
                            record.state = previous;
                        }
                    }
                    outcomes.push(self.issued_outcome(item, result.response));
                }
            }
            PendingOp::Modify(restore) => {
                for (item, previous) in restore {
                    let result = outcome_of(item.handle);
                    if !result.response.is_success() {
                        failed += 1;
                        if let Some(record) = self.record_mut(item.handle) {
                            record.triggers = *previous;
                        }
                    }
                    outcomes.push(self.issued_outcome(item, result.response));
                }
            }
        }

        if failed > 0 {
            warn!(client_id = %self.client_id, request_id = %request_id, op = op.name(), failed, "geofence items rejected");
        } else {
            debug!(client_id = %self.client_id, request_id = %request_id, op = op.name(), "geofence operation acknowledged");
        }

        let with_callback = outcomes
            .into_iter()
            .filter_map(|(cb, outcome)| cb.map(|cb| (cb, outcome)));
        for (callback, entries) in group_by_callback(with_callback) {
            outbox.deliver(Delivery::new(DeliveryKind::GeofenceResponse, move || {
                callback(entries.as_slice())
            }));
        }
        true
    }

    /// Deliver a breach to every matching record.
    ///
    /// Returns the engine ids this client owns a record for, whether or not
    /// the breach was delivered.
    pub(crate) fn on_breach(
        &self,
        engine_ids: &[EngineGeofenceId],
        location: &Location,
        breach: GeofenceBreachMask,
        timestamp: u64,
        outbox: &mut Outbox<'_>,
    ) -> Vec<EngineGeofenceId> {
        let mut claimed = Vec::new();
        let mut matches = Vec::new();

        for engine_id in engine_ids {
            let Some(handles) = self.engine_index.get(engine_id) else {
                continue;
            };
            claimed.push(*engine_id);

            for &handle in handles {
                let Some(record) = self.record(handle) else {
                    continue;
                };
                let deliverable = record.is_registered()
                    && record.state == GeofenceState::Active
                    && record.triggers.breach_types.intersects(breach);
                if deliverable {
                    let geofence = Geofence::bound(handle, record.region, record.triggers);
                    matches.push((Arc::clone(&record.breach), geofence));
                }
            }
        }

        for (callback, geofences) in group_by_callback(matches) {
            let location = location.clone();
            debug!(client_id = %self.client_id, count = geofences.len(), breach = breach.bits(), "geofence breach");
            outbox.deliver(Delivery::new(DeliveryKind::Breach, move || {
                callback(geofences.as_slice(), &location, breach, timestamp)
            }));
        }
        claimed
    }

    /// Request removal of every registered record and forget all of them.
    pub(crate) fn teardown(&mut self, outbox: &mut Outbox<'_>) -> usize {
        let targets: Vec<_> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let record = slot.record.as_ref().filter(|r| r.is_registered())?;
                Some(GeofenceTarget {
                    handle: GeofenceHandle {
                        client: self.client_id,
                        index: index as u32,
                        generation: slot.generation,
                    },
                    engine_id: record.engine_id?,
                })
            })
            .collect();
        let count = targets.len();

        if !targets.is_empty() {
            outbox.submit(EngineCommand::RemoveGeofences(targets));
        }
        self.slots.clear();
        self.free.clear();
        self.engine_index.clear();
        self.pending.clear();
        count
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// State of the registered record `geofence` refers to.
    pub fn state(&self, geofence: &Geofence) -> Option<GeofenceState> {
        geofence
            .handle()
            .and_then(|h| self.record(h))
            .filter(|r| r.is_registered())
            .map(|r| r.state)
    }

    /// Authoritative copy of the registered record `geofence` refers to.
    pub fn registered(&self, geofence: &Geofence) -> Option<Geofence> {
        let handle = geofence.handle()?;
        self.record(handle).filter(|r| r.is_registered())?;
        self.snapshot(handle)
    }

    /// Number of registered records.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter_map(|s| s.record.as_ref())
            .filter(|r| r.is_registered())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Group items by callback identity, keeping first-seen order.
fn group_by_callback<C: ?Sized, T>(items: impl IntoIterator<Item = (Arc<C>, T)>) -> Vec<(Arc<C>, Vec<T>)> {
    let mut groups: Vec<(Arc<C>, Vec<T>)> = Vec::new();
    for (callback, item) in items {
        let key = Arc::as_ptr(&callback) as *const ();
        match groups
            .iter_mut()
            .find(|(cb, _)| Arc::as_ptr(cb) as *const () == key)
        {
            Some((_, group)) => group.push(item),
            None => groups.push((callback, vec![item])),
        }
    }
    groups
}
