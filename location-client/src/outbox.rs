//! Side effects collected while a client's state is locked.
//!
//! The session state machine and the geofence registry never talk to the
//! positioning service or the dispatcher directly. They push engine requests
//! and callback deliveries into an [`Outbox`], and the owning client flushes
//! it before releasing its lock. Flushing under the lock keeps the order of
//! engine requests and of queued deliveries identical to the order of state
//! transitions, across threads.

use crate::dispatcher::{Delivery, ResponseDispatcher};
use crate::engine::{EngineCommand, EngineRequest, PositioningService};
use crate::types::{ClientId, IdSequence, RequestId};

pub(crate) struct Outbox<'a> {
    client_id: ClientId,
    ids: &'a IdSequence,
    requests: Vec<EngineRequest>,
    deliveries: Vec<Delivery>,
}

impl<'a> Outbox<'a> {
    pub(crate) fn new(client_id: ClientId, ids: &'a IdSequence) -> Self {
        Self {
            client_id,
            ids,
            requests: Vec::new(),
            deliveries: Vec::new(),
        }
    }

    pub(crate) fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Queue an engine request; returns the id its response will carry.
    pub(crate) fn submit(&mut self, command: EngineCommand) -> RequestId {
        let request_id = self.ids.next_request();
        self.requests.push(EngineRequest {
            client_id: self.client_id,
            request_id,
            command,
        });
        request_id
    }

    pub(crate) fn deliver(&mut self, delivery: Delivery) {
        self.deliveries.push(delivery);
    }

    pub(crate) fn deliver_all(&mut self, deliveries: impl IntoIterator<Item = Delivery>) {
        self.deliveries.extend(deliveries);
    }

    /// Send every request, then queue every delivery, in insertion order.
    pub(crate) fn flush(self, service: &dyn PositioningService, dispatcher: &ResponseDispatcher) {
        for request in self.requests {
            service.submit(request);
        }
        dispatcher.dispatch_all(self.deliveries);
    }

    #[cfg(test)]
    pub(crate) fn into_parts(self) -> (Vec<EngineRequest>, Vec<Delivery>) {
        (self.requests, self.deliveries)
    }
}
