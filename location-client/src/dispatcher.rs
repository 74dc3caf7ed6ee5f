//! Ordered delivery of responses and reports to client callbacks.
//!
//! Each client owns one [`ResponseDispatcher`]: a dedicated thread draining a
//! FIFO queue of [`Delivery`] items. Everything the client's callbacks see
//! passes through this queue, so per-client delivery is serialized and never
//! reordered. Producers (client calls and the router) enqueue while holding
//! the client lock, which makes queue order equal to state-transition order:
//! a start response is always queued before the first report of the session
//! it started.
//!
//! # Architecture
//!
//! ```text
//!  client call ──┐                ┌────────────────────────────────────┐
//!                ├──► mpsc FIFO ──►  dispatcher thread                 │
//!  router ───────┘                │   gate: epoch(axis) == d.epoch ?   │
//!                                 │     yes ──► catch_unwind(callback) │
//!                                 │     no  ──► drop (stale)           │
//!                                 └────────────────────────────────────┘
//! ```
//!
//! # Cancellation
//!
//! Stopping a session advances that axis's epoch. Reports queued under an
//! older epoch are discarded when they reach the head of the queue, so after
//! a stop at most the report whose callback is already running can still be
//! observed.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::callbacks::ResponseCallback;
use crate::session::SessionAxis;
use crate::telemetry::HubMetrics;
use crate::types::{ClientId, LocationResponse};

// =============================================================================
// Epochs
// =============================================================================

/// Per-axis session epochs shared between a client's state and its dispatcher.
#[derive(Debug, Default)]
pub struct AxisEpochs {
    tracking: AtomicU64,
    batching: AtomicU64,
}

impl AxisEpochs {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, axis: SessionAxis) -> &AtomicU64 {
        match axis {
            SessionAxis::Tracking => &self.tracking,
            SessionAxis::Batching => &self.batching,
        }
    }

    /// Current epoch of `axis`.
    pub fn current(&self, axis: SessionAxis) -> u64 {
        self.counter(axis).load(Ordering::Acquire)
    }

    /// Invalidate every report queued for `axis`; returns the new epoch.
    pub fn advance(&self, axis: SessionAxis) -> u64 {
        self.counter(axis).fetch_add(1, Ordering::AcqRel) + 1
    }
}

// =============================================================================
// Deliveries
// =============================================================================

/// A boxed callback invocation.
pub type Job = Box<dyn FnOnce() + Send>;

/// What a delivery carries, for logging and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryKind {
    Response,
    Report,
    Batch,
    Breach,
    GeofenceResponse,
    Capabilities,
    EnergyConsumed,
    SystemInfo,
}

/// One queued callback invocation.
pub struct Delivery {
    kind: DeliveryKind,
    gate: Option<(SessionAxis, u64)>,
    job: Job,
}

impl Delivery {
    /// Ungated delivery; always runs.
    pub fn new(kind: DeliveryKind, job: impl FnOnce() + Send + 'static) -> Self {
        Self {
            kind,
            gate: None,
            job: Box::new(job),
        }
    }

    /// Delivery that runs only while `axis` is still at `epoch`.
    pub fn gated(
        kind: DeliveryKind,
        axis: SessionAxis,
        epoch: u64,
        job: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            kind,
            gate: Some((axis, epoch)),
            job: Box::new(job),
        }
    }

    /// Response callback invocation.
    pub fn response(callback: &ResponseCallback, response: LocationResponse) -> Self {
        let callback = Arc::clone(callback);
        Self::new(DeliveryKind::Response, move || callback(response))
    }

    pub fn kind(&self) -> DeliveryKind {
        self.kind
    }

    /// Run the callback on the current thread, ignoring the gate.
    #[cfg(test)]
    pub(crate) fn run(self) {
        (self.job)()
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("kind", &self.kind)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

enum Envelope {
    Deliver(Delivery),
    Close,
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Per-client delivery thread.
pub struct ResponseDispatcher {
    client_id: ClientId,
    tx: mpsc::UnboundedSender<Envelope>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl ResponseDispatcher {
    /// Spawn the delivery thread for `client_id`.
    pub fn spawn(
        client_id: ClientId,
        thread_prefix: &str,
        epochs: Arc<AxisEpochs>,
        metrics: Arc<HubMetrics>,
    ) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = thread::Builder::new()
            .name(format!("{}-{}", thread_prefix, client_id.get()))
            .spawn(move || run(client_id, rx, epochs, metrics))?;
        let thread_id = handle.thread().id();

        Ok(Self {
            client_id,
            tx,
            thread: Mutex::new(Some(handle)),
            thread_id,
        })
    }

    /// Queue a delivery. Never blocks.
    pub fn dispatch(&self, delivery: Delivery) {
        if self.tx.send(Envelope::Deliver(delivery)).is_err() {
            trace!(client_id = %self.client_id, "dispatcher closed, delivery dropped");
        }
    }

    /// Queue every delivery in order.
    pub fn dispatch_all(&self, deliveries: impl IntoIterator<Item = Delivery>) {
        for delivery in deliveries {
            self.dispatch(delivery);
        }
    }

    /// True when called from a callback running on this dispatcher.
    pub fn is_dispatcher_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Drain what is already queued, then stop the thread.
    ///
    /// Waits for the thread unless called from one of this client's callbacks.
    pub fn close(&self) {
        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        let _ = self.tx.send(Envelope::Close);

        if self.is_dispatcher_thread() {
            debug!(client_id = %self.client_id, "dispatcher closed from its own callback");
            return;
        }
        if handle.join().is_err() {
            warn!(client_id = %self.client_id, "dispatcher thread terminated abnormally");
        }
    }
}

impl Drop for ResponseDispatcher {
    fn drop(&mut self) {
        self.close();
    }
}

fn run(
    client_id: ClientId,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    epochs: Arc<AxisEpochs>,
    metrics: Arc<HubMetrics>,
) {
    debug!(client_id = %client_id, "dispatcher started");

    while let Some(envelope) = rx.blocking_recv() {
        let delivery = match envelope {
            Envelope::Deliver(delivery) => delivery,
            Envelope::Close => break,
        };

        if let Some((axis, epoch)) = delivery.gate {
            if epochs.current(axis) != epoch {
                trace!(client_id = %client_id, axis = %axis, epoch, "stale delivery dropped");
                metrics.report_dropped_stale();
                continue;
            }
        }

        let kind = delivery.kind;
        if catch_unwind(AssertUnwindSafe(delivery.job)).is_err() {
            warn!(client_id = %client_id, kind = ?kind, "client callback panicked");
            metrics.callback_panicked();
            continue;
        }

        match kind {
            DeliveryKind::Response | DeliveryKind::GeofenceResponse => metrics.response_delivered(),
            DeliveryKind::Breach => metrics.breach_delivered(),
            _ => {}
        }
    }

    debug!(client_id = %client_id, "dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    fn spawn() -> (ResponseDispatcher, Arc<AxisEpochs>, Arc<HubMetrics>) {
        let epochs = Arc::new(AxisEpochs::new());
        let metrics = Arc::new(HubMetrics::new());
        let dispatcher = ResponseDispatcher::spawn(
            ClientId::new(1),
            "test-dispatch",
            Arc::clone(&epochs),
            Arc::clone(&metrics),
        )
        .unwrap();
        (dispatcher, epochs, metrics)
    }

    #[test]
    fn test_deliveries_run_in_fifo_order() {
        let (dispatcher, _, _) = spawn();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..50 {
            let seen = Arc::clone(&seen);
            dispatcher.dispatch(Delivery::new(DeliveryKind::Report, move || seen.lock().push(i)));
        }
        dispatcher.close();

        assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_stale_epoch_is_dropped() {
        let (dispatcher, epochs, metrics) = spawn();
        let (tx, rx) = std_mpsc::channel();

        // Hold the thread so both deliveries are queued before the epoch moves.
        let (release_tx, release_rx) = std_mpsc::channel::<()>();
        dispatcher.dispatch(Delivery::new(DeliveryKind::Report, move || {
            let _ = release_rx.recv();
        }));

        let epoch = epochs.current(SessionAxis::Tracking);
        let stale_tx = tx.clone();
        dispatcher.dispatch(Delivery::gated(
            DeliveryKind::Report,
            SessionAxis::Tracking,
            epoch,
            move || stale_tx.send("stale").unwrap(),
        ));
        let batching_epoch = epochs.current(SessionAxis::Batching);
        dispatcher.dispatch(Delivery::gated(
            DeliveryKind::Batch,
            SessionAxis::Batching,
            batching_epoch,
            move || tx.send("batching").unwrap(),
        ));

        epochs.advance(SessionAxis::Tracking);
        release_tx.send(()).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "batching");
        dispatcher.close();
        assert!(rx.try_recv().is_err());
        assert_eq!(metrics.snapshot().reports_dropped_stale, 1);
    }

    #[test]
    fn test_panicking_callback_does_not_stop_delivery() {
        let (dispatcher, _, metrics) = spawn();
        let (tx, rx) = std_mpsc::channel();

        dispatcher.dispatch(Delivery::new(DeliveryKind::Report, || panic!("callback failure")));
        let cb: ResponseCallback = Arc::new(move |response| tx.send(response).unwrap());
        dispatcher.dispatch(Delivery::response(&cb, LocationResponse::Success));

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            LocationResponse::Success
        );
        dispatcher.close();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.callback_panics, 1);
        assert_eq!(snapshot.responses_delivered, 1);
    }

    #[test]
    fn test_close_is_idempotent_and_drops_later_deliveries() {
        let (dispatcher, _, _) = spawn();
        dispatcher.close();
        dispatcher.close();

        let ran = Arc::new(AtomicU64::new(0));
        let ran_clone = Arc::clone(&ran);
        dispatcher.dispatch(Delivery::new(DeliveryKind::Report, move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        }));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_epoch_advance_returns_new_value() {
        let epochs = AxisEpochs::new();
        assert_eq!(epochs.current(SessionAxis::Batching), 0);
        assert_eq!(epochs.advance(SessionAxis::Batching), 1);
        assert_eq!(epochs.current(SessionAxis::Batching), 1);
        assert_eq!(epochs.current(SessionAxis::Tracking), 0);
    }
}
