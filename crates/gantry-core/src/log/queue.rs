//! Decouples record producers from handler latency: records enter an
//! in-process queue and one background worker drives the real handler chain,
//! preserving FIFO order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::log::{Handler, Record, RecordKind, RECORD_KIND_COUNT};

/// How long the worker blocks before re-checking the shutdown flag.
const LIVENESS_TICK: Duration = Duration::from_millis(100);

type KindMask = [bool; RECORD_KIND_COUNT];

fn kind_mask(handler: &dyn Handler) -> KindMask {
    let mut mask = [false; RECORD_KIND_COUNT];
    for kind in RecordKind::all() {
        mask[kind.index()] = handler.accepts(kind);
    }
    mask
}

/// Wraps a handler chain behind a queue and a dedicated consumer thread.
///
/// `handle` only enqueues and never waits on the inner handlers. `close`
/// disconnects producers, lets the worker finish a final non-blocking drain
/// of everything still queued, then closes the inner handlers in
/// registration order — drain first, close after, so no in-flight record is
/// lost.
pub struct QueuedHandler {
    tx: Option<Sender<Record>>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    mask: KindMask,
}

impl QueuedHandler {
    pub fn new(handlers: Vec<Box<dyn Handler>>) -> Self {
        let mut mask = [false; RECORD_KIND_COUNT];
        for handler in &handlers {
            let inner = kind_mask(handler.as_ref());
            for (slot, accepted) in mask.iter_mut().zip(inner) {
                *slot = *slot || accepted;
            }
        }
        let (tx, rx) = mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let worker = std::thread::Builder::new()
            .name("gantry-log".into())
            .spawn(move || drain_loop(rx, handlers, flag))
            .expect("spawn log worker");
        Self {
            tx: Some(tx),
            shutdown,
            worker: Some(worker),
            mask,
        }
    }
}

impl Handler for QueuedHandler {
    fn accepts(&self, kind: RecordKind) -> bool {
        self.mask[kind.index()]
    }

    fn handle(&mut self, record: &Record) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(record.clone());
        }
    }

    fn close(&mut self) {
        self.tx.take();
        self.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for QueuedHandler {
    fn drop(&mut self) {
        self.close();
    }
}

struct Slot {
    handler: Box<dyn Handler>,
    mask: KindMask,
    broken: bool,
}

fn drain_loop(rx: Receiver<Record>, handlers: Vec<Box<dyn Handler>>, shutdown: Arc<AtomicBool>) {
    let mut slots: Vec<Slot> = handlers
        .into_iter()
        .map(|handler| {
            let mask = kind_mask(handler.as_ref());
            Slot {
                handler,
                mask,
                broken: false,
            }
        })
        .collect();

    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        match rx.recv_timeout(LIVENESS_TICK) {
            Ok(record) => dispatch(&mut slots, &record),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Final non-blocking drain before the handlers go away.
    while let Ok(record) = rx.try_recv() {
        dispatch(&mut slots, &record);
    }
    for slot in &mut slots {
        if slot.broken {
            continue;
        }
        if catch_unwind(AssertUnwindSafe(|| slot.handler.close())).is_err() {
            tracing::error!("queued handler panicked during close");
        }
    }
}

fn dispatch(slots: &mut [Slot], record: &Record) {
    for slot in slots.iter_mut() {
        if slot.broken || !slot.mask[record.kind().index()] {
            continue;
        }
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            slot.handler.prehandle();
            slot.handler.handle(record);
            slot.handler.posthandle();
        }));
        if outcome.is_err() {
            slot.broken = true;
            tracing::error!("queued handler panicked; disabling it for this run");
        }
    }
}
