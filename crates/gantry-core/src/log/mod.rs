//! The ordered record stream: every lifecycle event of a run is an immutable
//! [`Record`] pushed through one [`Log`] instance and fanned out to the
//! registered handlers in registration order.

mod handlers;
mod queue;

pub use handlers::{Handler, SummaryHandler, TerminalHandler};
pub use queue::QueuedHandler;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::model::ItemHandle;
use crate::status::Status;

/// Message severity, most severe first. A record is visible at verbosity `v`
/// when its level is `<= v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Level {
    /// Map a repeated `-v` count onto a visibility threshold, starting from
    /// `Info`.
    pub fn from_verbosity(count: u8) -> Level {
        match count {
            0 => Level::Info,
            1 => Level::Debug,
            _ => Level::Trace,
        }
    }
}

/// The closed set of record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    TestStatus,
    SuiteStatus,
    LibraryStatus,
    Stdout,
    Stderr,
    Message,
}

pub(crate) const RECORD_KIND_COUNT: usize = 6;

impl RecordKind {
    pub(crate) fn index(self) -> usize {
        match self {
            RecordKind::TestStatus => 0,
            RecordKind::SuiteStatus => 1,
            RecordKind::LibraryStatus => 2,
            RecordKind::Stdout => 3,
            RecordKind::Stderr => 4,
            RecordKind::Message => 5,
        }
    }

    pub(crate) fn all() -> [RecordKind; RECORD_KIND_COUNT] {
        [
            RecordKind::TestStatus,
            RecordKind::SuiteStatus,
            RecordKind::LibraryStatus,
            RecordKind::Stdout,
            RecordKind::Stderr,
            RecordKind::Message,
        ]
    }
}

/// Payload of one record.
#[derive(Debug, Clone, Serialize)]
pub enum RecordPayload {
    TestStatus { status: Status },
    SuiteStatus { status: Status },
    LibraryStatus { status: Status },
    Stdout { data: String },
    Stderr { data: String },
    Message { data: String, level: Level },
}

impl RecordPayload {
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordPayload::TestStatus { .. } => RecordKind::TestStatus,
            RecordPayload::SuiteStatus { .. } => RecordKind::SuiteStatus,
            RecordPayload::LibraryStatus { .. } => RecordKind::LibraryStatus,
            RecordPayload::Stdout { .. } => RecordKind::Stdout,
            RecordPayload::Stderr { .. } => RecordKind::Stderr,
            RecordPayload::Message { .. } => RecordKind::Message,
        }
    }
}

/// Source location of a message's call site.
#[derive(Debug, Clone, Serialize)]
pub struct Caller {
    pub file: String,
    pub line: u32,
    pub function: String,
}

/// Capture the call site for a [`RecordPayload::Message`] record.
#[macro_export]
macro_rules! caller {
    () => {
        $crate::log::Caller {
            file: file!().to_string(),
            line: line!(),
            function: module_path!().to_string(),
        }
    };
}

/// One immutable event. Produced by exactly one runner or output pump,
/// consumed read-only by every handler.
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub uid: String,
    pub name: String,
    /// Wall-clock seconds since the Unix epoch.
    pub timestamp: f64,
    pub caller: Option<Caller>,
    pub payload: RecordPayload,
}

impl Record {
    pub fn new(item: &ItemHandle, payload: RecordPayload) -> Self {
        Self {
            uid: item.uid.clone(),
            name: item.name.clone(),
            timestamp: chrono::Utc::now().timestamp_micros() as f64 / 1e6,
            caller: None,
            payload,
        }
    }

    pub fn with_caller(mut self, caller: Caller) -> Self {
        self.caller = Some(caller);
        self
    }

    pub fn kind(&self) -> RecordKind {
        self.payload.kind()
    }
}

struct HandlerSlot {
    handler: Box<dyn Handler>,
    broken: bool,
}

#[derive(Default)]
struct LogInner {
    slots: Vec<HandlerSlot>,
    /// Frozen on the first record: for each record kind, the accepting
    /// handler indices in registration order.
    dispatch: Option<Vec<Vec<usize>>>,
    closed: bool,
}

/// The per-run record bus. Cheap to clone; all clones share one handler
/// chain. Handlers register before the run starts — the set freezes on the
/// first record and `add_handler` becomes a no-op after that.
#[derive(Clone, Default)]
pub struct Log {
    inner: Arc<Mutex<LogInner>>,
}

impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, handler: impl Handler + 'static) {
        let mut inner = self.inner.lock().expect("log lock");
        if inner.dispatch.is_some() {
            tracing::warn!("handler registered after the first record; ignoring");
            return;
        }
        inner.slots.push(HandlerSlot {
            handler: Box::new(handler),
            broken: false,
        });
    }

    /// Push one record to every accepting handler, in registration order.
    ///
    /// A handler that panics is disabled and reported; one bad observer must
    /// not take the run down with it.
    pub fn record(&self, record: Record) {
        let mut inner = self.inner.lock().expect("log lock");
        if inner.closed {
            tracing::warn!(kind = ?record.kind(), "record after log close; dropping");
            return;
        }
        if inner.dispatch.is_none() {
            let table = freeze(&inner.slots);
            inner.dispatch = Some(table);
        }
        let indices = inner.dispatch.as_ref().expect("frozen dispatch")
            [record.kind().index()]
        .clone();
        for idx in indices {
            let slot = &mut inner.slots[idx];
            if slot.broken {
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                slot.handler.prehandle();
                slot.handler.handle(&record);
                slot.handler.posthandle();
            }));
            if outcome.is_err() {
                slot.broken = true;
                tracing::error!(handler = idx, "handler panicked; disabling it for this run");
            }
        }
    }

    /// Flush and finalize every handler in registration order. Irreversible;
    /// records arriving afterwards are dropped.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("log lock");
        if inner.closed {
            return;
        }
        inner.closed = true;
        for (idx, slot) in inner.slots.iter_mut().enumerate() {
            if slot.broken {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| slot.handler.close())).is_err() {
                tracing::error!(handler = idx, "handler panicked during close");
            }
        }
    }

    pub fn test_status(&self, item: &ItemHandle, status: Status) {
        self.record(Record::new(item, RecordPayload::TestStatus { status }));
    }

    pub fn suite_status(&self, item: &ItemHandle, status: Status) {
        self.record(Record::new(item, RecordPayload::SuiteStatus { status }));
    }

    pub fn library_status(&self, item: &ItemHandle, status: Status) {
        self.record(Record::new(item, RecordPayload::LibraryStatus { status }));
    }

    pub fn stdout(&self, item: &ItemHandle, data: impl Into<String>) {
        self.record(Record::new(item, RecordPayload::Stdout { data: data.into() }));
    }

    pub fn stderr(&self, item: &ItemHandle, data: impl Into<String>) {
        self.record(Record::new(item, RecordPayload::Stderr { data: data.into() }));
    }

    pub fn message(&self, item: &ItemHandle, data: impl Into<String>, level: Level, caller: Caller) {
        self.record(
            Record::new(
                item,
                RecordPayload::Message {
                    data: data.into(),
                    level,
                },
            )
            .with_caller(caller),
        );
    }
}

fn freeze(slots: &[HandlerSlot]) -> Vec<Vec<usize>> {
    RecordKind::all()
        .iter()
        .map(|kind| {
            slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.handler.accepts(*kind))
                .map(|(idx, _)| idx)
                .collect()
        })
        .collect()
}
