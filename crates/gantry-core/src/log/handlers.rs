//! The built-in record consumers: human-readable terminal lines and the
//! end-of-run summary counter. Result persistence lives in `crate::result`.

use crate::log::{Level, Record, RecordKind, RecordPayload};
use crate::status::Status;

/// A registered consumer of the record stream.
///
/// `accepts` is the declared acceptance filter, evaluated once when the bus
/// freezes its handler set; `prehandle`/`handle`/`posthandle` run in
/// registration order for every accepted record.
pub trait Handler: Send {
    fn accepts(&self, kind: RecordKind) -> bool {
        let _ = kind;
        true
    }

    fn prehandle(&mut self) {}

    fn handle(&mut self, record: &Record);

    fn posthandle(&mut self) {}

    /// Flush and finalize; called exactly once when the bus closes.
    fn close(&mut self) {}
}

/// Prints status transitions as they happen and, when streaming is enabled,
/// echoes the sandboxed child's stdout/stderr.
pub struct TerminalHandler {
    stream: bool,
    verbosity: Level,
}

impl TerminalHandler {
    pub fn new(stream: bool, verbosity: Level) -> Self {
        Self { stream, verbosity }
    }
}

impl Handler for TerminalHandler {
    fn accepts(&self, kind: RecordKind) -> bool {
        match kind {
            RecordKind::Stdout | RecordKind::Stderr => self.stream,
            _ => true,
        }
    }

    fn handle(&mut self, record: &Record) {
        match &record.payload {
            RecordPayload::TestStatus { status } => match status {
                Status::InProgress => println!("Running {}...", record.name),
                status if status.is_terminal() => println!("{} - {}", record.name, status),
                _ => {}
            },
            RecordPayload::SuiteStatus { status } => match status {
                Status::InProgress => println!("Running {} test suite...", record.name),
                status if status.is_terminal() => println!("{}", "-".repeat(60)),
                _ => {}
            },
            RecordPayload::LibraryStatus { .. } => {}
            RecordPayload::Stdout { data } => println!("{data}"),
            RecordPayload::Stderr { data } => eprintln!("{data}"),
            RecordPayload::Message { data, level } => {
                if *level <= self.verbosity {
                    match &record.caller {
                        Some(caller) => println!("{data} ({}:{})", caller.file, caller.line),
                        None => println!("{data}"),
                    }
                }
            }
        }
    }
}

/// Counts terminal test statuses and prints one severity-ordered line when
/// the bus closes.
#[derive(Default)]
pub struct SummaryHandler {
    failed: usize,
    passed: usize,
    skipped: usize,
}

impl SummaryHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn summary_line(&self) -> String {
        let mut parts = Vec::new();
        for (count, label) in [
            (self.failed, "Failed"),
            (self.passed, "Passed"),
            (self.skipped, "Skipped"),
        ] {
            if count > 0 {
                parts.push(format!("{count} {label}"));
            }
        }
        if parts.is_empty() {
            "No tests were run".to_string()
        } else {
            parts.join(", ")
        }
    }
}

impl Handler for SummaryHandler {
    fn accepts(&self, kind: RecordKind) -> bool {
        kind == RecordKind::TestStatus
    }

    fn handle(&mut self, record: &Record) {
        if let RecordPayload::TestStatus { status } = &record.payload {
            match status {
                Status::Failed => self.failed += 1,
                Status::Passed => self.passed += 1,
                Status::Skipped => self.skipped += 1,
                Status::NotRun | Status::InProgress => {}
            }
        }
    }

    fn close(&mut self) {
        println!("{}", "=".repeat(60));
        println!("{}", self.summary_line());
    }
}
