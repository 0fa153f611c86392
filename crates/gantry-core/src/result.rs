//! Durable projection of the record stream: per-test stdout/stderr files
//! under `<result_path>/<suite_uid>/<test_uid>/` plus a `results.json` tree
//! written when the bus closes. The result directory is owned exclusively by
//! this handler.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;

use crate::log::{Handler, Record, RecordKind, RecordPayload};
use crate::status::Status;

pub const RESULTS_FILE: &str = "results.json";

/// Make a uid safe to use as one directory name.
pub fn sanitize_uid(uid: &str) -> String {
    uid.replace(['/', '\\'], "-")
}

#[derive(Debug, Serialize)]
pub struct TestResultEntry {
    pub status: Status,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
}

#[derive(Debug, Default, Serialize)]
pub struct SuiteResults {
    pub status: Status,
    pub tests: BTreeMap<String, TestResultEntry>,
}

#[derive(Debug, Default, Serialize)]
pub struct ResultTree {
    pub library: Status,
    pub suites: BTreeMap<String, SuiteResults>,
}

struct OpenSinks {
    stdout: File,
    stderr: File,
}

/// Consumes status and output records into the persisted result layout.
///
/// The bus delivers records in execution order, so the most recent
/// `SuiteStatus(InProgress)` record identifies the suite that owns every
/// following test record.
pub struct ResultHandler {
    root: PathBuf,
    current_suite: Option<String>,
    open: BTreeMap<String, OpenSinks>,
    tree: ResultTree,
}

impl ResultHandler {
    pub fn new(result_path: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(result_path)
            .with_context(|| format!("create result directory {}", result_path.display()))?;
        Ok(Self {
            root: result_path.to_path_buf(),
            current_suite: None,
            open: BTreeMap::new(),
            tree: ResultTree::default(),
        })
    }

    fn entry_dir(&self, test_uid: &str) -> PathBuf {
        let suite = self.current_suite.as_deref().unwrap_or("no-suite");
        self.root
            .join(sanitize_uid(suite))
            .join(sanitize_uid(test_uid))
    }

    fn open_entry(&mut self, test_uid: &str) -> anyhow::Result<()> {
        let dir = self.entry_dir(test_uid);
        fs::create_dir_all(&dir)
            .with_context(|| format!("create test result directory {}", dir.display()))?;
        let stdout_path = dir.join("stdout");
        let stderr_path = dir.join("stderr");
        let sinks = OpenSinks {
            stdout: File::create(&stdout_path)
                .with_context(|| format!("create {}", stdout_path.display()))?,
            stderr: File::create(&stderr_path)
                .with_context(|| format!("create {}", stderr_path.display()))?,
        };
        self.open.insert(test_uid.to_string(), sinks);

        let suite_uid = self
            .current_suite
            .clone()
            .unwrap_or_else(|| "no-suite".to_string());
        self.tree
            .suites
            .entry(suite_uid)
            .or_default()
            .tests
            .insert(
                test_uid.to_string(),
                TestResultEntry {
                    status: Status::InProgress,
                    stdout_path,
                    stderr_path,
                },
            );
        Ok(())
    }

    fn record_test_status(&mut self, test_uid: &str, status: Status) {
        if let Some(suite_uid) = self.current_suite.clone() {
            if let Some(entry) = self
                .tree
                .suites
                .get_mut(&suite_uid)
                .and_then(|suite| suite.tests.get_mut(test_uid))
            {
                entry.status = status;
            }
        }
        // Dropping the sinks closes them.
        self.open.remove(test_uid);
    }

    fn append(&mut self, test_uid: &str, stream: RecordKind, data: &str) {
        if let Some(sinks) = self.open.get_mut(test_uid) {
            let sink = match stream {
                RecordKind::Stdout => &mut sinks.stdout,
                _ => &mut sinks.stderr,
            };
            if let Err(err) = writeln!(sink, "{data}") {
                tracing::error!(uid = test_uid, error = %err, "failed to append captured output");
            }
        }
    }

    fn apply(&mut self, record: &Record) -> anyhow::Result<()> {
        match &record.payload {
            RecordPayload::SuiteStatus { status } => match status {
                Status::InProgress => {
                    self.current_suite = Some(record.uid.clone());
                    self.tree.suites.entry(record.uid.clone()).or_default();
                }
                status if status.is_terminal() => {
                    if let Some(suite) = self.tree.suites.get_mut(&record.uid) {
                        suite.status = *status;
                    }
                }
                _ => {}
            },
            RecordPayload::LibraryStatus { status } => {
                if status.is_terminal() {
                    self.tree.library = *status;
                }
            }
            RecordPayload::TestStatus { status } => match status {
                Status::InProgress => self.open_entry(&record.uid)?,
                status if status.is_terminal() => self.record_test_status(&record.uid, *status),
                _ => {}
            },
            RecordPayload::Stdout { data } => self.append(&record.uid, RecordKind::Stdout, data),
            RecordPayload::Stderr { data } => self.append(&record.uid, RecordKind::Stderr, data),
            RecordPayload::Message { .. } => {}
        }
        Ok(())
    }

    fn persist(&self) -> anyhow::Result<()> {
        let path = self.root.join(RESULTS_FILE);
        let file =
            File::create(&path).with_context(|| format!("create {}", path.display()))?;
        serde_json::to_writer_pretty(file, &self.tree).context("serialize result tree")?;
        Ok(())
    }
}

impl Handler for ResultHandler {
    fn accepts(&self, kind: RecordKind) -> bool {
        !matches!(kind, RecordKind::Message)
    }

    fn handle(&mut self, record: &Record) {
        if let Err(err) = self.apply(record) {
            tracing::error!(error = %err, "result store failed to apply record");
        }
    }

    fn close(&mut self) {
        self.open.clear();
        if let Err(err) = self.persist() {
            tracing::error!(error = %err, "result store failed to persist tree");
        }
    }
}
