//! The three-level execution drivers. Every level follows one algorithm:
//! announce `InProgress`, build fixtures, run the level-specific body,
//! announce the terminal status, then tear fixtures down unconditionally.

use crate::caller;
use crate::fixture::{Fixture, FixtureBuilder, FixtureError};
use crate::log::{Level, Log};
use crate::model::{ItemHandle, Schedule, TestCase, TestSuite};
use crate::sandbox::{Sandbox, SandboxOutcome};
use crate::status::{aggregate, Status};

/// The execute capability shared by all three levels.
pub trait Runner {
    /// Drive the item to a terminal status and return it.
    fn execute(&mut self) -> Status;
}

/// Which status record an item's announcements produce.
#[derive(Clone, Copy)]
enum Scope {
    Test,
    Suite,
    Library,
}

fn announce(log: &Log, scope: Scope, item: &ItemHandle, status: Status) {
    match scope {
        Scope::Test => log.test_status(item, status),
        Scope::Suite => log.suite_status(item, status),
        Scope::Library => log.library_status(item, status),
    }
}

/// Step 2 of the shared algorithm. `None` means all fixtures built and the
/// body may run; `Some(Skipped)` means a fixture decided otherwise, with the
/// cause already on the record stream.
fn build_fixtures(
    log: &Log,
    builder: &mut FixtureBuilder,
    fixtures: &mut [Box<dyn Fixture>],
    item: &ItemHandle,
) -> Option<Status> {
    match builder.setup(fixtures, item) {
        Ok(()) => None,
        Err(err @ FixtureError::Skip { .. }) => {
            log.message(item, err.to_string(), Level::Info, caller!());
            Some(Status::Skipped)
        }
        Err(err @ FixtureError::Broken { .. }) => {
            log.message(item, format!("{err:#}"), Level::Error, caller!());
            Some(Status::Skipped)
        }
    }
}

/// Step 5. Runs even when fixture setup failed or the body went badly;
/// individual teardown faults are reported, never propagated.
fn teardown_fixtures(
    log: &Log,
    builder: &mut FixtureBuilder,
    fixtures: &mut [Box<dyn Fixture>],
    item: &ItemHandle,
) {
    for failure in builder.teardown(fixtures, item) {
        log.message(item, failure, Level::Warn, caller!());
    }
}

/// Runs one test body inside the sandbox and maps the outcome to a status.
pub struct TestRunner<'a> {
    pub test: &'a mut TestCase,
    pub log: &'a Log,
    pub sandbox: &'a Sandbox,
}

impl TestRunner<'_> {
    fn run_body(&self, item: &ItemHandle) -> Status {
        let test = &*self.test;
        match self.sandbox.execute(item, test.body(), test.fixtures()) {
            Ok(outcome) => {
                match &outcome {
                    SandboxOutcome::Completed => {}
                    SandboxOutcome::Fault(fault) => {
                        let text = if fault.trace.is_empty() {
                            fault.message.clone()
                        } else {
                            format!("{}\n{}", fault.message, fault.trace)
                        };
                        self.log.message(item, text, Level::Error, caller!());
                    }
                    SandboxOutcome::Crashed { detail } => {
                        self.log.message(item, detail.clone(), Level::Error, caller!());
                    }
                }
                outcome.status()
            }
            Err(err) => {
                // Could not even isolate the body; the test cannot be said
                // to have run, but the run itself continues.
                self.log
                    .message(item, format!("sandbox error: {err:#}"), Level::Error, caller!());
                Status::Failed
            }
        }
    }
}

impl Runner for TestRunner<'_> {
    fn execute(&mut self) -> Status {
        let item = self.test.handle();
        self.test.advance(Status::InProgress);
        announce(self.log, Scope::Test, &item, Status::InProgress);

        let mut builder = FixtureBuilder::new();
        let status = match build_fixtures(self.log, &mut builder, self.test.fixtures_mut(), &item)
        {
            Some(status) => status,
            None => self.run_body(&item),
        };

        self.test.advance(status);
        announce(self.log, Scope::Test, &item, status);
        teardown_fixtures(self.log, &mut builder, self.test.fixtures_mut(), &item);
        status
    }
}

/// Runs a suite's tests strictly in declared order. A test's outcome never
/// affects its later siblings; fail-fast is left as an embedder-side
/// extension, not baseline behavior.
pub struct SuiteRunner<'a> {
    pub suite: &'a mut TestSuite,
    pub log: &'a Log,
    pub sandbox: &'a Sandbox,
}

impl Runner for SuiteRunner<'_> {
    fn execute(&mut self) -> Status {
        let item = self.suite.handle();
        self.suite.advance(Status::InProgress);
        announce(self.log, Scope::Suite, &item, Status::InProgress);

        let mut builder = FixtureBuilder::new();
        let status = {
            let (fixtures, tests) = self.suite.split_mut();
            match build_fixtures(self.log, &mut builder, fixtures, &item) {
                Some(status) => status,
                None => {
                    for test in tests.iter_mut() {
                        TestRunner {
                            test,
                            log: self.log,
                            sandbox: self.sandbox,
                        }
                        .execute();
                    }
                    aggregate(tests.iter().map(TestCase::status))
                }
            }
        };

        self.suite.advance(status);
        announce(self.log, Scope::Suite, &item, status);
        teardown_fixtures(self.log, &mut builder, self.suite.fixtures_mut(), &item);
        status
    }
}

/// Runs every suite of the schedule with the global fixtures bracketing the
/// whole run; a global fixture requesting skip skips the entire library.
pub struct LibraryRunner<'a> {
    pub schedule: &'a mut Schedule,
    pub log: &'a Log,
    pub sandbox: &'a Sandbox,
}

impl Runner for LibraryRunner<'_> {
    fn execute(&mut self) -> Status {
        let item = self.schedule.handle();
        self.schedule.advance(Status::InProgress);
        announce(self.log, Scope::Library, &item, Status::InProgress);

        let mut builder = FixtureBuilder::new();
        let status = {
            let (fixtures, suites) = self.schedule.split_mut();
            match build_fixtures(self.log, &mut builder, fixtures, &item) {
                Some(status) => status,
                None => {
                    for suite in suites.iter_mut() {
                        SuiteRunner {
                            suite,
                            log: self.log,
                            sandbox: self.sandbox,
                        }
                        .execute();
                    }
                    aggregate(suites.iter().map(TestSuite::status))
                }
            }
        };

        self.schedule.advance(status);
        announce(self.log, Scope::Library, &item, status);
        teardown_fixtures(
            self.log,
            &mut builder,
            self.schedule.global_fixtures_mut(),
            &item,
        );
        status
    }
}
