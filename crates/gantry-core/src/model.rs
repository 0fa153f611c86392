//! The schedule object model: tests, suites, the library-wide schedule, and
//! the explicit registration builder that replaces any implicit global
//! collection of constructed instances.

use std::collections::{BTreeSet, HashSet};
use std::panic::Location;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::RunConfig;
use crate::errors::ScheduleError;
use crate::filter;
use crate::fixture::Fixture;
use crate::status::Status;

/// Display name of the whole-run item.
pub const LIBRARY_NAME: &str = "Entire Test Collection";
/// Uid of the whole-run item.
pub const LIBRARY_UID: &str = "library";

/// Identity of an item as seen by fixtures and the record stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemHandle {
    pub uid: String,
    pub name: String,
}

/// A test body. Runs inside the sandboxed child process; an `Err` return or
/// a panic both count as a test fault.
pub type TestBody = Box<dyn Fn(&TestContext<'_>) -> anyhow::Result<()>>;

/// Execution parameters handed to a test body.
pub struct TestContext<'a> {
    fixtures: &'a [Box<dyn Fixture>],
}

impl<'a> TestContext<'a> {
    pub(crate) fn new(fixtures: &'a [Box<dyn Fixture>]) -> Self {
        Self { fixtures }
    }

    /// Look up one of the test's own fixtures by name and concrete type.
    pub fn fixture<T: Fixture + 'static>(&self, name: &str) -> Option<&T> {
        self.fixtures
            .iter()
            .find(|fixture| fixture.name() == name)
            .and_then(|fixture| fixture.as_any().downcast_ref())
    }
}

fn test_uid(path: &Path, suite: &str, name: &str) -> String {
    format!("{}:{}:{}", path.display(), suite, name)
}

fn suite_uid(path: &Path, name: &str) -> String {
    format!("{}:{}", path.display(), name)
}

/// A single check: identity, owned fixtures, a body, and a status.
pub struct TestCase {
    name: String,
    uid: String,
    path: PathBuf,
    fixtures: Vec<Box<dyn Fixture>>,
    body: TestBody,
    status: Status,
}

impl TestCase {
    /// The defining source location is captured from the caller; together
    /// with the owning suite's name it forms the test's uid.
    #[track_caller]
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&TestContext<'_>) -> anyhow::Result<()> + 'static,
    {
        let caller = Location::caller();
        Self {
            name: name.into(),
            uid: String::new(),
            path: PathBuf::from(caller.file()),
            fixtures: Vec::new(),
            body: Box::new(body),
            status: Status::NotRun,
        }
    }

    pub fn with_fixture(mut self, fixture: impl Fixture + 'static) -> Self {
        self.fixtures.push(Box::new(fixture));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Empty until the test is adopted by a suite.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn handle(&self) -> ItemHandle {
        ItemHandle {
            uid: self.uid.clone(),
            name: self.name.clone(),
        }
    }

    pub(crate) fn adopt(&mut self, suite_name: &str) {
        self.uid = test_uid(&self.path, suite_name, &self.name);
    }

    pub(crate) fn body(&self) -> &TestBody {
        &self.body
    }

    pub(crate) fn fixtures(&self) -> &[Box<dyn Fixture>] {
        &self.fixtures
    }

    pub(crate) fn fixtures_mut(&mut self) -> &mut [Box<dyn Fixture>] {
        &mut self.fixtures
    }

    pub(crate) fn advance(&mut self, next: Status) {
        advance_status(&mut self.status, next, &self.uid);
    }
}

/// Listing/finalization snapshot of a suite.
#[derive(Debug, Clone, Serialize)]
pub struct SuiteMetadata {
    pub name: String,
    pub uid: String,
    pub tags: BTreeSet<String>,
    pub path: PathBuf,
    pub status: Status,
}

/// An ordered sequence of tests with its own fixtures and tag set.
///
/// Test order is execution order and is meaningful; re-ordering changes how
/// partial failures land.
pub struct TestSuite {
    name: String,
    uid: String,
    path: PathBuf,
    tags: BTreeSet<String>,
    fixtures: Vec<Box<dyn Fixture>>,
    tests: Vec<TestCase>,
    status: Status,
}

impl TestSuite {
    #[track_caller]
    pub fn new(name: impl Into<String>) -> Self {
        let caller = Location::caller();
        let name = name.into();
        let path = PathBuf::from(caller.file());
        let uid = suite_uid(&path, &name);
        Self {
            name,
            uid,
            path,
            tags: BTreeSet::new(),
            fixtures: Vec::new(),
            tests: Vec::new(),
            status: Status::NotRun,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_fixture(mut self, fixture: impl Fixture + 'static) -> Self {
        self.fixtures.push(Box::new(fixture));
        self
    }

    pub fn with_test(mut self, mut test: TestCase) -> Self {
        test.adopt(&self.name);
        self.tests.push(test);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn tests(&self) -> &[TestCase] {
        &self.tests
    }

    pub fn metadata(&self) -> SuiteMetadata {
        SuiteMetadata {
            name: self.name.clone(),
            uid: self.uid.clone(),
            tags: self.tags.clone(),
            path: self.path.clone(),
            status: self.status,
        }
    }

    pub fn handle(&self) -> ItemHandle {
        ItemHandle {
            uid: self.uid.clone(),
            name: self.name.clone(),
        }
    }

    pub(crate) fn split_mut(&mut self) -> (&mut [Box<dyn Fixture>], &mut [TestCase]) {
        (&mut self.fixtures, &mut self.tests)
    }

    pub(crate) fn fixtures_mut(&mut self) -> &mut [Box<dyn Fixture>] {
        &mut self.fixtures
    }

    pub(crate) fn advance(&mut self, next: Status) {
        advance_status(&mut self.status, next, &self.uid);
    }
}

/// Metadata snapshot of the finalized schedule, handed to every fixture's
/// `schedule_finalized` so globally-aware fixtures can configure themselves
/// before any setup runs.
#[derive(Debug, Clone)]
pub struct ScheduleDigest {
    pub suites: Vec<SuiteMetadata>,
    /// Every test in execution order.
    pub tests: Vec<ItemHandle>,
}

/// The whole run: ordered suites plus global fixtures. Membership is fixed
/// once built; fixtures may still mutate their internal state.
pub struct Schedule {
    suites: Vec<TestSuite>,
    global_fixtures: Vec<Box<dyn Fixture>>,
    status: Status,
}

impl Schedule {
    pub fn suites(&self) -> &[TestSuite] {
        &self.suites
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn handle(&self) -> ItemHandle {
        ItemHandle {
            uid: LIBRARY_UID.to_string(),
            name: LIBRARY_NAME.to_string(),
        }
    }

    pub fn digest(&self) -> ScheduleDigest {
        ScheduleDigest {
            suites: self.suites.iter().map(TestSuite::metadata).collect(),
            tests: self
                .suites
                .iter()
                .flat_map(|suite| suite.tests.iter().map(TestCase::handle))
                .collect(),
        }
    }

    /// Notify every fixture (global, suite, test — in that order) that the
    /// schedule is final. Called exactly once, before any setup.
    pub fn finalize_fixtures(&mut self) {
        let digest = self.digest();
        for fixture in &mut self.global_fixtures {
            fixture.schedule_finalized(&digest);
        }
        for suite in &mut self.suites {
            for fixture in &mut suite.fixtures {
                fixture.schedule_finalized(&digest);
            }
            for test in &mut suite.tests {
                for fixture in &mut test.fixtures {
                    fixture.schedule_finalized(&digest);
                }
            }
        }
    }

    pub(crate) fn split_mut(&mut self) -> (&mut [Box<dyn Fixture>], &mut [TestSuite]) {
        (&mut self.global_fixtures, &mut self.suites)
    }

    pub(crate) fn global_fixtures_mut(&mut self) -> &mut [Box<dyn Fixture>] {
        &mut self.global_fixtures
    }

    pub(crate) fn advance(&mut self, next: Status) {
        advance_status(&mut self.status, next, LIBRARY_UID);
    }
}

/// Explicit collector for suites and global fixtures.
///
/// Identities must be unique within the schedule; a clash is a registration
/// error, not something discovered mid-run.
#[derive(Default)]
pub struct ScheduleBuilder {
    suites: Vec<TestSuite>,
    global_fixtures: Vec<Box<dyn Fixture>>,
    seen_uids: HashSet<String>,
}

impl std::fmt::Debug for ScheduleBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleBuilder")
            .field("suites", &self.suites.len())
            .field("global_fixtures", &self.global_fixtures.len())
            .field("seen_uids", &self.seen_uids)
            .finish()
    }
}

impl ScheduleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_suite(&mut self, suite: TestSuite) -> Result<&mut Self, ScheduleError> {
        if !self.seen_uids.insert(suite.uid.clone()) {
            return Err(ScheduleError::DuplicateUid {
                uid: suite.uid.clone(),
            });
        }
        for test in &suite.tests {
            if !self.seen_uids.insert(test.uid.clone()) {
                return Err(ScheduleError::DuplicateUid {
                    uid: test.uid.clone(),
                });
            }
        }
        self.suites.push(suite);
        Ok(self)
    }

    pub fn add_global_fixture(&mut self, fixture: impl Fixture + 'static) -> &mut Self {
        self.global_fixtures.push(Box::new(fixture));
        self
    }

    /// Apply the config's tag filters and directory restriction, keeping
    /// declared suite order.
    pub fn apply_filters(&mut self, config: &RunConfig) -> &mut Self {
        let metadata: Vec<SuiteMetadata> = self.suites.iter().map(TestSuite::metadata).collect();
        let keep = filter::select_suites(&metadata, config);
        let mut slot = keep.iter();
        self.suites.retain(|_| *slot.next().unwrap_or(&false));
        self
    }

    pub fn build(self) -> Schedule {
        Schedule {
            suites: self.suites,
            global_fixtures: self.global_fixtures,
            status: Status::NotRun,
        }
    }
}

fn advance_status(current: &mut Status, next: Status, uid: &str) {
    if !current.may_advance_to(next) {
        tracing::warn!(uid, from = %current, to = %next, "out-of-order status transition");
        debug_assert!(
            current.may_advance_to(next),
            "out-of-order status transition for {uid}: {current} -> {next}"
        );
    }
    *current = next;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passing(name: &str) -> TestCase {
        TestCase::new(name, |_| Ok(()))
    }

    #[test]
    fn uids_combine_source_path_suite_and_name() {
        let suite = TestSuite::new("Arithmetic").with_test(passing("adds"));
        assert!(suite.uid().ends_with("model.rs:Arithmetic"));
        let test = &suite.tests()[0];
        assert!(test.uid().ends_with("model.rs:Arithmetic:adds"));
        assert!(test.uid().starts_with(&suite.path().display().to_string()));
    }

    #[test]
    fn duplicate_suite_uid_is_rejected() {
        let mut builder = ScheduleBuilder::new();
        builder.add_suite(TestSuite::new("Same")).unwrap();
        let err = builder.add_suite(TestSuite::new("Same")).unwrap_err();
        assert!(matches!(err, ScheduleError::DuplicateUid { .. }));
    }

    #[test]
    fn duplicate_test_uid_is_rejected() {
        let mut builder = ScheduleBuilder::new();
        let suite = TestSuite::new("S")
            .with_test(passing("twin"))
            .with_test(passing("twin"));
        let err = builder.add_suite(suite).unwrap_err();
        assert!(matches!(err, ScheduleError::DuplicateUid { .. }));
    }

    #[test]
    fn digest_lists_all_tests_in_execution_order() {
        let mut builder = ScheduleBuilder::new();
        builder
            .add_suite(
                TestSuite::new("First")
                    .with_test(passing("a"))
                    .with_test(passing("b")),
            )
            .unwrap();
        builder
            .add_suite(TestSuite::new("Second").with_test(passing("c")))
            .unwrap();
        let schedule = builder.build();
        let digest = schedule.digest();
        assert_eq!(digest.suites.len(), 2);
        let names: Vec<&str> = digest.tests.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }
}
