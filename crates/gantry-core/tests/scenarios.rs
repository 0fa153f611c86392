//! End-to-end runs of the whole engine: schedules assembled through the
//! public API, driven by the library runner, observed through the record
//! stream and the persisted result store.

#![cfg(unix)]

use std::any::Any;
use std::sync::{Arc, Mutex};

use serial_test::serial;

use gantry_core::{
    run_schedule, run_schedule_with_log, Fixture, Handler, ItemHandle, Log, Record, RecordPayload,
    RunConfig, ScheduleBuilder, SetupError, Status, TagFilter, TestCase, TestSuite,
};

#[derive(Clone, Default)]
struct Capture {
    records: Arc<Mutex<Vec<Record>>>,
}

impl Capture {
    fn test_statuses(&self, uid_suffix: &str) -> Vec<Status> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.uid.ends_with(uid_suffix))
            .filter_map(|r| match &r.payload {
                RecordPayload::TestStatus { status } => Some(*status),
                _ => None,
            })
            .collect()
    }

    fn messages(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| match &r.payload {
                RecordPayload::Message { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    fn library_statuses(&self) -> Vec<Status> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| match &r.payload {
                RecordPayload::LibraryStatus { status } => Some(*status),
                _ => None,
            })
            .collect()
    }
}

impl Handler for Capture {
    fn handle(&mut self, record: &Record) {
        self.records.lock().unwrap().push(record.clone());
    }
}

struct SkipFixture;

impl Fixture for SkipFixture {
    fn name(&self) -> &str {
        "skip-fixture"
    }

    fn setup(&mut self, _item: &ItemHandle) -> Result<(), SetupError> {
        Err(SetupError::skip("environment not available"))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct BadTeardownFixture;

impl Fixture for BadTeardownFixture {
    fn name(&self) -> &str {
        "bad-teardown"
    }

    fn teardown(&mut self, _item: &ItemHandle) -> anyhow::Result<()> {
        anyhow::bail!("scripted teardown fault")
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn run_with_capture(builder: ScheduleBuilder, config: &RunConfig) -> (Status, Capture) {
    let capture = Capture::default();
    let log = Log::new();
    log.add_handler(capture.clone());
    let mut schedule = builder.build();
    let status = run_schedule_with_log(&mut schedule, config, &log);
    log.close();
    (status, capture)
}

#[test]
#[serial]
fn passing_and_failing_tests_aggregate_to_failed() {
    let mut builder = ScheduleBuilder::new();
    builder
        .add_suite(
            TestSuite::new("Asserts")
                .with_test(TestCase::new("true-assert", |_| {
                    assert_eq!(1 + 1, 2);
                    Ok(())
                }))
                .with_test(TestCase::new("false-assert", |_| {
                    assert_eq!(1 + 1, 3, "deliberately false");
                    Ok(())
                })),
        )
        .unwrap();

    let (status, capture) = run_with_capture(builder, &RunConfig::default());
    assert_eq!(status, Status::Failed);
    assert_eq!(
        capture.test_statuses(":true-assert"),
        [Status::InProgress, Status::Passed]
    );
    assert_eq!(
        capture.test_statuses(":false-assert"),
        [Status::InProgress, Status::Failed]
    );
    assert_eq!(
        capture.library_statuses(),
        [Status::InProgress, Status::Failed]
    );
}

#[test]
#[serial]
fn skip_fixture_skips_only_its_test() {
    let mut builder = ScheduleBuilder::new();
    builder
        .add_suite(
            TestSuite::new("Mixed")
                .with_test(
                    TestCase::new("skipped-one", |_| Ok(())).with_fixture(SkipFixture),
                )
                .with_test(TestCase::new("passing-one", |_| Ok(()))),
        )
        .unwrap();

    let (status, capture) = run_with_capture(builder, &RunConfig::default());
    assert_eq!(status, Status::Passed);
    assert_eq!(
        capture.test_statuses(":skipped-one"),
        [Status::InProgress, Status::Skipped]
    );
    assert_eq!(
        capture.test_statuses(":passing-one"),
        [Status::InProgress, Status::Passed]
    );
}

#[test]
#[serial]
fn teardown_fault_does_not_change_a_passing_status() {
    let mut builder = ScheduleBuilder::new();
    builder
        .add_suite(
            TestSuite::new("Cleanup").with_test(
                TestCase::new("passes-anyway", |_| Ok(())).with_fixture(BadTeardownFixture),
            ),
        )
        .unwrap();

    let (status, capture) = run_with_capture(builder, &RunConfig::default());
    assert_eq!(status, Status::Passed);
    assert_eq!(
        capture.test_statuses(":passes-anyway"),
        [Status::InProgress, Status::Passed]
    );
    assert!(capture
        .messages()
        .iter()
        .any(|m| m.contains("teardown") && m.contains("bad-teardown")));
}

#[test]
fn include_then_exclude_same_tag_empties_the_schedule() {
    let mut builder = ScheduleBuilder::new();
    builder
        .add_suite(
            TestSuite::new("Tagged")
                .with_tag("X")
                .with_test(TestCase::new("t", |_| Ok(()))),
        )
        .unwrap();
    let config = RunConfig {
        tag_filters: vec![
            TagFilter::include("X").unwrap(),
            TagFilter::exclude("X").unwrap(),
        ],
        ..RunConfig::default()
    };
    builder.apply_filters(&config);
    let schedule = builder.build();
    assert!(schedule.suites().is_empty());
}

#[test]
#[serial]
fn persisted_results_use_sanitized_uid_directories() {
    let dir = tempfile::tempdir().unwrap();
    let mut builder = ScheduleBuilder::new();
    builder
        .add_suite(
            TestSuite::new("Persisted").with_test(TestCase::new("writes-output", |_| {
                println!("captured line");
                Ok(())
            })),
        )
        .unwrap();
    let mut schedule = builder.build();
    let suite_uid = schedule.suites()[0].uid().to_string();
    let test_uid = schedule.suites()[0].tests()[0].uid().to_string();
    assert!(suite_uid.contains('/'), "uid should embed the source path");

    let config = RunConfig {
        result_path: dir.path().to_path_buf(),
        ..RunConfig::default()
    };
    let status = run_schedule(&mut schedule, &config).unwrap();
    assert_eq!(status, Status::Passed);

    let entry = dir
        .path()
        .join(suite_uid.replace('/', "-"))
        .join(test_uid.replace('/', "-"));
    let stdout = std::fs::read_to_string(entry.join("stdout")).unwrap();
    assert_eq!(stdout, "captured line\n");
    assert!(entry.join("stderr").exists());

    let tree: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("results.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(tree["library"], "Passed");
    assert_eq!(tree["suites"][&suite_uid]["tests"][&test_uid]["status"], "Passed");
}

#[test]
#[serial]
fn records_arrive_in_execution_order() {
    let mut builder = ScheduleBuilder::new();
    builder
        .add_suite(
            TestSuite::new("Ordered")
                .with_test(TestCase::new("first", |_| Ok(())))
                .with_test(TestCase::new("second", |_| Ok(()))),
        )
        .unwrap();

    let (_, capture) = run_with_capture(builder, &RunConfig::default());
    let records = capture.records.lock().unwrap();
    let positions: Vec<usize> = [":first", ":second"]
        .iter()
        .map(|suffix| {
            records
                .iter()
                .position(|r| {
                    r.uid.ends_with(suffix)
                        && matches!(
                            r.payload,
                            RecordPayload::TestStatus {
                                status: Status::InProgress
                            }
                        )
                })
                .unwrap()
        })
        .collect();
    // Every record of the first test precedes the second test's InProgress.
    let first_terminal = records
        .iter()
        .position(|r| {
            r.uid.ends_with(":first")
                && matches!(
                    r.payload,
                    RecordPayload::TestStatus {
                        status: Status::Passed
                    }
                )
        })
        .unwrap();
    assert!(positions[0] < first_terminal);
    assert!(first_terminal < positions[1]);
}

#[test]
#[serial]
fn global_skip_fixture_skips_the_whole_library() {
    let mut builder = ScheduleBuilder::new();
    builder
        .add_suite(TestSuite::new("Unreached").with_test(TestCase::new("never-runs", |_| Ok(()))))
        .unwrap();
    builder.add_global_fixture(SkipFixture);

    let (status, capture) = run_with_capture(builder, &RunConfig::default());
    assert_eq!(status, Status::Skipped);
    assert!(capture.test_statuses(":never-runs").is_empty());
}

#[test]
#[serial]
fn schedule_digest_reaches_fixtures_before_any_setup() {
    #[derive(Default)]
    struct CountingFixture {
        seen_tests: Arc<Mutex<Option<usize>>>,
    }

    impl Fixture for CountingFixture {
        fn name(&self) -> &str {
            "counting"
        }

        fn schedule_finalized(&mut self, schedule: &gantry_core::ScheduleDigest) {
            *self.seen_tests.lock().unwrap() = Some(schedule.tests.len());
        }

        fn setup(&mut self, _item: &ItemHandle) -> Result<(), SetupError> {
            if self.seen_tests.lock().unwrap().is_none() {
                return Err(anyhow::anyhow!("setup before schedule_finalized").into());
            }
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    let seen = Arc::new(Mutex::new(None));
    let fixture = CountingFixture {
        seen_tests: seen.clone(),
    };
    let mut builder = ScheduleBuilder::new();
    builder
        .add_suite(
            TestSuite::new("Counted")
                .with_fixture(fixture)
                .with_test(TestCase::new("a", |_| Ok(())))
                .with_test(TestCase::new("b", |_| Ok(()))),
        )
        .unwrap();

    let (status, _) = run_with_capture(builder, &RunConfig::default());
    assert_eq!(status, Status::Passed);
    assert_eq!(*seen.lock().unwrap(), Some(2));
}
