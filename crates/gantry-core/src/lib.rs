//! Gantry core: a test-execution engine.
//!
//! An external loader (or an embedding binary) hands the engine a
//! [`Schedule`] — ordered suites of ordered tests plus global fixtures. The
//! engine builds each item's fixtures, executes every test body in a forked
//! child process, aggregates pass/fail/skip outcomes bottom-up, and
//! broadcasts every lifecycle event through one ordered record stream that
//! independent handlers (terminal display, summary counters, the persisted
//! result store) consume concurrently with execution.
//!
//! ```no_run
//! use gantry_core::{run_schedule, RunConfig, ScheduleBuilder, TestCase, TestSuite};
//!
//! let mut builder = ScheduleBuilder::new();
//! builder.add_suite(
//!     TestSuite::new("Arithmetic")
//!         .with_test(TestCase::new("adds", |_ctx| {
//!             assert_eq!(2 + 2, 4);
//!             Ok(())
//!         })),
//! )?;
//! let mut schedule = builder.build();
//! let status = run_schedule(&mut schedule, &RunConfig::default())?;
//! # anyhow::Ok(())
//! ```

pub mod config;
pub mod engine;
pub mod errors;
pub mod filter;
pub mod fixture;
pub mod log;
pub mod model;
pub mod result;
pub mod runner;
pub mod sandbox;
pub mod status;

pub use config::{FileDefaults, RunConfig, TagFilter};
pub use engine::{run_schedule, run_schedule_with_log};
pub use errors::ScheduleError;
pub use fixture::{Fixture, FixtureBuilder, FixtureError, SetupError};
pub use log::{Handler, Level, Log, Record, RecordKind, RecordPayload};
pub use model::{
    ItemHandle, Schedule, ScheduleBuilder, ScheduleDigest, SuiteMetadata, TestCase, TestContext,
    TestSuite,
};
pub use result::ResultHandler;
pub use runner::{LibraryRunner, Runner, SuiteRunner, TestRunner};
pub use sandbox::{FaultReport, Sandbox, SandboxOutcome};
pub use status::{aggregate, Status};
