//! Embeddable command surface for gantry test binaries.
//!
//! A test binary registers its suites and hands the rest to the harness:
//!
//! ```no_run
//! use gantry_core::{ScheduleBuilder, TestCase, TestSuite};
//!
//! fn main() -> std::process::ExitCode {
//!     gantry_cli::main_with(|builder: &mut ScheduleBuilder| {
//!         builder.add_suite(
//!             TestSuite::new("Smoke").with_test(TestCase::new("boots", |_| Ok(()))),
//!         )?;
//!         Ok(())
//!     })
//! }
//! ```
//!
//! Exit codes: `0` when the library passed or skipped, `1` when it failed,
//! `2` for configuration or registration errors.

pub mod args;
mod commands;

use std::ffi::OsString;
use std::process::ExitCode;

use clap::{CommandFactory, FromArgMatches};
use gantry_core::{ScheduleBuilder, Status};

use crate::args::{ordered_tag_filters, Cli, Command};

pub const EXIT_PASSED: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_ERROR: i32 = 2;

/// Parse real process arguments, initialize logging, run, and map the
/// outcome to an exit code.
pub fn main_with<F>(register: F) -> ExitCode
where
    F: FnOnce(&mut ScheduleBuilder) -> anyhow::Result<()>,
{
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
    ExitCode::from(run_from(std::env::args_os(), register) as u8)
}

/// Testable entry point: parse the given argv and execute the selected
/// command against the registered suites.
pub fn run_from<I, T, F>(argv: I, register: F) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
    F: FnOnce(&mut ScheduleBuilder) -> anyhow::Result<()>,
{
    let matches = match Cli::command().try_get_matches_from(argv) {
        Ok(matches) => matches,
        Err(err) => {
            let _ = err.print();
            return EXIT_ERROR;
        }
    };
    let cli = match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return EXIT_ERROR;
        }
    };
    let Some((_, sub_matches)) = matches.subcommand() else {
        return EXIT_ERROR;
    };
    let tag_filters = match ordered_tag_filters(sub_matches) {
        Ok(filters) => filters,
        Err(err) => {
            eprintln!("error: {err:#}");
            return EXIT_ERROR;
        }
    };

    match cli.command {
        Command::Run(run_args) => {
            match commands::run::execute(run_args, cli.verbose, tag_filters, register) {
                Ok(Status::Failed) => EXIT_FAILED,
                Ok(_) => EXIT_PASSED,
                Err(err) => {
                    eprintln!("error: {err:#}");
                    EXIT_ERROR
                }
            }
        }
        Command::List(list_args) => {
            match commands::list::execute(list_args, tag_filters, register) {
                Ok(()) => EXIT_PASSED,
                Err(err) => {
                    eprintln!("error: {err:#}");
                    EXIT_ERROR
                }
            }
        }
    }
}
