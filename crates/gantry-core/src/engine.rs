//! Run orchestration: wires the standard handler chain behind the queued
//! consumer, finalizes fixtures, and drives the library runner.

use anyhow::Context;

use crate::config::RunConfig;
use crate::log::{Handler, Log, QueuedHandler, SummaryHandler, TerminalHandler};
use crate::model::Schedule;
use crate::result::ResultHandler;
use crate::runner::{LibraryRunner, Runner};
use crate::sandbox::Sandbox;
use crate::status::Status;

/// Execute a schedule with the standard handlers (terminal, summary, result
/// store) and return the library's terminal status.
pub fn run_schedule(schedule: &mut Schedule, config: &RunConfig) -> anyhow::Result<Status> {
    let log = Log::new();
    let handlers: Vec<Box<dyn Handler>> = vec![
        Box::new(TerminalHandler::new(config.stream, config.verbosity())),
        Box::new(SummaryHandler::new()),
        Box::new(ResultHandler::new(&config.result_path).context("open result store")?),
    ];
    log.add_handler(QueuedHandler::new(handlers));

    let status = run_schedule_with_log(schedule, config, &log);
    log.close();
    Ok(status)
}

/// Execute a schedule against an externally assembled log. The caller keeps
/// responsibility for closing the log.
pub fn run_schedule_with_log(schedule: &mut Schedule, config: &RunConfig, log: &Log) -> Status {
    schedule.finalize_fixtures();
    let sandbox = Sandbox::new(log.clone(), config.timeout);
    LibraryRunner {
        schedule,
        log,
        sandbox: &sandbox,
    }
    .execute()
}
