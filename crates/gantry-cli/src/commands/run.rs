//! The `run` command: assemble the schedule, filter it, execute it, map the
//! library status onto the process exit code.

use std::path::Path;
use std::time::Duration;

use gantry_core::{run_schedule, FileDefaults, RunConfig, ScheduleBuilder, Status, TagFilter};

use crate::args::RunArgs;

pub fn build_config(args: &RunArgs, verbose: u8, tag_filters: Vec<TagFilter>) -> anyhow::Result<RunConfig> {
    let defaults = FileDefaults::load(Path::new("."))?;
    let mut config = RunConfig::from_defaults(defaults);
    config.directory = args.common.directory.clone();
    config.tag_filters = tag_filters;
    if args.stream {
        config.stream = true;
    }
    if verbose > 0 {
        config.verbose = verbose;
    }
    if let Some(result_path) = &args.result_path {
        config.result_path = result_path.clone();
    }
    if let Some(secs) = args.timeout {
        config.timeout = Some(Duration::from_secs(secs));
    }
    Ok(config)
}

pub fn execute<F>(args: RunArgs, verbose: u8, tag_filters: Vec<TagFilter>, register: F) -> anyhow::Result<Status>
where
    F: FnOnce(&mut ScheduleBuilder) -> anyhow::Result<()>,
{
    let config = build_config(&args, verbose, tag_filters)?;
    tracing::debug!(?config, "resolved run configuration");
    let mut builder = ScheduleBuilder::new();
    register(&mut builder)?;
    builder.apply_filters(&config);
    let mut schedule = builder.build();
    run_schedule(&mut schedule, &config)
}
