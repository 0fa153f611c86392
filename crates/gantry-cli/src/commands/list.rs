//! The `list` command: identities only, nothing executes.

use std::collections::BTreeSet;

use gantry_core::{RunConfig, Schedule, ScheduleBuilder, TagFilter};

use crate::args::ListArgs;

#[derive(Debug, Clone, Copy)]
pub enum ListMode {
    Suites,
    Tests,
    AllTags,
}

impl ListMode {
    fn from_args(args: &ListArgs) -> Vec<ListMode> {
        let mut modes = Vec::new();
        if args.suites {
            modes.push(ListMode::Suites);
        }
        if args.tests {
            modes.push(ListMode::Tests);
        }
        if args.all_tags {
            modes.push(ListMode::AllTags);
        }
        if modes.is_empty() {
            modes.push(ListMode::Suites);
        }
        modes
    }
}

pub fn identities(schedule: &Schedule, mode: ListMode) -> Vec<String> {
    match mode {
        ListMode::Suites => schedule
            .suites()
            .iter()
            .map(|suite| suite.uid().to_string())
            .collect(),
        ListMode::Tests => schedule
            .suites()
            .iter()
            .flat_map(|suite| suite.tests().iter().map(|test| test.uid().to_string()))
            .collect(),
        ListMode::AllTags => schedule
            .suites()
            .iter()
            .flat_map(|suite| suite.tags().iter().cloned())
            .collect::<BTreeSet<String>>()
            .into_iter()
            .collect(),
    }
}

pub fn execute<F>(args: ListArgs, tag_filters: Vec<TagFilter>, register: F) -> anyhow::Result<()>
where
    F: FnOnce(&mut ScheduleBuilder) -> anyhow::Result<()>,
{
    let config = RunConfig {
        directory: args.common.directory.clone(),
        tag_filters,
        ..RunConfig::default()
    };
    let modes = ListMode::from_args(&args);
    let mut builder = ScheduleBuilder::new();
    register(&mut builder)?;
    builder.apply_filters(&config);
    let schedule = builder.build();
    for mode in modes {
        for identity in identities(&schedule, mode) {
            println!("{identity}");
        }
    }
    Ok(())
}
