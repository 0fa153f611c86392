//! Command-line surface. Tag filters are order-sensitive across the two
//! flags, so the raw `ArgMatches` indices are used to rebuild the sequence
//! the user typed.

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, ArgMatches, Args, Parser, Subcommand};
use gantry_core::TagFilter;

#[derive(Debug, Parser)]
#[command(
    name = "gantry",
    version,
    about = "Run registered test suites in isolated child processes"
)]
pub struct Cli {
    /// Increase message verbosity (repeatable).
    #[arg(short = 'v', action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute the schedule; exits non-zero when the library fails.
    Run(RunArgs),
    /// Print identities without executing anything.
    List(ListArgs),
}

#[derive(Debug, Args)]
pub struct CommonArgs {
    /// Restrict to suites defined under this directory.
    pub directory: Option<PathBuf>,

    /// Keep suites with a tag matching PATTERN (applied in given order).
    #[arg(long = "include-tags", value_name = "PATTERN")]
    pub include_tags: Vec<String>,

    /// Drop suites with a tag matching PATTERN (applied in given order).
    #[arg(long = "exclude-tags", value_name = "PATTERN")]
    pub exclude_tags: Vec<String>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Stream stdout and stderr from test children as they run.
    #[arg(short = 's', long)]
    pub stream: bool,

    /// Directory for persisted results.
    #[arg(long, value_name = "DIR")]
    pub result_path: Option<PathBuf>,

    /// Per-test deadline in seconds; a test still running is killed and fails.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// List suite uids (the default).
    #[arg(long)]
    pub suites: bool,

    /// List test uids.
    #[arg(long)]
    pub tests: bool,

    /// List every tag in use.
    #[arg(long = "all-tags")]
    pub all_tags: bool,
}

/// Rebuild the include/exclude sequence in command-line order from the
/// subcommand's matches.
pub fn ordered_tag_filters(matches: &ArgMatches) -> Result<Vec<TagFilter>> {
    let mut entries: Vec<(usize, bool, String)> = Vec::new();
    collect(matches, "include_tags", true, &mut entries);
    collect(matches, "exclude_tags", false, &mut entries);
    entries.sort_by_key(|(index, _, _)| *index);
    entries
        .into_iter()
        .map(|(_, include, pattern)| {
            if include {
                TagFilter::include(&pattern)
            } else {
                TagFilter::exclude(&pattern)
            }
        })
        .collect()
}

fn collect(matches: &ArgMatches, id: &str, include: bool, out: &mut Vec<(usize, bool, String)>) {
    let Some(values) = matches.get_many::<String>(id) else {
        return;
    };
    let Some(indices) = matches.indices_of(id) else {
        return;
    };
    for (index, value) in indices.zip(values) {
        out.push((index, include, value.clone()));
    }
}
