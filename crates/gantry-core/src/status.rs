use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state shared by every runnable item (test, suite, library).
///
/// Declaration order is the lifecycle order; severity for aggregation is
/// `Passed < Skipped < Failed` and is encoded in [`aggregate`], not here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    #[default]
    NotRun,
    InProgress,
    Skipped,
    Passed,
    Failed,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Skipped | Status::Passed | Status::Failed)
    }

    /// Whether moving to `next` respects the one-way lifecycle
    /// `NotRun -> InProgress -> {Skipped|Passed|Failed}`.
    pub fn may_advance_to(self, next: Status) -> bool {
        match self {
            Status::NotRun => next == Status::InProgress,
            Status::InProgress => next.is_terminal(),
            Status::Skipped | Status::Passed | Status::Failed => false,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::NotRun => "NotRun",
            Status::InProgress => "InProgress",
            Status::Skipped => "Skipped",
            Status::Passed => "Passed",
            Status::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Fold child statuses into a parent status.
///
/// Any `Failed` wins, otherwise any `Passed` wins, otherwise `Skipped`.
/// The empty set folds to `Skipped` so that "no children" and "all children
/// skipped" are indistinguishable; suite and library levels use this same
/// function with no special cases.
pub fn aggregate<I>(children: I) -> Status
where
    I: IntoIterator<Item = Status>,
{
    let mut any_passed = false;
    for status in children {
        match status {
            Status::Failed => return Status::Failed,
            Status::Passed => any_passed = true,
            _ => {}
        }
    }
    if any_passed {
        Status::Passed
    } else {
        Status::Skipped
    }
}
