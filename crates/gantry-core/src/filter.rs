//! Suite selection at the schedule boundary: the ordered tag filters applied
//! as a running include/exclude pass, plus the directory restriction.

use crate::config::RunConfig;
use crate::model::SuiteMetadata;

/// Decide, per suite, whether it stays in the schedule. Order of the input
/// is preserved by construction; only membership changes.
///
/// With no tag filters every suite is kept. Otherwise the starting set is
/// empty when the first filter is an include and full when it is an exclude;
/// each filter then adds or removes the suites with any tag matching its
/// pattern.
pub fn select_suites(suites: &[SuiteMetadata], config: &RunConfig) -> Vec<bool> {
    let mut keep = match config.tag_filters.first() {
        None => vec![true; suites.len()],
        Some(first) if first.include => vec![false; suites.len()],
        Some(_) => vec![true; suites.len()],
    };

    for filter in &config.tag_filters {
        for (slot, suite) in keep.iter_mut().zip(suites) {
            let matched = suite.tags.iter().any(|tag| filter.pattern.is_match(tag));
            if matched {
                *slot = filter.include;
            }
        }
    }

    if let Some(directory) = &config.directory {
        for (slot, suite) in keep.iter_mut().zip(suites) {
            if !suite.path.starts_with(directory) {
                *slot = false;
            }
        }
    }

    keep
}
