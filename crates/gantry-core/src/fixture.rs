//! The setup/teardown capability attached to tests, suites and the library,
//! and the builder that guarantees teardown for everything that was built.

use std::any::Any;

use thiserror::Error;

use crate::model::{ItemHandle, ScheduleDigest};

/// Raised by a fixture's own `setup` implementation.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The item cannot run here; intentional and not a bug.
    #[error("{reason}")]
    Skip { reason: String },
    /// Anything else that went wrong while building the fixture.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl SetupError {
    pub fn skip(reason: impl Into<String>) -> Self {
        SetupError::Skip {
            reason: reason.into(),
        }
    }
}

/// What the runner sees when fixture construction for an item fails.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("skipping \"{item}\": fixture \"{fixture}\" requested skip: {reason}")]
    Skip {
        fixture: String,
        item: String,
        reason: String,
    },
    #[error("fixture \"{fixture}\" broke while setting up \"{item}\"")]
    Broken {
        fixture: String,
        item: String,
        #[source]
        source: anyhow::Error,
    },
}

/// A stateful setup/teardown capability.
///
/// Lifecycle: construction (ordinary `new`), then [`schedule_finalized`]
/// exactly once after the full schedule is known and before any setup, then
/// `setup`/`teardown` bracketing each item the fixture is attached to.
///
/// Fixtures are attached by value (`Box<dyn Fixture>`), so one instance can
/// never be shared between two items; a fixture that must observe the whole
/// run collects what it needs during [`schedule_finalized`].
///
/// [`schedule_finalized`]: Fixture::schedule_finalized
pub trait Fixture {
    fn name(&self) -> &str;

    /// Called once with a metadata snapshot of the finalized schedule.
    fn schedule_finalized(&mut self, schedule: &ScheduleDigest) {
        let _ = schedule;
    }

    fn setup(&mut self, item: &ItemHandle) -> Result<(), SetupError> {
        let _ = item;
        Ok(())
    }

    fn teardown(&mut self, item: &ItemHandle) -> anyhow::Result<()> {
        let _ = item;
        Ok(())
    }

    /// Downcast support for bodies that need a concrete fixture type.
    fn as_any(&self) -> &dyn Any;
}

/// Builds an item's fixtures in declared order and remembers how many were
/// attempted, so teardown covers exactly the attempted prefix.
#[derive(Default)]
pub struct FixtureBuilder {
    built: usize,
}

impl FixtureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every fixture's `setup` in order, stopping at the first failure.
    ///
    /// A fixture counts as built *before* its setup runs: a setup that fails
    /// halfway may still have acquired resources, so it gets a teardown
    /// attempt like its successfully built predecessors.
    pub fn setup(
        &mut self,
        fixtures: &mut [Box<dyn Fixture>],
        item: &ItemHandle,
    ) -> Result<(), FixtureError> {
        for fixture in fixtures.iter_mut() {
            self.built += 1;
            if let Err(err) = fixture.setup(item) {
                return Err(match err {
                    SetupError::Skip { reason } => FixtureError::Skip {
                        fixture: fixture.name().to_string(),
                        item: item.name.clone(),
                        reason,
                    },
                    SetupError::Failed(source) => {
                        tracing::warn!(
                            fixture = fixture.name(),
                            item = %item.name,
                            error = %source,
                            "fixture setup failed"
                        );
                        FixtureError::Broken {
                            fixture: fixture.name().to_string(),
                            item: item.name.clone(),
                            source,
                        }
                    }
                });
            }
        }
        Ok(())
    }

    /// Tear down every fixture that `setup` attempted, in the same order.
    ///
    /// Faults never propagate: each failure is reported and cleanup moves on
    /// to the next fixture. Returns the failure descriptions so the caller
    /// can put them on the record stream.
    pub fn teardown(
        &mut self,
        fixtures: &mut [Box<dyn Fixture>],
        item: &ItemHandle,
    ) -> Vec<String> {
        let mut failures = Vec::new();
        for fixture in fixtures.iter_mut().take(self.built) {
            if let Err(err) = fixture.teardown(item) {
                tracing::warn!(
                    fixture = fixture.name(),
                    item = %item.name,
                    error = %err,
                    "fixture teardown failed, continuing cleanup"
                );
                failures.push(format!(
                    "fixture \"{}\" teardown failed for \"{}\": {err:#}",
                    fixture.name(),
                    item.name
                ));
            }
        }
        failures
    }
}
