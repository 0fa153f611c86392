use thiserror::Error;

/// Errors raised while assembling a schedule from registered suites.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("duplicate uid in schedule: {uid}")]
    DuplicateUid { uid: String },
}
