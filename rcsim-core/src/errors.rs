use thiserror::Error;

use crate::variable::Time;

/// Error type for malformed models and failed runs.
///
/// The variants correspond to the engine's failure classes: definition
/// errors are detected before integration starts, dependency errors at
/// classification time, and the remaining kinds during or after a run.
#[derive(Error, Debug)]
pub enum RcsimError {
    #[error("definition error: {0}")]
    Definition(String),
    #[error("cyclic dependency involving: {}", .variables.join(", "))]
    Dependency { variables: Vec<String> },
    #[error("constants are frozen once integration begins: {0}")]
    State(String),
    #[error("capture misuse: {0}")]
    Usage(String),
    #[error("integration failed at t = {time}: {reason}")]
    Integration { time: Time, reason: String },
}

/// Convenience type for `Result<T, RcsimError>`.
pub type RcsimResult<T> = Result<T, RcsimError>;
