use thiserror::Error;

/// Errors surfaced by the tracking engine.
///
/// `ParameterValue` is raised synchronously from fallible constructors and
/// setup calls (e.g. [`crate::detection::DetectionStore::initialize`]) and is
/// recoverable by the caller — fix the inputs and retry. `Logical` signals an
/// invariant violation (state-machine misuse, an infeasible cost matrix, a
/// row or column left unassigned): the engine's internal state is undefined
/// afterward and should be discarded rather than retried.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("parameter value error: {0}")]
    ParameterValue(String),

    #[error("logical error: {0}")]
    Logical(String),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
