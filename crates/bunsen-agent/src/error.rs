//! Error types for bunsen-agent

use thiserror::Error;

use crate::conversation::StateError;

/// Result type alias using bunsen-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to the caller of the invocation interface.
///
/// Everything that happens inside a single tool call is absorbed into
/// conversational content; only boundary failures escape through this type.
#[derive(Error, Debug)]
pub enum Error {
    /// The model provider failed in a way the loop could not absorb
    #[error(transparent)]
    Provider(#[from] bunsen_ai::Error),

    /// Input validation at the invocation boundary (e.g. empty query)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A conversation-state contract violation (a bug, not a runtime
    /// condition); the run is aborted rather than corrupted
    #[error(transparent)]
    State(#[from] StateError),

    /// Session persistence failed where it cannot be ignored (suspension
    /// checkpoints must land on disk for resume to work)
    #[error("session store error: {0}")]
    Store(#[source] std::io::Error),

    /// The supplied resumption token matches no suspended run
    #[error("unknown resumption token: {0}")]
    UnknownResumption(String),
}
