//! Error types for bunsen-exec

use thiserror::Error;

/// Result type alias using bunsen-exec Error
pub type Result<T> = std::result::Result<T, Error>;

/// Environment provisioning failures. Venv-creation failures trigger the
/// host-interpreter fallback; only the variants here are unrecoverable.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// No usable Python interpreter on the host at all
    #[error("no Python interpreter found on host (tried python3, python)")]
    NoInterpreter,

    /// Filesystem setup for the working directories failed
    #[error("failed to create working directory {path}: {source}")]
    WorkDir {
        path: String,
        source: std::io::Error,
    },
}

/// Errors from the executor. Code execution and package installation never
/// surface through this type; their failures are reported inside
/// `ExecutionResult` and `InstallReport`.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
