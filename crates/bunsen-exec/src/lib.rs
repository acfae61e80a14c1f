//! bunsen-exec: isolated Python code execution
//!
//! Provisions a virtual environment (falling back to the host interpreter
//! when creation fails), installs packages idempotently, and runs untrusted
//! code strings as child processes with output capture, hard timeouts, and
//! plot-artifact harvesting.

pub mod error;
mod instrument;
pub mod executor;

pub use error::{Error, ProvisionError, Result};
pub use executor::{ExecutionResult, ExecutorConfig, InstallReport, PythonExecutor};
