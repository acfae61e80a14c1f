//! bunsen-ai: chat and vision provider abstraction
//!
//! This crate defines the message/turn types exchanged with LLM providers
//! and the `ChatProvider`/`VisionProvider` traits the agent loop is built
//! against, along with an OpenAI-compatible implementation.

pub mod error;
pub mod provider;
pub mod providers;
pub mod types;

pub use error::{Error, Result};
pub use provider::{ChatProvider, VisionProvider};
pub use types::*;
