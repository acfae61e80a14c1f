//! bunsen-agent: the agent execution loop and its supporting state
//!
//! Drives a chat model through a bounded tool-call loop over a fixed catalog
//! of scientific-analysis capabilities, accumulates the conversation as an
//! append-only turn log, and extracts a structured JSON report from the
//! terminal state.

pub mod agent;
pub mod conversation;
pub mod error;
pub mod events;
pub mod prompt;
pub mod registry;
pub mod report;
pub mod store;
pub mod tool;
pub mod tools;
pub mod usage;

pub use agent::{Agent, AgentConfig, ResumptionToken, RunOutcome};
pub use conversation::{ConversationState, StateError};
pub use error::{Error, Result};
pub use events::AgentEvent;
pub use registry::ToolRegistry;
pub use report::{extract_report, PathRewrite, StructuredReport};
pub use store::{SessionStore, SuspensionRecord};
pub use tool::{BoxedTool, Tool, ToolResult};
pub use tools::{standard_tools, ArtifactLog};
pub use usage::{JsonlUsageSink, NullUsageSink, UsageSink};
