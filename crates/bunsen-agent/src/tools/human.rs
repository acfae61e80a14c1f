//! Human-in-the-loop escalation tool

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::tool::{Tool, ToolResult};

/// Name the loop intercepts to suspend the run instead of executing.
pub const HUMAN_ASSISTANCE_TOOL_NAME: &str = "human_assistance";

/// Declares the human-assistance capability to the model. The agent loop
/// intercepts calls to this name and suspends the run; `execute` only runs
/// if dispatch is reached directly, which is a wiring bug.
pub struct HumanAssistanceTool;

#[async_trait]
impl Tool for HumanAssistanceTool {
    fn name(&self) -> &str {
        HUMAN_ASSISTANCE_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Ask the human operator a clarifying question when you are blocked. The run pauses until the human replies."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The question for the human operator"
                }
            },
            "required": ["question"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        _arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolResult {
        ToolResult::error(
            "Error: human assistance must be handled by the run loop. Please fix your approach and try again.",
        )
    }
}
