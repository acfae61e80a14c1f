//! Knowledge query tool backed by the chat provider

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use bunsen_ai::{ChatProvider, Context};

use crate::tool::{Tool, ToolResult};

const ASK_AI_SYSTEM_PROMPT: &str = "You are a scientific knowledge assistant. Answer questions about scientific concepts, methods, and domain background concisely and accurately. Cite the reasoning behind your answer.";

/// Tool that forwards a free-form question to the chat provider outside the
/// main conversation.
pub struct AskAiTool {
    provider: Arc<dyn ChatProvider>,
}

impl AskAiTool {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for AskAiTool {
    fn name(&self) -> &str {
        "ask_ai"
    }

    fn description(&self) -> &str {
        "Query specialized knowledge sources about relevant scientific concepts, methods, or domain background."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The question to ask"
                }
            },
            "required": ["question"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolResult {
        let question = match arguments.get("question").and_then(|v| v.as_str()) {
            Some(q) if !q.trim().is_empty() => q,
            _ => {
                return ToolResult::error(
                    "Error: missing 'question' argument. Please fix your approach and try again.",
                )
            }
        };

        let mut context = Context::with_system(ASK_AI_SYSTEM_PROMPT);
        context.push(bunsen_ai::Turn::user(question));

        match self.provider.complete(&context).await {
            Ok(turn) => {
                let answer = turn.text();
                if answer.trim().is_empty() {
                    ToolResult::text("(no answer)")
                } else {
                    ToolResult::text(answer)
                }
            }
            Err(e) => ToolResult::error(format!(
                "Error: knowledge query failed: {}. Please fix your approach and try again.",
                e
            )),
        }
    }
}
