//! Agent event types

use serde::{Deserialize, Serialize};

use bunsen_ai::UsageStats;

/// Events emitted during agent execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Agent started processing
    AgentStart,

    /// A new decision round started
    RoundStart { round: u32 },

    /// Tool execution started
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// Tool execution completed
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        result: String,
        is_error: bool,
    },

    /// The run suspended waiting for a human reply
    Suspended {
        resumption_token: String,
        question: String,
    },

    /// Agent finished processing
    AgentEnd {
        total_rounds: u32,
        total_usage: UsageStats,
    },

    /// Error occurred
    Error { message: String },
}

impl AgentEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentEvent::AgentEnd { .. } | AgentEvent::Suspended { .. } | AgentEvent::Error { .. }
        )
    }
}
