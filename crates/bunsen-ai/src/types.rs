//! Core types for model interactions

use serde::{Deserialize, Serialize};

/// Content blocks inside a turn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    /// Plain text
    Text { text: String },
    /// A model-requested tool invocation
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
}

impl Content {
    /// Create text content
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a tool call
    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Get text if this is a text block
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Check if this is a tool call
    pub fn is_tool_call(&self) -> bool {
        matches!(self, Self::ToolCall { .. })
    }
}

/// Token usage reported by the provider for one model turn, or accumulated
/// across a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    /// Last non-empty model name seen
    pub model_name: Option<String>,
}

impl UsageStats {
    /// Fold another turn's usage into this accumulator.
    pub fn absorb(&mut self, other: &UsageStats) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
        if let Some(name) = &other.model_name {
            if !name.is_empty() {
                self.model_name = Some(name.clone());
            }
        }
    }

    /// Usage added since `baseline`, an earlier snapshot of this accumulator.
    pub fn since(&self, baseline: &UsageStats) -> UsageStats {
        UsageStats {
            input_tokens: self.input_tokens.saturating_sub(baseline.input_tokens),
            output_tokens: self.output_tokens.saturating_sub(baseline.output_tokens),
            total_tokens: self.total_tokens.saturating_sub(baseline.total_tokens),
            model_name: self.model_name.clone(),
        }
    }
}

/// One entry in the conversation log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    /// User input
    User {
        content: Vec<Content>,
        #[serde(default)]
        timestamp: i64,
    },
    /// Model output: text and/or tool calls
    Model {
        content: Vec<Content>,
        #[serde(default)]
        usage: UsageStats,
        #[serde(default)]
        timestamp: i64,
    },
    /// Result of one tool call, paired by `tool_call_id`
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        content: Vec<Content>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        timestamp: i64,
    },
}

impl Turn {
    /// Create a user turn with text content
    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            content: vec![Content::text(text)],
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Create a model turn from content blocks and usage
    pub fn model(content: Vec<Content>, usage: UsageStats) -> Self {
        Self::Model {
            content,
            usage,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Create a tool result turn
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: Vec<Content>,
        is_error: bool,
    ) -> Self {
        Self::ToolResult {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content,
            is_error,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Get the role as a string
    pub fn role(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Model { .. } => "model",
            Self::ToolResult { .. } => "tool_result",
        }
    }

    /// Get the content blocks
    pub fn content(&self) -> &[Content] {
        match self {
            Self::User { content, .. } => content,
            Self::Model { content, .. } => content,
            Self::ToolResult { content, .. } => content,
        }
    }

    /// Extract all tool calls from a model turn
    pub fn tool_calls(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        match self {
            Self::Model { content, .. } => content
                .iter()
                .filter_map(|c| match c {
                    Content::ToolCall {
                        id,
                        name,
                        arguments,
                    } => Some((id.as_str(), name.as_str(), arguments)),
                    _ => None,
                })
                .collect(),
            _ => vec![],
        }
    }

    /// Get combined text content
    pub fn text(&self) -> String {
        self.content()
            .iter()
            .filter_map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Tool descriptor for function calling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name (used in API calls)
    pub name: String,
    /// Description shown to the model
    pub description: String,
    /// JSON Schema for parameters
    pub parameters: serde_json::Value,
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Context for a single completion request
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// System prompt (placeholders already filled)
    pub system_prompt: Option<String>,
    /// Conversation history, oldest first
    pub turns: Vec<Turn>,
    /// Tool schemas offered to the model
    pub tools: Vec<Tool>,
}

impl Context {
    /// Create a context with a system prompt
    pub fn with_system(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(system_prompt.into()),
            turns: vec![],
            tools: vec![],
        }
    }

    /// Append a turn
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }
}

/// Model selection and endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier (e.g. "gpt-4o")
    pub id: String,
    /// Base URL for API calls
    pub base_url: String,
    /// Maximum output tokens per response
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            id: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            max_tokens: Some(2000),
            temperature: Some(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_tool_calls_extraction() {
        let turn = Turn::model(
            vec![
                Content::text("let me check"),
                Content::tool_call("c1", "execute_python", serde_json::json!({"code": "1+1"})),
                Content::tool_call("c2", "ask_ai", serde_json::json!({"question": "why"})),
            ],
            UsageStats::default(),
        );
        let calls = turn.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "c1");
        assert_eq!(calls[1].1, "ask_ai");
    }

    #[test]
    fn test_tool_calls_empty_for_user_turn() {
        let turn = Turn::user("hello");
        assert!(turn.tool_calls().is_empty());
        assert_eq!(turn.text(), "hello");
        assert_eq!(turn.role(), "user");
    }

    #[test]
    fn test_usage_absorb_sums_and_keeps_last_model_name() {
        let mut total = UsageStats::default();
        total.absorb(&UsageStats {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
            model_name: Some("gpt-4o".into()),
        });
        total.absorb(&UsageStats {
            input_tokens: 20,
            output_tokens: 10,
            total_tokens: 30,
            model_name: None,
        });
        assert_eq!(total.input_tokens, 30);
        assert_eq!(total.output_tokens, 15);
        assert_eq!(total.total_tokens, 45);
        assert_eq!(total.model_name.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn test_usage_since_subtracts_baseline() {
        let baseline = UsageStats {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
            model_name: Some("gpt-4o".into()),
        };
        let mut total = baseline.clone();
        total.absorb(&UsageStats {
            input_tokens: 20,
            output_tokens: 10,
            total_tokens: 30,
            model_name: None,
        });
        let delta = total.since(&baseline);
        assert_eq!(delta.input_tokens, 20);
        assert_eq!(delta.output_tokens, 10);
        assert_eq!(delta.total_tokens, 30);
        assert_eq!(delta.model_name.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn test_usage_absorb_ignores_empty_model_name() {
        let mut total = UsageStats {
            model_name: Some("gpt-4o".into()),
            ..Default::default()
        };
        total.absorb(&UsageStats {
            model_name: Some(String::new()),
            ..Default::default()
        });
        assert_eq!(total.model_name.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn test_turn_serde_round_trip() {
        let turn = Turn::tool_result("c9", "execute_python", vec![Content::text("done")], false);
        let json = serde_json::to_string(&turn).unwrap();
        let back: Turn = serde_json::from_str(&json).unwrap();
        match back {
            Turn::ToolResult {
                tool_call_id,
                tool_name,
                is_error,
                ..
            } => {
                assert_eq!(tool_call_id, "c9");
                assert_eq!(tool_name, "execute_python");
                assert!(!is_error);
            }
            other => panic!("expected tool result, got {:?}", other),
        }
    }
}
