//! Tool registry: catalog, argument validation, and absorbing dispatch

use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::tool::{to_api_tool, BoxedTool, ToolResult};

/// The fixed catalog of tools available to one run.
///
/// Dispatch never returns an error: unknown names, invalid arguments, and
/// panicking tools all produce an error-flagged `ToolResult` whose text the
/// model can read and correct for.
pub struct ToolRegistry {
    tools: Vec<BoxedTool>,
    /// Cached compiled JSON schema validators keyed by tool name
    schema_cache: HashMap<String, Arc<jsonschema::Validator>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<BoxedTool>) -> Self {
        let mut registry = Self {
            tools: Vec::new(),
            schema_cache: HashMap::new(),
        };
        for tool in tools {
            registry.register(tool);
        }
        registry
    }

    /// Add a tool and compile its parameter schema.
    pub fn register(&mut self, tool: BoxedTool) {
        let schema = tool.parameters_schema();
        match jsonschema::validator_for(&schema) {
            Ok(validator) => {
                self.schema_cache
                    .insert(tool.name().to_string(), Arc::new(validator));
            }
            Err(e) => {
                tracing::warn!(
                    "Invalid tool parameter schema for '{}', skipping validation: {}",
                    tool.name(),
                    e
                );
            }
        }
        self.tools.push(tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&BoxedTool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// API-shaped tool declarations for the model request.
    pub fn api_tools(&self) -> Vec<bunsen_ai::Tool> {
        self.tools.iter().map(|t| to_api_tool(t.as_ref())).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Execute one tool call, absorbing every failure mode into the result.
    pub async fn dispatch(
        &self,
        tool_call_id: &str,
        name: &str,
        arguments: &serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        let tool = match self.get(name) {
            Some(tool) => tool,
            None => {
                return ToolResult::error(format!(
                    "Error: unknown tool '{}'. Please fix your approach and try again.",
                    name
                ));
            }
        };

        if let Some(validator) = self.schema_cache.get(name) {
            if let Some(err) = validation_errors(arguments, validator) {
                return ToolResult::error(format!(
                    "Error: {}. Please fix your approach and try again.",
                    err
                ));
            }
        }

        let fut = tool.execute(tool_call_id, arguments.clone(), cancel);
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let description = panic_description(panic.as_ref());
                tracing::error!(tool = name, "tool panicked: {}", description);
                ToolResult::error(format!(
                    "Error: {}. Please fix your approach and try again.",
                    description
                ))
            }
        }
    }
}

/// Collect schema violations into one message, or `None` if valid.
fn validation_errors(
    args: &serde_json::Value,
    validator: &jsonschema::Validator,
) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!("invalid tool arguments: {}", errors.join("; ")))
    }
}

fn panic_description(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "tool execution failed unexpectedly".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::Tool;
    use async_trait::async_trait;

    struct AdderTool;

    #[async_trait]
    impl Tool for AdderTool {
        fn name(&self) -> &str {
            "adder"
        }
        fn description(&self) -> &str {
            "Adds two numbers"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "a": { "type": "number" },
                    "b": { "type": "number" }
                },
                "required": ["a", "b"]
            })
        }
        async fn execute(
            &self,
            _tool_call_id: &str,
            arguments: serde_json::Value,
            _cancel: CancellationToken,
        ) -> ToolResult {
            let a = arguments["a"].as_f64().unwrap();
            let b = arguments["b"].as_f64().unwrap();
            ToolResult::text(format!("{}", a + b))
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &str {
            "boom"
        }
        fn description(&self) -> &str {
            "Always panics"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            _tool_call_id: &str,
            _arguments: serde_json::Value,
            _cancel: CancellationToken,
        ) -> ToolResult {
            panic!("index out of range");
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::new(vec![Arc::new(AdderTool), Arc::new(PanickingTool)])
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let r = registry();
        let result = r
            .dispatch(
                "c1",
                "adder",
                &serde_json::json!({"a": 2, "b": 3}),
                CancellationToken::new(),
            )
            .await;
        assert!(!result.is_error);
        assert_eq!(result.text_content(), "5");
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool() {
        let r = registry();
        let result = r
            .dispatch(
                "c1",
                "nonexistent",
                &serde_json::json!({}),
                CancellationToken::new(),
            )
            .await;
        assert!(result.is_error);
        assert!(result.text_content().starts_with("Error:"));
        assert!(result
            .text_content()
            .ends_with("Please fix your approach and try again."));
    }

    #[tokio::test]
    async fn test_dispatch_invalid_arguments() {
        let r = registry();
        let result = r
            .dispatch(
                "c1",
                "adder",
                &serde_json::json!({"a": "not a number"}),
                CancellationToken::new(),
            )
            .await;
        assert!(result.is_error);
        assert!(result.text_content().contains("invalid tool arguments"));
    }

    #[tokio::test]
    async fn test_dispatch_absorbs_panic() {
        let r = registry();
        let result = r
            .dispatch("c1", "boom", &serde_json::json!({}), CancellationToken::new())
            .await;
        assert!(result.is_error);
        assert!(result.text_content().contains("index out of range"));
        assert!(result
            .text_content()
            .ends_with("Please fix your approach and try again."));
    }

    #[test]
    fn test_api_tools_and_names() {
        let r = registry();
        assert_eq!(r.names(), vec!["adder", "boom"]);
        let api = r.api_tools();
        assert_eq!(api.len(), 2);
        assert_eq!(api[0].name, "adder");
    }
}
