//! Placeholder SQL query tool

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::tool::{Tool, ToolResult};

/// Placeholder database query capability. Echoes the query until a real
/// backend is wired up.
pub struct DbQueryTool;

#[async_trait]
impl Tool for DbQueryTool {
    fn name(&self) -> &str {
        "db_query_tool"
    }

    fn description(&self) -> &str {
        "Run a SQL query against the configured database and return the result."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The SQL query to run"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolResult {
        let query = arguments
            .get("query")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        ToolResult::text(format!("SQL Query result for: {}", query))
    }
}
