//! Chart explanation tool backed by the vision provider

use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use bunsen_ai::VisionProvider;

use crate::tool::{Tool, ToolResult};
use crate::tools::ArtifactLog;

/// How many recent artifacts to send when the model names none explicitly
const DEFAULT_IMAGE_COUNT: usize = 3;

const EXPLAIN_SYSTEM_PROMPT: &str = "You are a scientific data visualization analyst. Describe what the chart shows, identify trends, outliers, and patterns, and report any numerical values readable from the image.";

/// Tool that sends generated plot images to the vision provider for
/// explanation. Falls back to the most recently generated artifacts when the
/// model does not name images explicitly.
pub struct ExplainGraphTool {
    vision: Arc<dyn VisionProvider>,
    artifacts: ArtifactLog,
}

impl ExplainGraphTool {
    pub fn new(vision: Arc<dyn VisionProvider>, artifacts: ArtifactLog) -> Self {
        Self { vision, artifacts }
    }
}

#[async_trait]
impl Tool for ExplainGraphTool {
    fn name(&self) -> &str {
        "explain_graph"
    }

    fn description(&self) -> &str {
        "Explain generated graphs and visualizations using a vision model. Provide image paths, or omit them to use the most recently generated plots."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "What to explain about the graphs"
                },
                "image_paths": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Paths of images to explain (optional; defaults to recent plots)"
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
        let question = arguments
            .get("question")
            .and_then(|v| v.as_str())
            .unwrap_or("Explain these visualizations.");

        let named: Vec<PathBuf> = arguments
            .get("image_paths")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();

        let paths = if named.is_empty() {
            self.artifacts.recent(DEFAULT_IMAGE_COUNT)
        } else {
            named
        };

        if paths.is_empty() {
            return ToolResult::error(
                "Error: no images available to explain. Generate a visualization first with execute_python. Please fix your approach and try again.",
            );
        }

        let refs: Vec<&Path> = paths.iter().map(PathBuf::as_path).collect();
        match self
            .vision
            .explain(question, &refs, EXPLAIN_SYSTEM_PROMPT)
            .await
        {
            Ok(explanation) => ToolResult::text(explanation),
            Err(e) => ToolResult::error(format!(
                "Error: vision provider failed: {}. Please fix your approach and try again.",
                e
            )),
        }
    }
}
