//! Code execution and package installation tools

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use bunsen_exec::PythonExecutor;

use crate::tool::{Tool, ToolResult};
use crate::tools::ArtifactLog;

/// Tool that runs a Python source string in the sandboxed executor and
/// records any harvested plot artifacts in the shared run log.
pub struct ExecutePythonTool {
    executor: Arc<PythonExecutor>,
    artifacts: ArtifactLog,
}

impl ExecutePythonTool {
    pub fn new(executor: Arc<PythonExecutor>, artifacts: ArtifactLog) -> Self {
        Self { executor, artifacts }
    }
}

#[async_trait]
impl Tool for ExecutePythonTool {
    fn name(&self) -> &str {
        "execute_python"
    }

    fn description(&self) -> &str {
        "Run Python code for data analysis and visualization. Stdout is returned; figures saved by matplotlib are captured and their paths reported."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Python code to execute"
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolResult {
        let code = match arguments.get("code").and_then(|v| v.as_str()) {
            Some(c) if !c.trim().is_empty() => c,
            _ => {
                return ToolResult::error(
                    "Error: missing 'code' argument. Please fix your approach and try again.",
                )
            }
        };

        let result = self.executor.execute_code(code, false).await;
        self.artifacts.record(result.artifact_paths.iter().cloned());

        let mut sections = Vec::new();
        if !result.stdout.trim().is_empty() {
            sections.push(format!("Output:\n{}", result.stdout.trim_end()));
        }
        if !result.artifact_paths.is_empty() {
            let listed: Vec<String> = result
                .artifact_paths
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            sections.push(format!("Generated plots: {}", listed.join(", ")));
        }
        if !result.stderr.trim().is_empty() {
            sections.push(format!("Stderr:\n{}", result.stderr.trim_end()));
        }

        if result.success {
            if sections.is_empty() {
                ToolResult::text("Code executed successfully with no output.")
            } else {
                ToolResult::text(sections.join("\n\n"))
            }
        } else {
            ToolResult::error(format!(
                "Error: Python execution failed.\n\n{}\n\nPlease fix your approach and try again.",
                sections.join("\n\n")
            ))
        }
    }
}

/// Tool that installs additional Python packages into the sandbox.
pub struct InstallPackagesTool {
    executor: Arc<PythonExecutor>,
}

impl InstallPackagesTool {
    pub fn new(executor: Arc<PythonExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Tool for InstallPackagesTool {
    fn name(&self) -> &str {
        "install_python_packages"
    }

    fn description(&self) -> &str {
        "Install additional Python packages into the analysis environment. Accepts a comma-separated package list. Already-installed packages are skipped."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "packages": {
                    "type": "string",
                    "description": "Comma-separated package names, e.g. 'seaborn, statsmodels'"
                }
            },
            "required": ["packages"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolResult {
        let raw = arguments
            .get("packages")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let packages: Vec<String> = raw
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        if packages.is_empty() {
            return ToolResult::text("No packages requested; nothing to install.");
        }

        let report = self.executor.install_packages(&packages).await;
        if report.success {
            ToolResult::text(report.message)
        } else {
            ToolResult::error(format!(
                "Error: {}\n{}\nPlease fix your approach and try again.",
                report.message, report.output
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bunsen_exec::ExecutorConfig;
    use std::path::PathBuf;

    fn host_python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
            || std::process::Command::new("python")
                .arg("--version")
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
    }

    async fn test_executor(name: &str) -> Arc<PythonExecutor> {
        let root = std::env::temp_dir().join(format!("bunsen-pytool-{}-{}", name, std::process::id()));
        let config = ExecutorConfig {
            venv_dir: root.join("venv"),
            plots_dir: root.join("plots"),
            temp_dir: root.join("tmp"),
            default_packages: vec![],
            use_host_interpreter: true,
            ..ExecutorConfig::default()
        };
        Arc::new(PythonExecutor::provision(config, &[]).await.unwrap())
    }

    #[tokio::test]
    async fn test_execute_python_formats_output() {
        if !host_python_available() {
            return;
        }
        let tool = ExecutePythonTool::new(test_executor("fmt").await, ArtifactLog::new());
        let result = tool
            .execute(
                "c1",
                json!({"code": "print('hello from analysis')"}),
                CancellationToken::new(),
            )
            .await;
        assert!(!result.is_error);
        assert!(result.text_content().contains("hello from analysis"));
    }

    #[tokio::test]
    async fn test_execute_python_error_is_absorbed() {
        if !host_python_available() {
            return;
        }
        let tool = ExecutePythonTool::new(test_executor("err").await, ArtifactLog::new());
        let result = tool
            .execute(
                "c1",
                json!({"code": "raise ValueError('bad input')"}),
                CancellationToken::new(),
            )
            .await;
        assert!(result.is_error);
        let text = result.text_content();
        assert!(text.starts_with("Error:"));
        assert!(text.contains("bad input"));
        assert!(text.ends_with("Please fix your approach and try again."));
    }

    #[tokio::test]
    async fn test_execute_python_missing_code() {
        if !host_python_available() {
            return;
        }
        let tool = ExecutePythonTool::new(test_executor("missing").await, ArtifactLog::new());
        let result = tool
            .execute("c1", json!({}), CancellationToken::new())
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_install_empty_list_is_noop() {
        if !host_python_available() {
            return;
        }
        let tool = InstallPackagesTool::new(test_executor("noop").await);
        let result = tool
            .execute("c1", json!({"packages": " , , "}), CancellationToken::new())
            .await;
        assert!(!result.is_error);
        assert!(result.text_content().contains("nothing to install"));
    }

    #[tokio::test]
    async fn test_artifacts_recorded_in_log() {
        if !host_python_available() {
            return;
        }
        let log = ArtifactLog::new();
        let executor = test_executor("log").await;
        let tool = ExecutePythonTool::new(executor, log.clone());
        // Emit the artifact marker directly so no plotting stack is needed.
        let code = r#"
print("computed")
print("--- GENERATED PLOTS ---")
print("/tmp/bunsen-fake/figure_0.png")
"#;
        let result = tool
            .execute("c1", json!({"code": code}), CancellationToken::new())
            .await;
        assert!(!result.is_error);
        assert_eq!(log.all(), vec![PathBuf::from("/tmp/bunsen-fake/figure_0.png")]);
        assert!(result.text_content().contains("Generated plots:"));
        // The marker section is stripped from the stdout shown to the model.
        assert!(!result.text_content().contains("--- GENERATED PLOTS ---"));
    }
}
