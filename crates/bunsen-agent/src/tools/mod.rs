//! Built-in tools for the analysis agent

mod ask_ai;
mod dataset;
mod db_query;
mod explain_graph;
mod human;
mod python;

pub use ask_ai::AskAiTool;
pub use dataset::{summarize_directory, FetchDatasetInfoTool};
pub use db_query::DbQueryTool;
pub use explain_graph::ExplainGraphTool;
pub use human::{HumanAssistanceTool, HUMAN_ASSISTANCE_TOOL_NAME};
pub use python::{ExecutePythonTool, InstallPackagesTool};

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bunsen_ai::{ChatProvider, VisionProvider};
use bunsen_exec::PythonExecutor;

use crate::tool::BoxedTool;

/// Shared log of artifact paths produced during one run.
///
/// Written by code execution, read by graph explanation and by the loop when
/// it folds artifacts into the conversation state. The loop resets it to the
/// conversation's own artifacts on entry, so paths never leak across
/// unrelated threads.
#[derive(Clone, Default)]
pub struct ArtifactLog {
    inner: Arc<Mutex<Vec<PathBuf>>>,
}

impl ArtifactLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append paths, preserving order and skipping duplicates.
    pub fn record<I>(&self, paths: I)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut inner = self.inner.lock();
        for path in paths {
            if !inner.contains(&path) {
                inner.push(path);
            }
        }
    }

    /// Replace the log's contents with this conversation's paths.
    pub fn reset<I>(&self, paths: I)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut inner = self.inner.lock();
        inner.clear();
        for path in paths {
            if !inner.contains(&path) {
                inner.push(path);
            }
        }
    }

    /// The last `n` recorded paths, oldest first.
    pub fn recent(&self, n: usize) -> Vec<PathBuf> {
        let inner = self.inner.lock();
        let start = inner.len().saturating_sub(n);
        inner[start..].to_vec()
    }

    /// Every recorded path in order.
    pub fn all(&self) -> Vec<PathBuf> {
        self.inner.lock().clone()
    }
}

/// Construct the standard tool catalog for one run.
pub fn standard_tools(
    executor: Arc<PythonExecutor>,
    chat: Arc<dyn ChatProvider>,
    vision: Arc<dyn VisionProvider>,
    data_dir: &Path,
    artifacts: ArtifactLog,
) -> Vec<BoxedTool> {
    vec![
        Arc::new(FetchDatasetInfoTool::new(data_dir)),
        Arc::new(ExecutePythonTool::new(executor.clone(), artifacts.clone())),
        Arc::new(InstallPackagesTool::new(executor)),
        Arc::new(AskAiTool::new(chat)),
        Arc::new(ExplainGraphTool::new(vision, artifacts)),
        Arc::new(DbQueryTool),
        Arc::new(HumanAssistanceTool),
    ]
}
