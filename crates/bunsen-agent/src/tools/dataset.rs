//! Dataset introspection tool

use async_trait::async_trait;
use serde_json::json;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::tool::{Tool, ToolResult};

/// How many records to sample per file for type inference
const SAMPLE_ROWS: usize = 100;
/// How many example values to show per column
const SAMPLE_VALUES: usize = 3;

/// Tool that summarizes the CSV files in the configured data directory:
/// columns, inferred types, row counts, and missing-value counts.
pub struct FetchDatasetInfoTool {
    data_dir: PathBuf,
}

impl FetchDatasetInfoTool {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }
}

#[async_trait]
impl Tool for FetchDatasetInfoTool {
    fn name(&self) -> &str {
        "fetch_dataset_info"
    }

    fn description(&self) -> &str {
        "Get information about the available datasets: file names, columns, inferred column types, row counts, and missing-value counts."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        _arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolResult {
        match summarize_directory(&self.data_dir) {
            Ok(summary) if summary.is_empty() => {
                ToolResult::text(format!("No CSV files found in {}", self.data_dir.display()))
            }
            Ok(summary) => ToolResult::text(summary),
            Err(e) => ToolResult::error(format!(
                "Error: failed to read dataset directory {}: {}. Please fix your approach and try again.",
                self.data_dir.display(),
                e
            )),
        }
    }
}

/// One column's inferred shape from a sample of records.
#[derive(Debug)]
struct ColumnProfile {
    name: String,
    kind: ValueKind,
    missing: usize,
    samples: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ValueKind {
    Integer,
    Float,
    Boolean,
    Text,
    Empty,
}

impl ValueKind {
    fn of(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            ValueKind::Empty
        } else if trimmed.parse::<i64>().is_ok() {
            ValueKind::Integer
        } else if trimmed.parse::<f64>().is_ok() {
            ValueKind::Float
        } else if matches!(
            trimmed.to_ascii_lowercase().as_str(),
            "true" | "false" | "yes" | "no"
        ) {
            ValueKind::Boolean
        } else {
            ValueKind::Text
        }
    }

    /// Widen this kind to cover another observed value.
    fn merge(self, other: Self) -> Self {
        use ValueKind::*;
        match (self, other) {
            (Empty, k) | (k, Empty) => k,
            (a, b) if a == b => a,
            (Integer, Float) | (Float, Integer) => Float,
            _ => Text,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::Boolean => "boolean",
            ValueKind::Text => "text",
            ValueKind::Empty => "empty",
        }
    }
}

/// Summarize every CSV file in a directory as human-readable text.
///
/// Per-file read failures become entries in the summary rather than aborting
/// the whole scan. Returns an empty string when no CSV files are present.
pub fn summarize_directory(dir: &Path) -> std::io::Result<String> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .map(|ext| ext.eq_ignore_ascii_case("csv"))
                .unwrap_or(false)
        })
        .collect();
    entries.sort();

    let mut out = String::new();
    for path in entries {
        if !out.is_empty() {
            out.push('\n');
        }
        match summarize_file(&path) {
            Ok(section) => out.push_str(&section),
            Err(e) => {
                let _ = writeln!(out, "{}: failed to read ({})", path.display(), e);
            }
        }
    }
    Ok(out)
}

fn summarize_file(path: &Path) -> Result<String, csv::Error> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut profiles: Vec<ColumnProfile> = headers
        .iter()
        .map(|name| ColumnProfile {
            name: name.clone(),
            kind: ValueKind::Empty,
            missing: 0,
            samples: Vec::new(),
        })
        .collect();

    // Missing values are counted over every row; type inference and sample
    // values only look at the leading SAMPLE_ROWS.
    let mut rows = 0usize;
    for record in reader.records() {
        let record = record?;
        for (i, profile) in profiles.iter_mut().enumerate() {
            let value = record.get(i).unwrap_or("");
            let kind = ValueKind::of(value);
            if kind == ValueKind::Empty {
                profile.missing += 1;
            } else if rows < SAMPLE_ROWS {
                profile.kind = profile.kind.merge(kind);
                let trimmed = value.trim();
                if profile.samples.len() < SAMPLE_VALUES
                    && !profile.samples.iter().any(|s| s == trimmed)
                {
                    profile.samples.push(trimmed.to_string());
                }
            }
        }
        rows += 1;
    }

    let mut section = String::new();
    let _ = writeln!(section, "{}: {} rows", path.display(), rows);
    for profile in &profiles {
        let _ = writeln!(
            section,
            "  - {} ({}, {} missing, e.g. {})",
            profile.name,
            profile.kind.label(),
            profile.missing,
            if profile.samples.is_empty() {
                "no values".to_string()
            } else {
                profile.samples.join(", ")
            }
        );
    }
    Ok(section)
}
