//! Usage accounting sinks
//!
//! Recording is best-effort: sink failures are logged and swallowed, never
//! surfaced to the run in progress.

use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use bunsen_ai::UsageStats;

/// Destination for per-run token accounting.
pub trait UsageSink: Send + Sync {
    /// Record the accumulated usage for one run. Must not fail the caller.
    fn record(&self, run_id: &str, usage: &UsageStats);
}

/// No-op sink for callers that don't track usage.
pub struct NullUsageSink;

impl UsageSink for NullUsageSink {
    fn record(&self, _run_id: &str, _usage: &UsageStats) {}
}

#[derive(Serialize)]
struct UsageLine<'a> {
    run_id: &'a str,
    timestamp: i64,
    #[serde(flatten)]
    usage: &'a UsageStats,
}

/// Appends one JSON line per run to a log file.
pub struct JsonlUsageSink {
    path: PathBuf,
}

impl JsonlUsageSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn append(&self, run_id: &str, usage: &UsageStats) -> std::io::Result<()> {
        let line = serde_json::to_string(&UsageLine {
            run_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
            usage,
        })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)
    }
}

impl UsageSink for JsonlUsageSink {
    fn record(&self, run_id: &str, usage: &UsageStats) {
        if let Err(e) = self.append(run_id, usage) {
            tracing::warn!("failed to record usage for run {}: {}", run_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jsonl_sink_appends_lines() {
        let path = std::env::temp_dir().join(format!("bunsen-usage-{}.jsonl", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let sink = JsonlUsageSink::new(&path);
        let usage = UsageStats {
            input_tokens: 100,
            output_tokens: 40,
            total_tokens: 140,
            model_name: Some("gpt-4o".into()),
        };
        sink.record("run-1", &usage);
        sink.record("run-2", &usage);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["run_id"], "run-1");
        assert_eq!(parsed["total_tokens"], 140);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_sink_failure_is_swallowed() {
        let sink = JsonlUsageSink::new("/nonexistent-dir/usage.jsonl");
        // Must not panic or propagate.
        sink.record("run-1", &UsageStats::default());
    }
}
