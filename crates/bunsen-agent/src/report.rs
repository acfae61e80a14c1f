//! Structured report extraction from terminal conversation state
//!
//! The model is instructed to end with a seven-field JSON object, but real
//! model output wraps it in fences, adds prose, or mangles the syntax. The
//! extraction ladder tries progressively more forgiving strategies and falls
//! back to a schema-valid default report rather than failing.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use bunsen_ai::Turn;

use crate::conversation::ConversationState;

/// The seven field names a candidate must share at least one of
const REPORT_FIELDS: [&str; 7] = [
    "action_plan",
    "decisions_and_justifications",
    "observations",
    "visualizations",
    "summary",
    "next_steps",
    "conclusion",
];

/// One step of the model's stated plan
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActionStep {
    #[serde(default)]
    pub step: u32,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    #[serde(default)]
    pub decision: String,
    #[serde(default)]
    pub justification: String,
    #[serde(default)]
    pub tool_used: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Visualization {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub key_insights: Vec<String>,
}

/// The structured answer contract. Every field defaults so a partial object
/// still deserializes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StructuredReport {
    #[serde(default)]
    pub action_plan: Vec<ActionStep>,
    #[serde(default)]
    pub decisions_and_justifications: Vec<Decision>,
    #[serde(default)]
    pub observations: Vec<String>,
    #[serde(default)]
    pub visualizations: Vec<Visualization>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub conclusion: String,
}

impl StructuredReport {
    /// Default report for a run that reached a terminal state without ever
    /// producing valid structured output. Signals failure rather than
    /// claiming success, with visualizations filled from recorded artifacts.
    pub fn incomplete(artifacts: &[PathBuf]) -> Self {
        Self {
            action_plan: vec![],
            decisions_and_justifications: vec![],
            observations: vec!["The analysis did not produce a structured result.".to_string()],
            visualizations: artifacts
                .iter()
                .enumerate()
                .map(|(i, path)| Visualization {
                    path: path.display().to_string(),
                    description: format!("Generated visualization {}", i + 1),
                    key_insights: vec!["Visualization generated from analysis".to_string()],
                })
                .collect(),
            summary: "The analysis completed without a structured report.".to_string(),
            next_steps: vec!["Re-run the query or rephrase the question.".to_string()],
            conclusion: "The run did not complete with a structured result; see any generated visualizations for partial output.".to_string(),
        }
    }

    /// Rewrite every visualization path from the internal filesystem prefix
    /// to the web-servable prefix.
    pub fn rewrite_paths(&mut self, rewrite: &PathRewrite) {
        for viz in &mut self.visualizations {
            viz.path = rewrite.apply(&viz.path);
        }
    }
}

/// Maps internal artifact paths to web-servable URLs.
#[derive(Debug, Clone)]
pub struct PathRewrite {
    pub internal_prefix: PathBuf,
    pub web_prefix: String,
}

impl PathRewrite {
    pub fn new(internal_prefix: impl Into<PathBuf>, web_prefix: impl Into<String>) -> Self {
        Self {
            internal_prefix: internal_prefix.into(),
            web_prefix: web_prefix.into(),
        }
    }

    /// Rewrite one path; paths outside the internal prefix pass through.
    pub fn apply(&self, path: &str) -> String {
        match Path::new(path).strip_prefix(&self.internal_prefix) {
            Ok(rest) => {
                let web = self.web_prefix.trim_end_matches('/');
                let tail = rest.to_string_lossy().replace('\\', "/");
                format!("{}/{}", web, tail)
            }
            Err(_) => path.to_string(),
        }
    }
}

/// Extract the structured report from a terminal conversation state.
///
/// Scans model turns newest first for one with non-empty text that is not a
/// pure tool-call request, runs the extraction ladder on it, and falls back
/// to the failure-signaling default when nothing parses.
pub fn extract_report(state: &ConversationState, rewrite: Option<&PathRewrite>) -> StructuredReport {
    let text = state.turns.iter().rev().find_map(|turn| match turn {
        Turn::Model { .. } => {
            let text = turn.text();
            if text.trim().is_empty() {
                None
            } else {
                Some(text)
            }
        }
        _ => None,
    });

    let mut report = text
        .as_deref()
        .and_then(extract_from_text)
        .unwrap_or_else(|| StructuredReport::incomplete(&state.artifact_paths));

    if let Some(rewrite) = rewrite {
        report.rewrite_paths(rewrite);
    }
    report
}

/// Run the extraction ladder over one block of model text.
pub fn extract_from_text(text: &str) -> Option<StructuredReport> {
    // 1. The whole text is JSON.
    if let Some(report) = parse_candidate(text) {
        return Some(report);
    }

    // 2. The interior of a fenced code block.
    if let Some(inner) = fenced_block(text) {
        if let Some(report) = parse_candidate(&inner) {
            return Some(report);
        }
    }

    // 3. The first balanced {...} object.
    let candidates = balanced_objects(text);
    if let Some(first) = candidates.first() {
        if let Some(report) = parse_candidate(first) {
            return Some(report);
        }
    }

    // 4. Light repair of the whole text and of the first candidate.
    if let Some(report) = parse_candidate(&repair(text)) {
        return Some(report);
    }
    if let Some(first) = candidates.first() {
        if let Some(report) = parse_candidate(&repair(first)) {
            return Some(report);
        }
    }

    // 5. All candidates, longest first; accept the first that parses and
    //    carries at least one report field.
    let mut by_length = candidates;
    by_length.sort_by_key(|c| std::cmp::Reverse(c.len()));
    for candidate in &by_length {
        for attempt in [candidate.clone(), repair(candidate)] {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&attempt) {
                if has_report_field(&value) {
                    if let Ok(report) = serde_json::from_value(value) {
                        return Some(report);
                    }
                }
            }
        }
    }

    None
}

/// Parse a candidate string into a report, requiring at least one of the
/// seven fields so arbitrary JSON is not misread as a report.
fn parse_candidate(text: &str) -> Option<StructuredReport> {
    let value: serde_json::Value = serde_json::from_str(text.trim()).ok()?;
    if !has_report_field(&value) {
        return None;
    }
    serde_json::from_value(value).ok()
}

fn has_report_field(value: &serde_json::Value) -> bool {
    value
        .as_object()
        .map(|obj| REPORT_FIELDS.iter().any(|f| obj.contains_key(*f)))
        .unwrap_or(false)
}

/// Interior of the first fenced code block, if any.
fn fenced_block(text: &str) -> Option<String> {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let re = FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("valid fence regex")
    });
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Every balanced top-level `{...}` substring, in order of appearance.
/// Tracks string and escape state so braces inside strings don't count.
fn balanced_objects(text: &str) -> Vec<String> {
    let bytes = text.as_bytes();
    let mut results = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = matching_brace(text, i) {
                results.push(text[i..=end].to_string());
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }
    results
}

fn matching_brace(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Light syntactic repair: normalize curly quotes, convert single-quoted
/// strings, and strip trailing commas before a closing bracket.
fn repair(text: &str) -> String {
    static TRAILING_COMMA: OnceLock<Regex> = OnceLock::new();
    let re =
        TRAILING_COMMA.get_or_init(|| Regex::new(r",\s*([\]}])").expect("valid comma regex"));

    let normalized = text
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201c}', '\u{201d}'], "\"");
    let requoted = requote_single_quotes(&normalized);
    re.replace_all(&requoted, "$1").into_owned()
}

/// Convert single-quoted JSON strings to double-quoted ones, leaving
/// apostrophes inside double-quoted strings alone.
fn requote_single_quotes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_double = false;
    let mut in_single = false;
    let mut escaped = false;
    while let Some(c) = chars.next() {
        if escaped {
            out.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => {
                out.push(c);
                escaped = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                out.push(c);
            }
            '\'' if !in_double => {
                in_single = !in_single;
                out.push('"');
            }
            '"' if in_single => {
                // A double quote inside a single-quoted string must be
                // escaped once the delimiters become double quotes.
                out.push('\\');
                out.push('"');
            }
            _ => out.push(c),
        }
    }
    out
}
