//! Conversation state: the append-only turn log and run-scoped caches

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

use bunsen_ai::{Turn, UsageStats};

/// Contract violations detected when appending turns. These indicate caller
/// bugs; the loop aborts rather than letting the log go inconsistent.
#[derive(Error, Debug)]
pub enum StateError {
    /// A tool result arrived whose id matches no outstanding tool call
    #[error("tool result '{tool_call_id}' matches no outstanding tool call")]
    UnmatchedToolResult { tool_call_id: String },

    /// A tool call was answered twice
    #[error("tool call '{tool_call_id}' already has a result")]
    DuplicateToolResult { tool_call_id: String },

    /// A model turn was appended while {count} tool calls were still
    /// unanswered
    #[error("model turn appended with {count} unanswered tool calls")]
    UnansweredToolCalls { count: usize },
}

/// State of one run: ordered turn log, artifact paths, and memoized
/// summaries. Owned exclusively by one loop invocation; persisted between
/// runs keyed by thread identifier.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    /// Chronological turn log; never reordered
    pub turns: Vec<Turn>,
    /// Every artifact path produced by code execution this run, append-only
    pub artifact_paths: Vec<PathBuf>,
    /// Memoized dataset summary (write-once per run)
    pub dataset_cache: Option<String>,
    /// Memoized analysis summary (write-once per run)
    pub analysis_cache: Option<String>,
    /// Usage summed across all model turns
    pub total_usage: UsageStats,
}

impl ConversationState {
    /// Start a fresh state seeded with one user turn.
    pub fn seeded(query: impl Into<String>) -> Self {
        let mut state = Self::default();
        state.turns.push(Turn::user(query));
        state
    }

    /// Tool calls from the latest model turn that have no result yet.
    pub fn unanswered_calls(&self) -> Vec<(String, String)> {
        let last_model = match self.turns.iter().rposition(|t| matches!(t, Turn::Model { .. })) {
            Some(i) => i,
            None => return vec![],
        };

        let answered: HashSet<&str> = self.turns[last_model + 1..]
            .iter()
            .filter_map(|t| match t {
                Turn::ToolResult { tool_call_id, .. } => Some(tool_call_id.as_str()),
                _ => None,
            })
            .collect();

        self.turns[last_model]
            .tool_calls()
            .into_iter()
            .filter(|(id, _, _)| !answered.contains(id))
            .map(|(id, name, _)| (id.to_string(), name.to_string()))
            .collect()
    }

    /// Append a turn, enforcing the pairing invariant: every tool call in a
    /// model turn gets exactly one result before the next model turn.
    pub fn push_turn(&mut self, turn: Turn) -> Result<(), StateError> {
        match &turn {
            Turn::ToolResult { tool_call_id, .. } => {
                let outstanding = self.unanswered_calls();
                if !outstanding.iter().any(|(id, _)| id == tool_call_id) {
                    let answered_before = self.turns.iter().any(|t| {
                        matches!(t, Turn::ToolResult { tool_call_id: id, .. } if id == tool_call_id)
                    });
                    return Err(if answered_before {
                        StateError::DuplicateToolResult {
                            tool_call_id: tool_call_id.clone(),
                        }
                    } else {
                        StateError::UnmatchedToolResult {
                            tool_call_id: tool_call_id.clone(),
                        }
                    });
                }
            }
            Turn::Model { .. } => {
                let outstanding = self.unanswered_calls();
                if !outstanding.is_empty() {
                    return Err(StateError::UnansweredToolCalls {
                        count: outstanding.len(),
                    });
                }
            }
            Turn::User { .. } => {}
        }
        self.turns.push(turn);
        Ok(())
    }

    /// Record artifact paths, keeping insertion order and dropping
    /// duplicates.
    pub fn record_artifacts<I>(&mut self, paths: I)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        for path in paths {
            if !self.artifact_paths.contains(&path) {
                self.artifact_paths.push(path);
            }
        }
    }

    /// The last `n` recorded artifact paths, oldest first.
    pub fn recent_artifact_paths(&self, n: usize) -> Vec<PathBuf> {
        let start = self.artifact_paths.len().saturating_sub(n);
        self.artifact_paths[start..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bunsen_ai::{Content, UsageStats};

    fn model_with_calls(ids: &[&str]) -> Turn {
        let content = ids
            .iter()
            .map(|id| Content::tool_call(*id, "execute_python", serde_json::json!({})))
            .collect();
        Turn::model(content, UsageStats::default())
    }

    fn result_for(id: &str) -> Turn {
        Turn::tool_result(id, "execute_python", vec![Content::text("ok")], false)
    }

    #[test]
    fn test_pairing_happy_path() {
        let mut state = ConversationState::seeded("question");
        state.push_turn(model_with_calls(&["a", "b"])).unwrap();
        assert_eq!(state.unanswered_calls().len(), 2);
        state.push_turn(result_for("a")).unwrap();
        state.push_turn(result_for("b")).unwrap();
        assert!(state.unanswered_calls().is_empty());
        state
            .push_turn(Turn::model(vec![Content::text("done")], UsageStats::default()))
            .unwrap();
    }

    #[test]
    fn test_unmatched_result_rejected() {
        let mut state = ConversationState::seeded("q");
        state.push_turn(model_with_calls(&["a"])).unwrap();
        let err = state.push_turn(result_for("zzz")).unwrap_err();
        assert!(matches!(err, StateError::UnmatchedToolResult { .. }));
    }

    #[test]
    fn test_duplicate_result_rejected() {
        let mut state = ConversationState::seeded("q");
        state.push_turn(model_with_calls(&["a"])).unwrap();
        state.push_turn(result_for("a")).unwrap();
        let err = state.push_turn(result_for("a")).unwrap_err();
        assert!(matches!(err, StateError::DuplicateToolResult { .. }));
    }

    #[test]
    fn test_model_turn_with_outstanding_calls_rejected() {
        let mut state = ConversationState::seeded("q");
        state.push_turn(model_with_calls(&["a", "b"])).unwrap();
        state.push_turn(result_for("a")).unwrap();
        let err = state
            .push_turn(Turn::model(vec![Content::text("early")], UsageStats::default()))
            .unwrap_err();
        assert!(matches!(err, StateError::UnansweredToolCalls { count: 1 }));
    }

    #[test]
    fn test_pairing_invariant_random_batches() {
        // Property-style: for random batch sizes, answering every call in a
        // shuffled-ish order always restores the invariant, and the next
        // model turn is accepted exactly when all are answered.
        for batch in 1usize..8 {
            let mut state = ConversationState::seeded("q");
            let ids: Vec<String> = (0..batch).map(|i| format!("call_{}", i)).collect();
            let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            state.push_turn(model_with_calls(&id_refs)).unwrap();

            // Answer in reverse order to exercise non-listed ordering.
            for id in ids.iter().rev() {
                assert!(!state.unanswered_calls().is_empty());
                state.push_turn(result_for(id)).unwrap();
            }
            assert!(state.unanswered_calls().is_empty());
            state
                .push_turn(Turn::model(vec![Content::text("next")], UsageStats::default()))
                .unwrap();

            // Exactly one result per call id in the log.
            for id in &ids {
                let count = state
                    .turns
                    .iter()
                    .filter(|t| {
                        matches!(t, Turn::ToolResult { tool_call_id, .. } if tool_call_id == id)
                    })
                    .count();
                assert_eq!(count, 1, "call {} answered {} times", id, count);
            }
        }
    }

    #[test]
    fn test_recent_artifact_paths() {
        let mut state = ConversationState::default();
        state.record_artifacts([
            PathBuf::from("a.png"),
            PathBuf::from("b.png"),
            PathBuf::from("a.png"),
            PathBuf::from("c.png"),
        ]);
        assert_eq!(state.artifact_paths.len(), 3);
        let recent = state.recent_artifact_paths(2);
        assert_eq!(recent, vec![PathBuf::from("b.png"), PathBuf::from("c.png")]);
        assert_eq!(state.recent_artifact_paths(10).len(), 3);
    }

    #[test]
    fn test_state_serde_round_trip() {
        let mut state = ConversationState::seeded("q");
        state.push_turn(model_with_calls(&["a"])).unwrap();
        state.push_turn(result_for("a")).unwrap();
        state.record_artifacts([PathBuf::from("plots/e/f.png")]);
        state.dataset_cache = Some("2 files".into());

        let json = serde_json::to_string(&state).unwrap();
        let back: ConversationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.turns.len(), 3);
        assert_eq!(back.artifact_paths, state.artifact_paths);
        assert_eq!(back.dataset_cache.as_deref(), Some("2 files"));
    }
}
