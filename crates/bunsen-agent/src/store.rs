//! Session persistence keyed by thread identifier

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::conversation::ConversationState;

/// A suspended run checkpoint, written when the model asks the human
/// operator a question and consumed on resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspensionRecord {
    pub token: String,
    pub thread_id: String,
    pub tool_call_id: String,
    pub question: String,
    pub state: ConversationState,
    pub created_at: i64,
}

/// File-backed store for conversation state and suspension checkpoints.
///
/// One `{thread_id}.json` per thread, one `{token}.suspend.json` per pending
/// suspension. Thread ids are sanitized before use as file names.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Default store location under the platform data directory.
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bunsen")
            .join("sessions")
    }

    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn open_default() -> std::io::Result<Self> {
        Self::new(Self::default_dir())
    }

    fn thread_path(&self, thread_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize(thread_id)))
    }

    fn suspension_path(&self, token: &str) -> PathBuf {
        self.dir.join(format!("{}.suspend.json", sanitize(token)))
    }

    /// Persist the state for a thread, replacing any previous snapshot.
    pub fn save_state(&self, thread_id: &str, state: &ConversationState) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        fs::write(self.thread_path(thread_id), json)
    }

    /// Load a thread's state, or `None` if the thread has no snapshot.
    pub fn load_state(&self, thread_id: &str) -> std::io::Result<Option<ConversationState>> {
        let path = self.thread_path(thread_id);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Write a suspension checkpoint.
    pub fn save_suspension(&self, record: &SuspensionRecord) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        fs::write(self.suspension_path(&record.token), json)
    }

    /// Consume a suspension checkpoint by token. Removes the file so a token
    /// resumes at most once.
    pub fn take_suspension(&self, token: &str) -> std::io::Result<Option<SuspensionRecord>> {
        let path = self.suspension_path(token);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)?;
        let record: SuspensionRecord = serde_json::from_str(&json)?;
        fs::remove_file(&path)?;
        Ok(Some(record))
    }
}

/// Keep file names safe regardless of what callers pass as a thread id.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
