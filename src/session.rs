//! Per-session state carried between workflow ticks, and its JSON store.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::courses::CourseLookup;
use crate::error::{AssistantError, Result};
use crate::retrieval::CompetencyMatch;

/// Opening message of every new transcript.
pub const GREETING: &str = "Hello! I'm your Learning Path Assistant. Tell me about a skill or competency you're interested in developing, and I'll help you discover relevant competencies and suggest courses.";

/// Author of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Text typed by the learner.
    User,
    /// Text produced by the assistant.
    Assistant,
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author.
    pub role: Role,
    /// Markdown body.
    pub content: String,
}

impl ChatMessage {
    /// Message authored by the learner.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Message authored by the assistant.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Where a session sits in the query pipeline, derived from its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the next query.
    Idle,
    /// Course lookup for the competency at this position is pending.
    AwaitingCourseLookup(usize),
    /// All lookups are done and the final message has not been written.
    ComposingRecommendation,
}

/// Everything the workflow needs to resume a session on the next tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    /// Append-only transcript.
    pub messages: Vec<ChatMessage>,
    /// Query currently being served.
    pub user_query: String,
    /// Matches for the current query, best first.
    pub competencies: Vec<CompetencyMatch>,
    /// Position of the pending course lookup, `None` when nothing is pending.
    pub current_index: Option<usize>,
    /// Number of competencies to look up for the current query.
    pub total_search_count: usize,
    /// Course lookups completed for the current query, keyed by competency name.
    pub search_results: BTreeMap<String, CourseLookup>,
    /// Whether the final message for the current query was already appended.
    pub final_message_added: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            messages: vec![ChatMessage::assistant(GREETING)],
            user_query: String::new(),
            competencies: Vec::new(),
            current_index: None,
            total_search_count: 0,
            search_results: BTreeMap::new(),
            final_message_added: false,
        }
    }
}

impl SessionState {
    /// Current phase.
    pub fn phase(&self) -> Phase {
        match self.current_index {
            Some(i) if i < self.total_search_count => Phase::AwaitingCourseLookup(i),
            Some(_) if self.total_search_count > 0 && !self.final_message_added => {
                Phase::ComposingRecommendation
            }
            _ => Phase::Idle,
        }
    }

    /// Clears per-query fields while keeping the transcript.
    pub fn reset_query(&mut self) {
        self.user_query.clear();
        self.competencies.clear();
        self.current_index = None;
        self.total_search_count = 0;
        self.search_results.clear();
        self.final_message_added = false;
    }

    /// Last transcript entry, if any.
    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Appends an assistant message and returns a copy of it.
    pub(crate) fn push_assistant(&mut self, content: impl Into<String>) -> ChatMessage {
        let message = ChatMessage::assistant(content);
        self.messages.push(message.clone());
        message
    }
}

/// JSON file holding one [`SessionState`].
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the session, or starts a fresh one when the file does not exist.
    pub fn load(&self) -> Result<SessionState> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "starting new session");
                return Ok(SessionState::default());
            }
            Err(err) => return Err(AssistantError::session(&self.path, err.to_string())),
        };
        let state: SessionState = serde_json::from_str(&raw)
            .map_err(|err| AssistantError::session(&self.path, format!("invalid session file: {err}")))?;
        debug!(
            path = %self.path.display(),
            messages = state.messages.len(),
            "session loaded"
        );
        Ok(state)
    }

    /// Writes the session to a sibling temp file, then renames it into place.
    pub fn save(&self, state: &SessionState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|err| AssistantError::session(&self.path, err.to_string()))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|err| AssistantError::session(&self.path, err.to_string()))?;
        }
        let tmp = self.temp_path();
        fs::write(&tmp, json).map_err(|err| AssistantError::session(&tmp, err.to_string()))?;
        fs::rename(&tmp, &self.path)
            .map_err(|err| AssistantError::session(&self.path, err.to_string()))?;
        debug!(path = %self.path.display(), "session saved");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "session.json".to_string());
        self.path.with_file_name(format!(".{name}.tmp"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_match(name: &str) -> CompetencyMatch {
        CompetencyMatch {
            name: name.to_string(),
            description: format!("{name} description"),
            similarity_score: 0.75,
        }
    }

    #[test]
    fn fresh_session_starts_with_greeting() {
        let state = SessionState::default();
        assert_eq!(state.messages, vec![ChatMessage::assistant(GREETING)]);
        assert_eq!(state.phase(), Phase::Idle);
    }

    #[test]
    fn phase_follows_cursor() {
        let mut state = SessionState {
            competencies: vec![sample_match("A"), sample_match("B")],
            total_search_count: 2,
            current_index: Some(1),
            ..SessionState::default()
        };
        assert_eq!(state.phase(), Phase::AwaitingCourseLookup(1));
        state.current_index = Some(2);
        assert_eq!(state.phase(), Phase::ComposingRecommendation);
        state.final_message_added = true;
        assert_eq!(state.phase(), Phase::Idle);
        state.final_message_added = false;
        state.current_index = None;
        assert_eq!(state.phase(), Phase::Idle);
    }

    #[test]
    fn reset_query_keeps_transcript() {
        let mut state = SessionState {
            user_query: "data".into(),
            competencies: vec![sample_match("A")],
            current_index: Some(0),
            total_search_count: 1,
            final_message_added: true,
            ..SessionState::default()
        };
        state.messages.push(ChatMessage::user("data"));
        state
            .search_results
            .insert("A".into(), CourseLookup::Empty);
        state.reset_query();
        assert_eq!(state.messages.len(), 2);
        assert!(state.user_query.is_empty());
        assert!(state.competencies.is_empty());
        assert!(state.search_results.is_empty());
        assert_eq!(state.current_index, None);
        assert!(!state.final_message_added);
    }

    #[test]
    fn missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("absent.json"));
        assert_eq!(store.load().unwrap(), SessionState::default());
    }

    #[test]
    fn save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("nested/session.json"));
        let mut state = SessionState {
            user_query: "data".into(),
            competencies: vec![sample_match("Data Analysis")],
            current_index: Some(1),
            total_search_count: 1,
            ..SessionState::default()
        };
        state.search_results.insert(
            "Data Analysis".into(),
            CourseLookup::Found(vec!["SQL for Analysts".into()]),
        );
        store.save(&state).unwrap();
        assert!(!dir.path().join("nested/.session.json.tmp").exists());
        assert_eq!(store.load().unwrap(), state);
    }

    #[test]
    fn corrupt_file_is_a_session_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "{not json").unwrap();
        let err = SessionStore::new(&path).load().unwrap_err();
        assert!(matches!(err, AssistantError::Session { .. }));
    }
}
