//! Conversation session state and snapshot persistence.
//!
//! A session owns the exchange history, the project-context excerpt and the
//! active model name. Turns follow `Idle -> AwaitingResponse -> Idle`; an
//! exchange is appended only when a round-trip succeeds.
//!
//! Failures seen by the shell are kept in a bounded error log for `/debug
//! errors`. The log belongs to the running shell and is not part of a
//! snapshot.

use crate::context::ContextExcerpt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from session state transitions and the snapshot store
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("A request is already awaiting a response")]
    TurnInProgress,

    #[error("No request is awaiting a response")]
    NoTurnInProgress,

    #[error("Invalid session name '{0}'")]
    InvalidName(String),

    #[error("Session '{0}' not found")]
    NotFound(String),

    #[error("Failed to parse session file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One completed question/answer pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub user_text: String,
    pub assistant_text: String,
    pub timestamp: DateTime<Utc>,
}

impl Exchange {
    pub fn new(user_text: impl Into<String>, assistant_text: impl Into<String>) -> Self {
        Self {
            user_text: user_text.into(),
            assistant_text: assistant_text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Entries kept in the error log; older ones are dropped first
pub const ERROR_LOG_LIMIT: usize = 50;

/// A failure the shell reported to the user
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedError {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Where the session is in its request cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    AwaitingResponse,
}

/// Live conversation state for one shell
#[derive(Debug, Clone)]
pub struct ConversationSession {
    history: Vec<Exchange>,
    context: ContextExcerpt,
    active_model: String,
    state: SessionState,
    errors: Vec<RecordedError>,
}

impl ConversationSession {
    pub fn new(active_model: impl Into<String>, context: ContextExcerpt) -> Self {
        Self {
            history: Vec::new(),
            context,
            active_model: active_model.into(),
            state: SessionState::Idle,
            errors: Vec::new(),
        }
    }

    pub fn history(&self) -> &[Exchange] {
        &self.history
    }

    pub fn context(&self) -> &ContextExcerpt {
        &self.context
    }

    pub fn active_model(&self) -> &str {
        &self.active_model
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_active_model(&mut self, name: impl Into<String>) {
        self.active_model = name.into();
        info!(model = %self.active_model, "Switched active model");
    }

    /// Mark a request as outstanding
    pub fn begin_turn(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::AwaitingResponse {
            return Err(SessionError::TurnInProgress);
        }
        self.state = SessionState::AwaitingResponse;
        Ok(())
    }

    /// Record the successful round-trip and return to idle
    pub fn complete_turn(
        &mut self,
        user_text: impl Into<String>,
        assistant_text: impl Into<String>,
    ) -> Result<&Exchange, SessionError> {
        if self.state != SessionState::AwaitingResponse {
            return Err(SessionError::NoTurnInProgress);
        }
        self.history.push(Exchange::new(user_text, assistant_text));
        self.state = SessionState::Idle;
        debug!(exchanges = self.history.len(), "Turn completed");
        Ok(&self.history[self.history.len() - 1])
    }

    /// Return to idle without recording anything
    pub fn abandon_turn(&mut self) {
        if self.state == SessionState::AwaitingResponse {
            debug!("Turn abandoned");
        }
        self.state = SessionState::Idle;
    }

    /// Drop every exchange. Context and active model are kept.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn reload_context(&mut self, context: ContextExcerpt) {
        self.context = context;
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        if self.errors.len() == ERROR_LOG_LIMIT {
            self.errors.remove(0);
        }
        self.errors.push(RecordedError {
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    /// The last `n` recorded errors, oldest first
    pub fn recent_errors(&self, n: usize) -> &[RecordedError] {
        &self.errors[self.errors.len().saturating_sub(n)..]
    }

    /// Snapshot for persistence
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            history: self.history.clone(),
            context: self.context.clone(),
            active_model: self.active_model.clone(),
            saved_at: Utc::now(),
        }
    }

    /// Replace state with a stored snapshot; any pending turn is dropped
    pub fn restore(&mut self, snapshot: SessionSnapshot) {
        self.history = snapshot.history;
        self.context = snapshot.context;
        self.active_model = snapshot.active_model;
        self.state = SessionState::Idle;
    }
}

/// Persisted form of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub history: Vec<Exchange>,
    pub context: ContextExcerpt,
    pub active_model: String,
    pub saved_at: DateTime<Utc>,
}

/// Default name for a snapshot saved now
pub fn default_session_name() -> String {
    Utc::now().format("session_%Y%m%d_%H%M").to_string()
}

/// Directory of `<name>.json` session snapshots
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, SessionError> {
        let valid = !name.is_empty()
            && !name.contains("..")
            && !name.contains('/')
            && !name.contains('\\');
        if !valid {
            return Err(SessionError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", name)))
    }

    pub fn save(&self, name: &str, snapshot: &SessionSnapshot) -> Result<PathBuf, SessionError> {
        let path = self.path_for(name)?;
        fs::create_dir_all(&self.dir)?;
        fs::write(&path, serde_json::to_string_pretty(snapshot)?)?;
        info!(session = %name, path = ?path, "Session saved");
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<SessionSnapshot, SessionError> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Err(SessionError::NotFound(name.to_string()));
        }
        let json = fs::read_to_string(&path)?;
        let snapshot = serde_json::from_str(&json)?;
        info!(session = %name, "Session loaded");
        Ok(snapshot)
    }

    /// Names of stored snapshots, sorted
    pub fn list(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                if self.dir.exists() {
                    warn!(error = %e, path = ?self.dir, "Failed to read sessions directory");
                }
                return Vec::new();
            }
        };

        let mut names: Vec<String> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        names
    }
}
