//! Context window assembly.
//!
//! Builds the message sequence sent to the completion endpoint: one system
//! message (base prompt plus a project-context excerpt), the most recent
//! exchanges as genuine prior turns, then the current user message.
//! The window is bounded by exchange count only; there is no token budget.

use crate::providers::ChatMessage;
use crate::session::Exchange;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info};

/// Number of past exchanges replayed with each request
pub const HISTORY_WINDOW: usize = 3;

/// Number of project-context lines folded into the system prompt
pub const EXCERPT_LINES: usize = 10;

/// Separator between the base prompt and the project-context excerpt
pub const CONTEXT_HEADING: &str = "\n\nProject context:\n";

const CONTEXT_TEMPLATE: &str = "# AiCode Context\n\nAdd your project context here...\n";

/// Lines of the project-context document, replaced wholesale on reload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextExcerpt {
    lines: Vec<String>,
}

impl ContextExcerpt {
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    /// Read the document at `path`. A missing file is an empty excerpt.
    pub fn load(path: &Path) -> io::Result<Self> {
        if !path.exists() {
            debug!(path = ?path, "No project context file");
            return Ok(Self::default());
        }
        let excerpt = Self::from_text(&fs::read_to_string(path)?);
        info!(path = ?path, lines = excerpt.len(), "Loaded project context");
        Ok(excerpt)
    }

    /// First `n` lines
    pub fn head(&self, n: usize) -> &[String] {
        &self.lines[..self.lines.len().min(n)]
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Write a starter context document if none exists. Returns true if created.
pub fn create_context_template(path: &Path) -> io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, CONTEXT_TEMPLATE)?;
    info!(path = ?path, "Created project context template");
    Ok(true)
}

/// System prompt with the first `EXCERPT_LINES` of context appended
pub fn build_system_prompt(base: &str, excerpt: &ContextExcerpt) -> String {
    if excerpt.is_empty() {
        return base.to_string();
    }
    format!(
        "{}{}{}",
        base,
        CONTEXT_HEADING,
        excerpt.head(EXCERPT_LINES).join("\n")
    )
}

/// Assemble the request messages for one turn.
///
/// Order: system, then the last `HISTORY_WINDOW` exchanges oldest first as
/// user/assistant pairs, then `user_text`. The current question always comes
/// last so the endpoint reads history as earlier turns.
pub fn build_messages(
    system_prompt_base: &str,
    excerpt: &ContextExcerpt,
    history: &[Exchange],
    user_text: &str,
) -> Vec<ChatMessage> {
    let recent = &history[history.len().saturating_sub(HISTORY_WINDOW)..];

    let mut messages = Vec::with_capacity(2 + recent.len() * 2);
    messages.push(ChatMessage::system(build_system_prompt(
        system_prompt_base,
        excerpt,
    )));
    for exchange in recent {
        messages.push(ChatMessage::user(exchange.user_text.clone()));
        messages.push(ChatMessage::assistant(exchange.assistant_text.clone()));
    }
    messages.push(ChatMessage::user(user_text));

    debug!(
        messages = messages.len(),
        replayed = recent.len(),
        "Built context window"
    );
    messages
}
