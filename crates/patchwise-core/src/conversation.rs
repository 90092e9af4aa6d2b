//! Chat transcript state.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transport::Role;

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// The reply was cut short by an interrupt. Content is what arrived.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub interrupted: bool,
    pub at: DateTime<Utc>,
}

/// A multi-turn chat transcript.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn add_user_message(&mut self, text: impl Into<String>) {
        self.push(Role::User, text.into(), false);
    }

    /// Record an assistant reply, marking it when it was interrupted.
    pub fn add_assistant_message(&mut self, text: impl Into<String>, interrupted: bool) {
        self.push(Role::Assistant, text.into(), interrupted);
    }

    fn push(&mut self, role: Role, content: String, interrupted: bool) {
        self.turns.push(Turn {
            role,
            content,
            interrupted,
            at: Utc::now(),
        });
    }

    /// The most recent assistant turn.
    #[must_use]
    pub fn last_reply(&self) -> Option<&Turn> {
        self.turns.iter().rev().find(|t| t.role == Role::Assistant)
    }

    /// Drop the oldest turns until at most `max` remain.
    pub fn truncate_front(&mut self, max: usize) {
        if self.turns.len() > max {
            let excess = self.turns.len() - max;
            self.turns.drain(..excess);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Save the conversation as pretty JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a conversation, or an empty one if the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}
