//! Persistent chat history.

use std::path::{Path, PathBuf};

use patchwise_core::conversation::Conversation;

use crate::config::{Config, HistoryConfig};

/// Stores the chat transcript as JSON under the data directory.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    max_turns: usize,
    enabled: bool,
}

impl HistoryStore {
    /// History at the default location.
    ///
    /// # Errors
    ///
    /// Returns error if the data directory cannot be determined.
    pub fn open(config: &HistoryConfig) -> anyhow::Result<Self> {
        let path = Config::data_dir()?.join("history").join("chat.json");
        Ok(Self::at(path, config))
    }

    #[must_use]
    pub fn at(path: PathBuf, config: &HistoryConfig) -> Self {
        Self {
            path,
            max_turns: config.max_turns,
            enabled: config.enabled,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The saved transcript, or an empty one when history is off or absent.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be parsed.
    pub fn load(&self) -> anyhow::Result<Conversation> {
        if !self.enabled {
            return Ok(Conversation::new());
        }
        Conversation::load(&self.path)
    }

    /// Save `conversation`, dropping the oldest turns beyond the cap.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written.
    pub fn save(&self, conversation: &mut Conversation) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        conversation.truncate_front(self.max_turns);
        conversation.save(&self.path)?;
        tracing::debug!(
            path = %self.path.display(),
            turns = conversation.turns().len(),
            "saved history"
        );
        Ok(())
    }

    /// Delete the saved transcript.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be removed.
    pub fn clear(&self) -> anyhow::Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
