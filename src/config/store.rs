//! Shared, observable configuration.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use patchwise_core::LlmConfig;
use tokio::sync::watch;

use super::Config;
use crate::core::Result;

/// Holds the live [`Config`] and tells subscribers when it changes.
///
/// Components receive the store explicitly instead of reading settings from
/// ambient state, and read a fresh snapshot per request.
#[derive(Debug)]
pub struct ConfigStore {
    current: RwLock<Arc<Config>>,
    changes: watch::Sender<Arc<Config>>,
    path: Option<PathBuf>,
}

impl ConfigStore {
    /// A store that is never written back to disk.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::build(config, None)
    }

    /// A store backed by the file at `path`.
    #[must_use]
    pub fn with_path(config: Config, path: PathBuf) -> Self {
        Self::build(config, Some(path))
    }

    fn build(config: Config, path: Option<PathBuf>) -> Self {
        let config = Arc::new(config);
        let (changes, _) = watch::channel(Arc::clone(&config));
        Self {
            current: RwLock::new(config),
            changes,
            path,
        }
    }

    /// Current configuration.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Config> {
        Arc::clone(&self.current.read())
    }

    /// Settings of the active LLM, resolved and validated.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no usable LLM is configured.
    pub fn active_llm(&self) -> Result<LlmConfig> {
        self.snapshot().active_llm()
    }

    /// Modify the configuration and notify subscribers.
    pub fn update(&self, f: impl FnOnce(&mut Config)) {
        let updated = {
            let mut current = self.current.write();
            let mut next = Config::clone(&current);
            f(&mut next);
            if next == **current {
                return;
            }
            *current = Arc::new(next);
            Arc::clone(&current)
        };
        tracing::debug!(selected = ?updated.selected, "configuration changed");
        self.changes.send_replace(updated);
    }

    /// Make `name` the active profile.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no profile has that name.
    pub fn select(&self, name: &str) -> Result<()> {
        let snapshot = self.snapshot();
        if !snapshot.llms.iter().any(|p| p.name == name) {
            return Err(crate::core::Error::Config(format!(
                "no LLM named '{name}'; configured: {}",
                snapshot.profile_names().join(", ")
            )));
        }
        self.update(|config| config.selected = Some(name.to_string()));
        Ok(())
    }

    /// Receive every configuration change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
        self.changes.subscribe()
    }

    /// Persist the selected profile to the backing file, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_selection(&self) -> anyhow::Result<()> {
        let (Some(path), Some(name)) = (&self.path, self.snapshot().selected.clone()) else {
            return Ok(());
        };
        Config::save_selected_to_path(&name, path)
    }
}
