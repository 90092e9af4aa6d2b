//! Configuration management for patchwise.

mod store;

use std::path::{Path, PathBuf};

use patchwise_core::LlmConfig;
use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

pub use store::ConfigStore;

/// One named LLM connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmProfile {
    /// Name used by `config select`.
    pub name: String,

    /// Disabled profiles are never picked implicitly or explicitly.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Environment variable holding the API key, read when `api_key` is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(flatten)]
    pub llm: LlmConfig,
}

const fn default_true() -> bool {
    true
}

impl LlmProfile {
    /// The connection settings with the API key resolved.
    #[must_use]
    pub fn resolved(&self) -> LlmConfig {
        let mut llm = self.llm.clone();
        if llm.api_key.trim().is_empty() {
            if let Some(key) = self
                .api_key_env
                .as_deref()
                .and_then(|name| std::env::var(name).ok())
            {
                llm.api_key = key;
            }
        }
        llm
    }
}

/// Chat history settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Persist chat turns between runs.
    pub enabled: bool,

    /// Oldest turns are dropped beyond this many.
    pub max_turns: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_turns: 200,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name of the active profile. Falls back to the first enabled one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<String>,

    /// Known LLM connections.
    pub llms: Vec<LlmProfile>,

    /// Chat history configuration.
    pub history: HistoryConfig,
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// Loads global config first, then merges project-local config if present.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file cannot be read or parsed.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;

        if let Ok(project_path) = Self::project_config_path() {
            if project_path.exists() {
                config.merge(Self::load_from(&project_path)?);
            }
        }

        Ok(config)
    }

    /// Load a single file, or defaults when it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("invalid config at {}: {e}", path.display()))
    }

    /// Get the project-local configuration file path.
    ///
    /// Looks for `.patchwise/config.toml` in the current directory.
    pub fn project_config_path() -> anyhow::Result<PathBuf> {
        let cwd = std::env::current_dir()?;
        Ok(cwd.join(".patchwise").join("config.toml"))
    }

    /// Merge another config into this one (project overrides global).
    ///
    /// Profiles are matched by name; unknown names are appended.
    fn merge(&mut self, other: Self) {
        for profile in other.llms {
            match self.llms.iter_mut().find(|p| p.name == profile.name) {
                Some(existing) => *existing = profile,
                None => self.llms.push(profile),
            }
        }
        if other.selected.is_some() {
            self.selected = other.selected;
        }
        if other.history != HistoryConfig::default() {
            self.history = other.history;
        }
    }

    /// The profile requests should use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no profile is configured, the selected
    /// name is unknown, or the selected profile is disabled.
    pub fn active_profile(&self) -> Result<&LlmProfile> {
        let Some(name) = &self.selected else {
            return self.llms.iter().find(|p| p.enabled).ok_or_else(|| {
                Error::Config(
                    "no LLM is configured. Add an [[llms]] entry to the config file \
                     (see `patchwise config path`)"
                        .to_string(),
                )
            });
        };

        let profile = self.llms.iter().find(|p| &p.name == name).ok_or_else(|| {
            Error::Config(format!(
                "selected LLM '{name}' is not configured. Run `patchwise config select <name>` \
                 with one of: {}",
                self.profile_names().join(", ")
            ))
        })?;

        if !profile.enabled {
            return Err(Error::Config(format!(
                "selected LLM '{name}' is disabled. Enable it or select another one"
            )));
        }
        Ok(profile)
    }

    /// Resolved and validated settings of the active profile.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no usable profile exists or the
    /// profile fails validation.
    pub fn active_llm(&self) -> Result<LlmConfig> {
        let profile = self.active_profile()?;
        let llm = profile.resolved();
        llm.validate().map_err(|e| {
            let hint = profile.api_key_env.as_deref().map_or_else(String::new, |var| {
                format!(" (is {var} set?)")
            });
            Error::Config(format!("LLM '{}': {e}{hint}", profile.name))
        })?;
        Ok(llm)
    }

    #[must_use]
    pub fn profile_names(&self) -> Vec<&str> {
        self.llms.iter().map(|p| p.name.as_str()).collect()
    }

    /// Get the configuration file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined.
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Get the config directory path (`~/.config/patchwise/`).
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined.
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
            return Ok(PathBuf::from(xdg_config_home).join("patchwise"));
        }

        let base = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;

        Ok(base.config_dir().join("patchwise"))
    }

    /// Get the data directory path (`~/.local/share/patchwise/`).
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be determined.
    pub fn data_dir() -> anyhow::Result<PathBuf> {
        let base = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("could not determine data directory"))?;

        Ok(base.data_dir().join("patchwise"))
    }

    /// Persist `selected = name` without touching the rest of the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or written.
    pub fn save_selected_to_path(name: &str, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut config_value = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<toml::Value>(&contents)?
        } else {
            toml::Value::Table(toml::map::Map::new())
        };

        let config_table = config_value
            .as_table_mut()
            .ok_or_else(|| anyhow::anyhow!("config root must be a table"))?;
        config_table.insert("selected".to_string(), toml::Value::String(name.to_string()));

        std::fs::write(path, toml::to_string_pretty(&config_value)?)?;
        Ok(())
    }

    /// Write the whole config to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}
