//! LLM request configuration.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Default response token limit.
pub const DEFAULT_MAX_TOKENS: u32 = 2048;
/// Default nucleus sampling mass.
pub const DEFAULT_TOP_P: f32 = 1.0;
/// Default request deadline in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Upper bound accepted for `max_tokens`.
pub const MAX_TOKENS_LIMIT: u32 = 32_000;

/// A function the model may call instead of answering in text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    /// Function name.
    pub name: String,

    /// Human-readable description passed to the model.
    #[serde(default)]
    pub description: String,

    /// JSON schema of the arguments.
    #[serde(default = "FunctionDef::empty_schema")]
    pub parameters: serde_json::Value,
}

impl FunctionDef {
    fn empty_schema() -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }
}

/// How the model is allowed to use the configured functions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FunctionCallMode {
    /// The model decides.
    #[default]
    Auto,
    /// The model must answer in text.
    None,
    /// The model must call the named function.
    Forced(String),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum FunctionCallRepr {
    Mode(String),
    Named { name: String },
}

impl Serialize for FunctionCallMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let repr = match self {
            Self::Auto => FunctionCallRepr::Mode("auto".to_string()),
            Self::None => FunctionCallRepr::Mode("none".to_string()),
            Self::Forced(name) => FunctionCallRepr::Named { name: name.clone() },
        };
        repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FunctionCallMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match FunctionCallRepr::deserialize(deserializer)? {
            FunctionCallRepr::Mode(mode) => match mode.as_str() {
                "auto" => Ok(Self::Auto),
                "none" => Ok(Self::None),
                other => Err(serde::de::Error::custom(format!(
                    "unknown function_call mode '{other}', expected \"auto\", \"none\" or {{ name = \"...\" }}"
                ))),
            },
            FunctionCallRepr::Named { name } => Ok(Self::Forced(name)),
        }
    }
}

/// Connection and sampling settings for one LLM.
///
/// Immutable for the duration of a request. Equality is used by the client
/// manager to decide when a client must be rebuilt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Bearer token sent to the endpoint.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key: String,

    /// Base URL of the OpenAI-compatible API (e.g. `https://api.openai.com/v1`).
    pub endpoint: String,

    /// Model identifier.
    pub model: String,

    /// System prompt sent ahead of every user message.
    pub system_prompt: String,

    /// Sampling temperature in `[0, 2]`.
    pub temperature: f32,

    /// Maximum tokens to generate, in `[1, 32000]`.
    pub max_tokens: u32,

    /// Nucleus sampling mass in `[0, 1]`.
    pub top_p: f32,

    /// Functions offered to the model.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<FunctionDef>,

    /// Function-call mode, only sent when functions are configured.
    pub function_call: FunctionCallMode,

    /// Whole-request deadline in seconds.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: "https://api.openai.com/v1".to_string(),
            model: String::new(),
            system_prompt: "You are a helpful coding assistant.".to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            top_p: DEFAULT_TOP_P,
            functions: Vec::new(),
            function_call: FunctionCallMode::Auto,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl LlmConfig {
    /// Create a config with the required fields and default sampling.
    pub fn new(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    /// Check the validity predicate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(Error::InvalidConfig("API key is blank".to_string()));
        }
        if self.endpoint.trim().is_empty() {
            return Err(Error::InvalidConfig("endpoint is blank".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(Error::InvalidConfig("model is blank".to_string()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::InvalidConfig(format!(
                "temperature {} is outside [0, 2]",
                self.temperature
            )));
        }
        if !(1..=MAX_TOKENS_LIMIT).contains(&self.max_tokens) {
            return Err(Error::InvalidConfig(format!(
                "max_tokens {} is outside [1, {MAX_TOKENS_LIMIT}]",
                self.max_tokens
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(Error::InvalidConfig(format!(
                "top_p {} is outside [0, 1]",
                self.top_p
            )));
        }
        if let FunctionCallMode::Forced(name) = &self.function_call {
            if !self.functions.iter().any(|f| &f.name == name) {
                return Err(Error::InvalidConfig(format!(
                    "function_call forces '{name}' but no such function is configured"
                )));
            }
        }
        Ok(())
    }

    /// Whether [`validate`](Self::validate) would succeed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Request deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Per-call sampling overrides. Unset fields fall back to the config.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompletionOverrides {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
}
