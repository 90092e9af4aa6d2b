//! Chat-completion transport abstraction.
//!
//! A transport speaks one wire protocol (today: OpenAI-compatible chat
//! completions). [`LlmClient`](crate::client::LlmClient) wraps a transport and
//! adds request construction, overrides and interruption.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::config::{FunctionCallMode, FunctionDef, LlmConfig};
use crate::error::Result;

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A fully resolved completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation messages, system first.
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    /// Functions offered to the model. Empty means function calling is off.
    pub functions: Vec<FunctionDef>,
    /// Only meaningful when `functions` is non-empty.
    pub function_call: Option<FunctionCallMode>,
}

/// A function call returned by the model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON argument string, exactly as the model produced it.
    pub arguments: String,
}

/// One completion choice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatChoice {
    pub content: Option<String>,
    pub function_call: Option<FunctionCall>,
}

/// Non-streaming completion response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
}

/// One incremental streaming event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatDelta {
    /// Content text fragment.
    pub content: Option<String>,
    /// Function-call argument fragment.
    pub function_arguments: Option<String>,
    /// Set on the final event of a choice.
    pub finish_reason: Option<String>,
}

impl ChatDelta {
    /// Text-only delta.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }
}

/// Stream of deltas from the transport.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<ChatDelta>> + Send>>;

/// A chat-completion wire protocol.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Transport name, for logs.
    fn name(&self) -> &'static str;

    /// Issue a non-streaming completion.
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Issue a streaming completion.
    ///
    /// Dropping the returned stream must release the underlying connection.
    async fn stream(&self, request: ChatRequest) -> Result<DeltaStream>;

    /// Release connection resources. Must be idempotent.
    fn close(&self) -> Result<()>;
}

/// Builds transports for validated configurations.
pub trait TransportFactory: Send + Sync {
    /// Create a transport bound to `config.endpoint`.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying HTTP client cannot be built.
    fn create(&self, config: &LlmConfig) -> Result<Box<dyn ChatTransport>>;
}
