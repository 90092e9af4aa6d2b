//! LLM client wrapper with cooperative interruption.
//!
//! [`LlmClient`] owns one transport bound to one configuration. It builds
//! requests from the configured system prompt plus a user message, applies
//! per-call overrides, and exposes single-shot and streaming completions.
//!
//! Interruption is cooperative: [`LlmClient::interrupt`] sets a flag that the
//! streaming loop checks before every emission, and wakes any call that is
//! currently waiting on the network so it can stop without emitting more.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{Stream, StreamExt};
use tokio::sync::Notify;

use crate::config::{CompletionOverrides, LlmConfig};
use crate::error::{Error, Result};
use crate::providers::OpenAiFactory;
use crate::transport::{ChatDelta, ChatMessage, ChatRequest, ChatTransport, TransportFactory};

/// Stream of text fragments from a streaming completion.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Shared interrupt state. One per client, never shared between clients.
#[derive(Debug, Default)]
struct InterruptFlag {
    set: AtomicBool,
    notify: Notify,
}

impl InterruptFlag {
    fn raise(&self) {
        self.set.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn clear(&self) {
        self.set.store(false, Ordering::SeqCst);
    }

    fn is_set(&self) -> bool {
        self.set.load(Ordering::SeqCst)
    }

    /// Resolve once the flag is raised.
    async fn raised(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

/// Cloneable handle that can interrupt a client from another task.
#[derive(Debug, Clone)]
pub struct InterruptHandle(Arc<InterruptFlag>);

impl InterruptHandle {
    /// Raise the interrupt flag of the owning client.
    pub fn interrupt(&self) {
        self.0.raise();
    }

    /// Whether the flag is currently raised.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.0.is_set()
    }
}

/// Client for one LLM configuration.
pub struct LlmClient {
    config: LlmConfig,
    transport: Arc<dyn ChatTransport>,
    interrupt: Arc<InterruptFlag>,
    closed: AtomicBool,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("endpoint", &self.config.endpoint)
            .field("model", &self.config.model)
            .field("transport", &self.transport.name())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    /// Create a client speaking the `OpenAI` protocol.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the config fails validation.
    pub fn create(config: LlmConfig) -> Result<Self> {
        Self::with_factory(config, &OpenAiFactory)
    }

    /// Create a client whose transport comes from `factory`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the config fails validation, or the
    /// factory's error if the transport cannot be built.
    pub fn with_factory(config: LlmConfig, factory: &dyn TransportFactory) -> Result<Self> {
        config.validate()?;
        let transport = factory.create(&config)?;
        Ok(Self::from_parts(config, Arc::from(transport)))
    }

    /// Wrap an existing transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the config fails validation.
    pub fn with_transport(config: LlmConfig, transport: Box<dyn ChatTransport>) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(config, Arc::from(transport)))
    }

    fn from_parts(config: LlmConfig, transport: Arc<dyn ChatTransport>) -> Self {
        tracing::debug!(
            endpoint = %config.endpoint,
            model = %config.model,
            transport = transport.name(),
            "created LLM client"
        );
        Self {
            config,
            transport,
            interrupt: Arc::new(InterruptFlag::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// The configuration this client is bound to.
    #[must_use]
    pub const fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Build the request for a user message.
    #[must_use]
    pub fn build_request(
        &self,
        message: &str,
        overrides: Option<CompletionOverrides>,
    ) -> ChatRequest {
        let overrides = overrides.unwrap_or_default();
        let has_functions = !self.config.functions.is_empty();

        ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage::system(self.config.system_prompt.clone()),
                ChatMessage::user(message),
            ],
            temperature: overrides.temperature.unwrap_or(self.config.temperature),
            max_tokens: overrides.max_tokens.unwrap_or(self.config.max_tokens),
            top_p: overrides.top_p.unwrap_or(self.config.top_p),
            functions: self.config.functions.clone(),
            function_call: has_functions.then(|| self.config.function_call.clone()),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// Request a whole completion and return its text.
    ///
    /// Returns the first choice's content, or the raw argument string when the
    /// model answered with a function call instead.
    ///
    /// # Errors
    ///
    /// - [`Error::Cancelled`] if the client is interrupted while waiting.
    /// - [`Error::NoChoices`] / [`Error::NoContent`] for empty responses.
    /// - Transport errors as reported by the transport.
    pub async fn get_single_completion(
        &self,
        message: &str,
        overrides: Option<CompletionOverrides>,
    ) -> Result<String> {
        self.ensure_open()?;
        let request = self.build_request(message, overrides);

        let response = tokio::select! {
            biased;
            () = self.interrupt.raised() => {
                tracing::info!("completion interrupted while waiting on the LLM");
                return Err(Error::Cancelled);
            }
            response = self.transport.complete(request) => response?,
        };

        let choice = response.choices.into_iter().next().ok_or(Error::NoChoices)?;
        match (choice.content, choice.function_call) {
            (Some(content), _) if !content.is_empty() => Ok(content),
            (_, Some(call)) => {
                tracing::debug!(function = %call.name, "model answered with a function call");
                Ok(call.arguments)
            }
            _ => Err(Error::NoContent),
        }
    }

    /// Request a streaming completion.
    ///
    /// Resets the interrupt flag, then lazily opens the stream on first poll.
    /// Each item is a non-empty content fragment or function-call argument
    /// fragment, in transport order. Once the flag is raised no further items
    /// are produced and the stream ends without an error. Dropping the stream
    /// drops the transport stream with it.
    #[must_use]
    pub fn stream_completion(
        &self,
        message: &str,
        overrides: Option<CompletionOverrides>,
    ) -> ChunkStream {
        self.reset_interrupt();
        let closed = self.is_closed();
        let request = self.build_request(message, overrides);
        let transport = Arc::clone(&self.transport);
        let interrupt = Arc::clone(&self.interrupt);

        let stream = async_stream::stream! {
            if closed {
                yield Err(Error::Closed);
                return;
            }

            let opened = tokio::select! {
                biased;
                () = interrupt.raised() => None,
                opened = transport.stream(request) => Some(opened),
            };

            let mut deltas = match opened {
                None => {
                    tracing::info!("stream interrupted before it opened");
                    return;
                }
                Some(Err(e)) => {
                    yield Err(e);
                    return;
                }
                Some(Ok(deltas)) => deltas,
            };

            loop {
                let next = tokio::select! {
                    biased;
                    () = interrupt.raised() => None,
                    next = deltas.next() => Some(next),
                };

                let item = match next {
                    None => {
                        tracing::info!("stream interrupted");
                        break;
                    }
                    Some(None) => break,
                    Some(Some(item)) => item,
                };

                if interrupt.is_set() {
                    tracing::info!("stream interrupted");
                    break;
                }

                match item {
                    Ok(delta) => {
                        for fragment in fragments(delta) {
                            if interrupt.is_set() {
                                break;
                            }
                            yield Ok(fragment);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "stream failed");
                        yield Err(e);
                        break;
                    }
                }
            }
        };

        Box::pin(stream)
    }

    /// Raise the interrupt flag. Idempotent.
    pub fn interrupt(&self) {
        self.interrupt.raise();
    }

    /// Clear the interrupt flag before starting a new logical request.
    pub fn reset_interrupt(&self) {
        self.interrupt.clear();
    }

    /// Whether the interrupt flag is raised.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_set()
    }

    /// Handle for interrupting this client from elsewhere.
    #[must_use]
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle(Arc::clone(&self.interrupt))
    }

    /// Interrupt and release the transport.
    ///
    /// Safe to call more than once; only the first call reaches the transport.
    ///
    /// # Errors
    ///
    /// Propagates the transport's error from releasing its resources.
    pub fn close(&self) -> Result<()> {
        self.interrupt();
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!(endpoint = %self.config.endpoint, "closing LLM client");
        self.transport.close()
    }
}

/// Split a delta into the fragments it contributes, skipping empty ones.
fn fragments(delta: ChatDelta) -> impl Iterator<Item = String> {
    [delta.content, delta.function_arguments]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
}
