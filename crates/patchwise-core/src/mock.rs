//! Scripted transport for tests.
//!
//! Produces canned responses without a network, with optional latency and
//! per-chunk delays, and records what it was asked to do.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::transport::{
    ChatChoice, ChatDelta, ChatRequest, ChatResponse, ChatTransport, DeltaStream, TransportFactory,
};

/// A canned reply.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// A complete response; streamed as a single text delta.
    Whole(ChatResponse),
    /// Stream deltas; joined into one choice for non-streaming calls.
    Deltas(Vec<ChatDelta>),
    /// Emit `before` as text deltas, then fail with a transport error.
    Failing { before: Vec<String>, message: String },
    /// Fail the request outright with an API error.
    ApiError { status: u16, message: String },
}

impl ScriptedResponse {
    /// A single text choice.
    pub fn text(content: impl Into<String>) -> Self {
        Self::Whole(ChatResponse {
            choices: vec![ChatChoice {
                content: Some(content.into()),
                function_call: None,
            }],
        })
    }

    /// Text deltas, one per item.
    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Deltas(chunks.into_iter().map(ChatDelta::text).collect())
    }

    fn into_response(self) -> Result<ChatResponse> {
        match self {
            Self::Whole(response) => Ok(response),
            Self::Deltas(deltas) => {
                let content: String = deltas.into_iter().filter_map(|d| d.content).collect();
                Self::text(content).into_response()
            }
            Self::Failing { message, .. } => Err(Error::Transport(message)),
            Self::ApiError { status, message } => Err(Error::Api { status, message }),
        }
    }
}

/// Counters shared between a [`MockTransport`] and the test.
#[derive(Debug, Default)]
struct ProbeState {
    open_streams: AtomicUsize,
    close_calls: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

/// Read-only view of what a [`MockTransport`] did.
#[derive(Debug, Clone, Default)]
pub struct TransportProbe(Arc<ProbeState>);

impl TransportProbe {
    /// Streams handed out and not yet dropped.
    #[must_use]
    pub fn open_streams(&self) -> usize {
        self.0.open_streams.load(Ordering::SeqCst)
    }

    /// Number of times `close` reached the transport.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.0.close_calls.load(Ordering::SeqCst)
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.0.requests.lock().clone()
    }
}

struct StreamGuard(TransportProbe);

impl StreamGuard {
    fn open(probe: TransportProbe) -> Self {
        probe.0.open_streams.fetch_add(1, Ordering::SeqCst);
        Self(probe)
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.0.open_streams.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-process [`ChatTransport`] replaying scripted responses.
///
/// Responses are consumed in order; the last one repeats.
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: Mutex<Vec<ScriptedResponse>>,
    latency: Option<Duration>,
    chunk_delay: Option<Duration>,
    close_error: Option<String>,
    probe: TransportProbe,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response.
    #[must_use]
    pub fn with_response(self, response: ScriptedResponse) -> Self {
        self.responses.lock().push(response);
        self
    }

    /// Delay before each response starts.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Delay before each streamed delta.
    #[must_use]
    pub const fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Make `close` fail with a transport error.
    #[must_use]
    pub fn failing_close(mut self, message: impl Into<String>) -> Self {
        self.close_error = Some(message.into());
        self
    }

    /// Observe this transport after it has been handed to a client.
    #[must_use]
    pub fn probe(&self) -> TransportProbe {
        self.probe.clone()
    }

    fn next_response(&self, request: ChatRequest) -> Result<ScriptedResponse> {
        self.probe.0.requests.lock().push(request);
        let mut responses = self.responses.lock();
        match responses.len() {
            0 => Err(Error::Transport("no scripted response".to_string())),
            1 => Ok(responses[0].clone()),
            _ => Ok(responses.remove(0)),
        }
    }

    async fn wait_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
        let response = self.next_response(request)?;
        self.wait_latency().await;
        response.into_response()
    }

    async fn stream(&self, request: ChatRequest) -> Result<DeltaStream> {
        let response = self.next_response(request)?;
        self.wait_latency().await;

        let (deltas, failure) = match response {
            ScriptedResponse::Whole(response) => {
                let text = response
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.content)
                    .unwrap_or_default();
                (vec![ChatDelta::text(text)], None)
            }
            ScriptedResponse::Deltas(deltas) => (deltas, None),
            ScriptedResponse::Failing { before, message } => (
                before.into_iter().map(ChatDelta::text).collect(),
                Some(message),
            ),
            ScriptedResponse::ApiError { status, message } => {
                return Err(Error::Api { status, message });
            }
        };

        let guard = StreamGuard::open(self.probe.clone());
        let delay = self.chunk_delay;
        let stream = async_stream::stream! {
            let _guard = guard;
            for delta in deltas {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(delta);
            }
            if let Some(message) = failure {
                yield Err(Error::Transport(message));
            }
        };
        Ok(Box::pin(stream))
    }

    fn close(&self) -> Result<()> {
        self.probe.0.close_calls.fetch_add(1, Ordering::SeqCst);
        match &self.close_error {
            Some(message) => Err(Error::Transport(message.clone())),
            None => Ok(()),
        }
    }
}

/// [`TransportFactory`] producing [`MockTransport`]s that all reply with the
/// same script.
#[derive(Debug, Default)]
pub struct MockFactory {
    script: Vec<ScriptedResponse>,
    created: Mutex<Vec<(String, TransportProbe)>>,
}

impl MockFactory {
    #[must_use]
    pub fn new(script: Vec<ScriptedResponse>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    /// Probes of every transport created so far, keyed by endpoint.
    #[must_use]
    pub fn created(&self) -> Vec<(String, TransportProbe)> {
        self.created.lock().clone()
    }

    /// Number of transports created.
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }
}

impl TransportFactory for MockFactory {
    fn create(&self, config: &LlmConfig) -> Result<Box<dyn ChatTransport>> {
        let mut transport = MockTransport::new();
        for response in &self.script {
            transport = transport.with_response(response.clone());
        }
        self.created
            .lock()
            .push((config.endpoint.clone(), transport.probe()));
        Ok(Box::new(transport))
    }
}
