//! `OpenAI` transport implementation.
//!
//! Speaks the Chat Completions API, including OpenAI-compatible endpoints
//! (local servers, proxies). Streaming uses server-sent events.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::config::{FunctionCallMode, FunctionDef, LlmConfig};
use crate::error::{Error, Result};
use crate::transport::{
    ChatChoice, ChatDelta, ChatMessage, ChatRequest, ChatResponse, ChatTransport, DeltaStream,
    FunctionCall, TransportFactory,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport for the `OpenAI` API and compatible endpoints.
#[derive(Debug)]
pub struct OpenAiTransport {
    http: RwLock<Option<reqwest::Client>>,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAiTransport {
    /// Create a transport from a config.
    ///
    /// The configured timeout bounds a whole single-shot request. Streams have
    /// no overall deadline; they fail only when the server goes quiet for that
    /// long between reads.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(config.timeout())
            .build()?;

        Ok(Self {
            http: RwLock::new(Some(http)),
            api_key: config.api_key.clone(),
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            timeout: config.timeout(),
        })
    }

    fn client(&self) -> Result<reqwest::Client> {
        self.http.read().clone().ok_or(Error::Closed)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|_| Error::InvalidConfig("API key is not a valid header value".into()))?,
        );
        Ok(headers)
    }

    async fn post(&self, body: &OpenAiRequest<'_>) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self
            .client()?
            .post(&url)
            .headers(self.headers()?)
            .json(body);
        if !body.stream {
            request = request.timeout(self.timeout);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message: provider_message(&body),
            });
        }
        Ok(response)
    }
}

/// Factory producing [`OpenAiTransport`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiFactory;

impl TransportFactory for OpenAiFactory {
    fn create(&self, config: &LlmConfig) -> Result<Box<dyn ChatTransport>> {
        Ok(Box::new(OpenAiTransport::new(config)?))
    }
}

// Request types

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    functions: Option<&'a [FunctionDef]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<&'a FunctionCallMode>,
    stream: bool,
}

impl<'a> OpenAiRequest<'a> {
    fn from_request(request: &'a ChatRequest, stream: bool) -> Self {
        let has_functions = !request.functions.is_empty();
        Self {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            top_p: request.top_p,
            functions: has_functions.then_some(request.functions.as_slice()),
            function_call: if has_functions {
                request.function_call.as_ref()
            } else {
                None
            },
            stream,
        }
    }
}

// Response types

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    function_call: Option<OpenAiFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunctionCall {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

// SSE chunk types

#[derive(Debug, Deserialize)]
struct OpenAiChunk {
    #[serde(default)]
    choices: Vec<OpenAiChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChunkChoice {
    #[serde(default)]
    delta: OpenAiDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    function_call: Option<OpenAiFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunctionDelta {
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Extract the provider's error message from a response body, if it has one.
fn provider_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map_or_else(|_| body.trim().to_string(), |b| b.error.message)
}

/// Outcome of parsing one SSE event.
#[derive(Debug)]
enum SseEvent {
    Chunk(OpenAiChunk),
    Done,
    Skip,
}

/// Blank lines that end an event. Servers may frame with LF or CRLF.
const EVENT_SEPARATORS: [&[u8]; 3] = [b"\r\n\r\n", b"\n\r\n", b"\n\n"];

/// Start and length of the first event separator in `buffer`.
fn event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    (0..buffer.len()).find_map(|at| {
        EVENT_SEPARATORS
            .iter()
            .find(|sep| buffer[at..].starts_with(sep))
            .map(|sep| (at, sep.len()))
    })
}

/// Take the next complete SSE event off the front of `buffer`.
///
/// Works on raw bytes so that events and multi-byte characters split across
/// network reads are only decoded once they are whole. Returns `None` if the
/// buffer does not yet hold a complete event.
fn next_sse_event(buffer: &mut Vec<u8>) -> Option<Result<SseEvent>> {
    let (end, separator) = event_boundary(buffer)?;
    let mut event: Vec<u8> = buffer.drain(..end + separator).collect();
    event.truncate(end);

    Some(
        String::from_utf8(event)
            .map(|event| parse_sse_event(&event))
            .map_err(|e| Error::Transport(format!("stream event is not valid UTF-8: {e}"))),
    )
}

/// Parse the text of one complete SSE event.
///
/// Multiple `data:` lines are joined with newlines.
fn parse_sse_event(event: &str) -> SseEvent {
    let mut data: Option<String> = None;
    for line in event.lines() {
        let Some(rest) = line.strip_prefix("data:") else {
            continue;
        };
        let rest = rest.strip_prefix(' ').unwrap_or(rest);
        match &mut data {
            Some(data) => {
                data.push('\n');
                data.push_str(rest);
            }
            None => data = Some(rest.to_string()),
        }
    }

    let Some(data) = data else {
        return SseEvent::Skip;
    };

    if data.trim() == "[DONE]" {
        return SseEvent::Done;
    }

    match serde_json::from_str::<OpenAiChunk>(&data) {
        Ok(chunk) => SseEvent::Chunk(chunk),
        Err(e) => {
            tracing::debug!(data = %data, error = %e, "failed to parse OpenAI event");
            SseEvent::Skip
        }
    }
}

#[async_trait]
impl ChatTransport for OpenAiTransport {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
        let body = OpenAiRequest::from_request(&request, false);
        let response = self.post(&body).await?;
        let text = response.text().await?;
        let parsed: OpenAiResponse = serde_json::from_str(&text)
            .map_err(|e| Error::Transport(format!("malformed completion response: {e}")))?;

        Ok(ChatResponse {
            choices: parsed
                .choices
                .into_iter()
                .map(|c| ChatChoice {
                    content: c.message.content,
                    function_call: c.message.function_call.map(|f| FunctionCall {
                        name: f.name,
                        arguments: f.arguments,
                    }),
                })
                .collect(),
        })
    }

    async fn stream(&self, request: ChatRequest) -> Result<DeltaStream> {
        let body = OpenAiRequest::from_request(&request, true);
        let response = self.post(&body).await?;
        let byte_stream = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();
            futures::pin_mut!(byte_stream);

            'read: while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(Error::Http(e));
                        break;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(event) = next_sse_event(&mut buffer) {
                    let chunk = match event {
                        Ok(SseEvent::Chunk(chunk)) => chunk,
                        Ok(SseEvent::Done) => break 'read,
                        Ok(SseEvent::Skip) => continue,
                        Err(e) => {
                            yield Err(e);
                            break 'read;
                        }
                    };

                    for choice in chunk.choices {
                        yield Ok(ChatDelta {
                            content: choice.delta.content,
                            function_arguments: choice
                                .delta
                                .function_call
                                .and_then(|f| f.arguments),
                            finish_reason: choice.finish_reason,
                        });
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    fn close(&self) -> Result<()> {
        if self.http.write().take().is_some() {
            tracing::debug!(base_url = %self.base_url, "released HTTP client");
        }
        Ok(())
    }
}
