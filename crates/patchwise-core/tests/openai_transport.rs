//! HTTP-level tests for the OpenAI transport against a mock server.

use std::time::Duration;

use futures::StreamExt;
use patchwise_core::{Error, LlmClient, LlmConfig};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> LlmConfig {
    let mut config = LlmConfig::new("test-key", format!("{}/v1/", server.uri()), "gpt-4o-mini");
    config.system_prompt = "You are a code assistant.".to_string();
    config
}

#[tokio::test]
async fn single_completion_posts_chat_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "stream": false,
            "messages": [
                {"role": "system", "content": "You are a code assistant."},
                {"role": "user", "content": "add a comment"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "{\"commentedCode\":\"// hi\"}"},
                "finish_reason": "stop"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = LlmClient::create(config(&server)).unwrap();
    let text = client.get_single_completion("add a comment", None).await.unwrap();
    assert_eq!(text, "{\"commentedCode\":\"// hi\"}");
}

#[tokio::test]
async fn function_call_arguments_are_returned() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "function_call": {"name": "emit_changes", "arguments": "[]"}
                }
            }]
        })))
        .mount(&server)
        .await;

    let client = LlmClient::create(config(&server)).unwrap();
    assert_eq!(client.get_single_completion("x", None).await.unwrap(), "[]");
}

#[tokio::test]
async fn empty_choices_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let client = LlmClient::create(config(&server)).unwrap();
    assert!(matches!(
        client.get_single_completion("x", None).await,
        Err(Error::NoChoices)
    ));
}

#[tokio::test]
async fn provider_error_message_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
        })))
        .mount(&server)
        .await;

    let client = LlmClient::create(config(&server)).unwrap();
    match client.get_single_completion("x", None).await {
        Err(Error::Api { status, message }) => {
            assert_eq!(status, 401);
            assert_eq!(message, "Incorrect API key provided");
        }
        other => panic!("expected API error, got {other:?}"),
    }
}

#[tokio::test]
async fn streaming_yields_deltas_in_order() {
    let server = MockServer::start().await;
    let body = [
        r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
        r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
        r#"data: {"choices":[{"delta":{"content":"lo"}}]}"#,
        r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
        "data: [DONE]",
        r#"data: {"choices":[{"delta":{"content":"after done"}}]}"#,
    ]
    .map(|event| format!("{event}\r\n\r\n"))
    .concat();

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let client = LlmClient::create(config(&server)).unwrap();
    let chunks: Vec<String> = client
        .stream_completion("greet", None)
        .map(Result::unwrap)
        .collect()
        .await;
    assert_eq!(chunks, vec!["Hel", "lo"]);
}

#[tokio::test]
async fn streaming_error_status_ends_stream_with_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let client = LlmClient::create(config(&server)).unwrap();
    let items: Vec<_> = client.stream_completion("x", None).collect().await;
    assert_eq!(items.len(), 1);
    match &items[0] {
        Err(Error::Api { status, message }) => {
            assert_eq!(*status, 503);
            assert_eq!(message, "upstream unavailable");
        }
        other => panic!("expected API error, got {other:?}"),
    }
}

#[tokio::test]
async fn closed_client_refuses_requests() {
    let server = MockServer::start().await;
    let client = LlmClient::create(config(&server)).unwrap();
    client.close().unwrap();
    client.close().unwrap();
    assert!(matches!(
        client.get_single_completion("x", None).await,
        Err(Error::Closed)
    ));
}

// A mock server sends each body in one write. The tests below use a bare
// socket so that events and characters can straddle network reads.

/// Read one HTTP request, headers and body.
async fn read_request(socket: &mut TcpStream) {
    let mut request = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            return;
        }
        request.extend_from_slice(&buf[..n]);

        let text = String::from_utf8_lossy(&request);
        let Some(head_end) = text.find("\r\n\r\n") else {
            continue;
        };
        let length = text[..head_end]
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if request.len() >= head_end + 4 + length {
            return;
        }
    }
}

/// Serve one event stream, writing each piece as its own HTTP chunk.
async fn serve_in_pieces(pieces: Vec<Vec<u8>>) -> LlmConfig {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;

        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\n\
                  content-type: text/event-stream\r\n\
                  transfer-encoding: chunked\r\n\
                  connection: close\r\n\r\n",
            )
            .await
            .unwrap();
        for piece in pieces {
            let mut frame = format!("{:x}\r\n", piece.len()).into_bytes();
            frame.extend_from_slice(&piece);
            frame.extend_from_slice(b"\r\n");
            socket.write_all(&frame).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        socket.write_all(b"0\r\n\r\n").await.unwrap();
    });

    LlmConfig::new("test-key", format!("http://{addr}/v1"), "gpt-4o-mini")
}

fn content_event(text: &str, separator: &str) -> String {
    let data = json!({"choices": [{"delta": {"content": text}}]});
    format!("data: {data}{separator}")
}

fn split_at(body: &[u8], at: usize) -> Vec<Vec<u8>> {
    vec![body[..at].to_vec(), body[at..].to_vec()]
}

async fn streamed_text(config: LlmConfig) -> String {
    let client = LlmClient::create(config).unwrap();
    let chunks: Vec<String> = client
        .stream_completion("x", None)
        .map(Result::unwrap)
        .collect()
        .await;
    chunks.concat()
}

#[tokio::test]
async fn streaming_keeps_character_split_across_reads() {
    let body = format!("{}data: [DONE]\n\n", content_event("café", "\n\n"));
    let at = body.bytes().position(|b| b == 0xC3).unwrap() + 1;

    let config = serve_in_pieces(split_at(body.as_bytes(), at)).await;
    assert_eq!(streamed_text(config).await, "café");
}

#[tokio::test]
async fn streaming_keeps_events_when_crlf_separator_is_split() {
    let first = content_event("A", "\r\n\r\n");
    let body = format!(
        "{first}{}data: [DONE]\r\n\r\n",
        content_event("B", "\r\n\r\n")
    );
    let at = first.len() - 4 + 3;

    let config = serve_in_pieces(split_at(body.as_bytes(), at)).await;
    assert_eq!(streamed_text(config).await, "AB");
}

#[tokio::test]
async fn streaming_joins_event_split_inside_data_line() {
    let body = format!(
        "{}{}data: [DONE]\n\n",
        content_event("Hel", "\n\n"),
        content_event("lo", "\n\n")
    );
    let bytes = body.as_bytes();
    let pieces = vec![
        bytes[..10].to_vec(),
        bytes[10..body.find("lo").unwrap()].to_vec(),
        bytes[body.find("lo").unwrap()..].to_vec(),
    ];

    let config = serve_in_pieces(pieces).await;
    let client = LlmClient::create(config).unwrap();
    let chunks: Vec<String> = client
        .stream_completion("x", None)
        .map(Result::unwrap)
        .collect()
        .await;
    assert_eq!(chunks, vec!["Hel", "lo"]);
}
