//! Extraction of structured data from free-form LLM output.
//!
//! Both parsers run in two explicit stages: a strict parse of the whole text,
//! then a fallback that locates the payload by delimiters and parses only that.
//! Each stage is exposed on its own so it can be exercised independently.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::changes::ChangeOperation;
use crate::error::{Error, Result};

/// Non-greedy ```json fence, dot matching newlines.
static JSON_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```json(.*?)```").expect("fence pattern is valid")
});

/// Longest output excerpt carried in an error message.
const ERROR_EXCERPT_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentedCode {
    commented_code: String,
}

/// Stage one: parse `raw` as exactly `{"commentedCode": "..."}`.
///
/// # Errors
///
/// Returns the `serde_json` error if `raw` is not such an object.
pub fn strict_commented_code(raw: &str) -> serde_json::Result<String> {
    serde_json::from_str::<CommentedCode>(raw.trim()).map(|c| c.commented_code)
}

/// Stage two: the body of the first ```json fence, with stray fence markers
/// removed. `None` when the text has no fence.
#[must_use]
pub fn extract_json_fence(raw: &str) -> Option<String> {
    JSON_FENCE.captures(raw).map(|caps| {
        caps[1]
            .replace("```json", "")
            .replace("```", "")
            .trim()
            .to_string()
    })
}

/// Extract the commented code from a comment-generation response.
///
/// Tries a strict parse first, then the contents of a ```json fence. When the
/// response has no fence at all, the trimmed text is returned as is.
///
/// # Errors
///
/// Returns [`Error::Protocol`] when a fence is present but its contents are
/// not a valid `{"commentedCode": ...}` object.
pub fn parse_single_code_response(raw: &str) -> Result<String> {
    if let Ok(code) = strict_commented_code(raw) {
        return Ok(code);
    }

    let Some(fenced) = extract_json_fence(raw) else {
        tracing::debug!("no JSON fence in response, using raw text");
        return Ok(raw.trim().to_string());
    };

    strict_commented_code(&fenced).map_err(|e| {
        Error::Protocol(format!(
            "fenced JSON is not a commentedCode object ({e}): {}",
            excerpt(&fenced)
        ))
    })
}

/// Stage one: parse `raw` as a JSON array of change operations.
///
/// # Errors
///
/// Returns the `serde_json` error if `raw` is not such an array.
pub fn strict_change_list(raw: &str) -> serde_json::Result<Vec<ChangeOperation>> {
    serde_json::from_str(raw.trim())
}

/// Stage two: the substring from the first `[` to the last `]`, inclusive.
#[must_use]
pub fn extract_json_array(raw: &str) -> Option<&str> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    (end > start).then(|| &raw[start..=end])
}

/// Extract the change list from a code-change response.
///
/// # Errors
///
/// - [`Error::NoJsonArray`] when the strict parse fails and the text holds no
///   bracketed array.
/// - [`Error::Protocol`] when the bracketed text is not a valid change list.
pub fn parse_change_list(raw: &str) -> Result<Vec<ChangeOperation>> {
    let strict_error = match strict_change_list(raw) {
        Ok(changes) => return Ok(changes),
        Err(e) => e,
    };
    tracing::debug!(error = %strict_error, "strict change-list parse failed, scanning for array");

    let array = extract_json_array(raw).ok_or(Error::NoJsonArray)?;
    serde_json::from_str(array).map_err(|e| {
        Error::Protocol(format!(
            "change list is malformed ({e}): {}",
            excerpt(array)
        ))
    })
}

fn excerpt(text: &str) -> String {
    let mut out: String = text.chars().take(ERROR_EXCERPT_CHARS).collect();
    if text.chars().count() > ERROR_EXCERPT_CHARS {
        out.push_str("...");
    }
    out
}
