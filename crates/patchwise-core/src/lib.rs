//! LLM-assisted code change pipeline.
//!
//! - [`client`]: streaming and single-shot completions with cooperative
//!   interruption, over a pluggable [`transport::ChatTransport`].
//! - [`parse`]: two-stage extraction of structured output from model text.
//! - [`changes`]: line-based change operations, bounds validation and
//!   conflict detection.
//! - [`apply`]: bottom-up application of changes to a [`document::Document`].
//! - [`approval`]: routing confirmation prompts to the user.

pub mod apply;
pub mod approval;
pub mod changes;
pub mod client;
pub mod config;
pub mod conversation;
pub mod document;
pub mod error;
pub mod mock;
pub mod parse;
pub mod providers;
pub mod transport;

pub use apply::apply_changes;
pub use changes::{ChangeAction, ChangeOperation, detect_conflicts, validate};
pub use client::{ChunkStream, InterruptHandle, LlmClient};
pub use config::{CompletionOverrides, FunctionCallMode, FunctionDef, LlmConfig};
pub use document::{Document, TextDocument};
pub use error::{Error, ErrorKind, Result};
pub use parse::{parse_change_list, parse_single_code_response};
