//! Transport implementations.

mod openai;

pub use openai::{OpenAiFactory, OpenAiTransport};
