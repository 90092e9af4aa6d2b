//! Core logic shared by every command: clients, flows, chat, and history.

pub mod chat;
pub mod clients;
pub mod diff;
mod error;
pub mod history;
pub mod host;
pub mod orchestrator;
pub mod pool;
pub mod prompt;

pub use chat::{ChatSession, Reply};
pub use clients::ClientManager;
pub use error::{Error, Result};
pub use history::HistoryStore;
pub use host::{Notice, NoticeLevel, Notifier, TerminalNotifier};
pub use orchestrator::{ChangesAction, CommentAction, Outcome, RequestState, Services};
pub use pool::WorkerPool;
