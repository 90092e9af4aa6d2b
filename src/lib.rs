//! patchwise - LLM-assisted code changes for the terminal.
//!
//! The pipeline itself (client, parser, validator, applier, approvals) lives
//! in `patchwise_core`. This crate adds what a host application needs:
//! - CLI command parsing
//! - Configuration loading and the observable [`ConfigStore`](config::ConfigStore)
//! - Client lifecycle, the worker pool, and the request flows
//! - Terminal notifications and confirmation prompts
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐  ┌──────────────────┐
//! │     CLI     │──│ notices/approval │
//! └──────┬──────┘  └────────┬─────────┘
//!        │                  │
//!  ┌─────┴──────────────────┴─────┐
//!  │ Core: flows, clients, pool   │
//!  └──────────────┬───────────────┘
//!                 │
//!         ┌───────┴────────┐
//!         │ patchwise_core │
//!         └────────────────┘
//! ```

pub mod build_info;
pub mod cli;
pub mod config;
pub mod core;

pub use config::{Config, ConfigStore};
pub use self::core::{ChangesAction, ChatSession, ClientManager, CommentAction, Outcome, Services};
