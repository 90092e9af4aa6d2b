//! CLI command parsing.

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, Subcommand};

/// patchwise - LLM-assisted code changes, always confirmed before they land.
#[derive(Parser)]
#[command(name = "patchwise")]
#[command(about = "LLM-assisted code changes with a diff preview and confirmation")]
#[command(version = crate::build_info::VERSION_STRING)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Chat with the active LLM. Ctrl-C stops the reply.
    Chat {
        /// The message to send.
        prompt: String,
    },

    /// Ask for changes to a file and apply them after confirmation.
    #[command(visible_alias = "c")]
    Change {
        /// File to change.
        file: PathBuf,

        /// What to change.
        #[arg(short, long)]
        instruction: String,

        /// File with suggested code to integrate.
        #[arg(long)]
        code: Option<PathBuf>,

        /// Restrict the request to these 1-based lines (`a-b` or `a`).
        #[arg(short, long)]
        lines: Option<LineRange>,
    },

    /// Add comments to a range of lines after confirmation.
    Comment {
        /// File to comment.
        file: PathBuf,

        /// 1-based lines to comment (`a-b` or `a`).
        #[arg(short, long)]
        lines: LineRange,
    },

    /// Manage configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Manage chat history.
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the current configuration, with API keys masked.
    Show,

    /// Show the configuration file path.
    Path,

    /// Make a configured LLM the active one.
    Select {
        /// Profile name.
        name: String,
    },
}

#[derive(Subcommand)]
pub enum HistoryCommands {
    /// Print the saved chat.
    Show,

    /// Delete the saved chat.
    Clear,
}

/// Inclusive, 1-based line range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl FromStr for LineRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |n: &str| {
            n.trim()
                .parse::<usize>()
                .map_err(|e| format!("invalid line number '{n}': {e}"))
        };
        let (start, end) = match s.split_once('-') {
            Some((start, end)) => (parse(start)?, parse(end)?),
            None => {
                let line = parse(s)?;
                (line, line)
            }
        };
        if start == 0 {
            return Err("line numbers start at 1".to_string());
        }
        if end < start {
            return Err(format!("range {start}-{end} ends before it starts"));
        }
        Ok(Self { start, end })
    }
}
