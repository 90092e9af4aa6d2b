//! The user-facing side of the pipeline: notifications and approval prompts.

use parking_lot::Mutex;
use patchwise_core::ErrorKind;
use patchwise_core::approval::{ApprovalClient, ApprovalContext, ApprovalResponse, InterfaceMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::error::{Error, Result};

/// Severity of a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A transient message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

impl Notice {
    pub fn new(level: NoticeLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            message: message.into(),
        }
    }

    /// The notice shown for a failed request.
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        match error.kind() {
            ErrorKind::Configuration => Self::new(
                NoticeLevel::Error,
                "LLM not configured",
                format!("{error}. Check your settings (`patchwise config path`)."),
            ),
            ErrorKind::Transport => Self::new(
                NoticeLevel::Error,
                "LLM request failed",
                error.to_string(),
            ),
            ErrorKind::Protocol => Self::new(
                NoticeLevel::Error,
                "Could not understand the AI's response",
                error.to_string(),
            ),
            ErrorKind::Cancellation => {
                Self::new(NoticeLevel::Info, "Interrupted", "The request was interrupted.")
            }
            ErrorKind::Apply => Self::new(
                NoticeLevel::Error,
                "Failed to apply changes",
                error.to_string(),
            ),
        }
    }
}

/// Shows notices to the user.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Writes notices to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, notice: Notice) {
        let tag = match notice.level {
            NoticeLevel::Info => "info",
            NoticeLevel::Success => "done",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Error => "error",
        };
        eprintln!("{tag}: {}: {}", notice.title, notice.message);
    }
}

/// Keeps notices in memory.
#[derive(Debug, Default)]
pub struct CollectingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl CollectingNotifier {
    #[must_use]
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

/// Register a terminal prompt as the approval interface.
///
/// Each request prints its diff to stderr and asks for confirmation,
/// defaulting to "no". A prompt that cannot be shown counts as a rejection.
///
/// # Errors
///
/// Returns an error if the approval actor is gone.
pub fn spawn_terminal_approver(client: ApprovalClient) -> Result<JoinHandle<()>> {
    let (interface_tx, mut interface_rx) = mpsc::unbounded_channel();
    client.register_interface(interface_tx)?;

    Ok(tokio::spawn(async move {
        while let Some(message) = interface_rx.recv().await {
            let InterfaceMessage::ShowApproval {
                request_id,
                context,
            } = message
            else {
                continue;
            };

            let response = tokio::task::spawn_blocking(move || confirm(&context))
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "approval prompt failed");
                    ApprovalResponse::Reject
                });

            if client.respond(request_id, response).is_err() {
                break;
            }
        }
    }))
}

fn confirm(context: &ApprovalContext) -> ApprovalResponse {
    eprintln!("\n{}", context.diff());
    let question = match context {
        ApprovalContext::ApplyChanges {
            target,
            change_count,
            conflicts,
            ..
        } => {
            if *conflicts {
                eprintln!("warning: some changes overlap; the result may not be what you expect");
            }
            format!("Apply {change_count} change(s) to {target}?")
        }
        ApprovalContext::ApplyComment { target, .. } => {
            format!("Replace the selection in {target} with the commented code?")
        }
    };

    match dialoguer::Confirm::with_theme(&dialoguer::theme::ColorfulTheme::default())
        .with_prompt(question)
        .default(false)
        .interact()
    {
        Ok(true) => ApprovalResponse::Approve,
        Ok(false) => ApprovalResponse::Reject,
        Err(e) => {
            tracing::warn!(error = %e, "could not show approval prompt, rejecting");
            ApprovalResponse::Reject
        }
    }
}
