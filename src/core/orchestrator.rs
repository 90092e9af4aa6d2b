//! Request flows: ask the LLM, check its answer, preview it and apply it once
//! the user approves.
//!
//! Every flow walks the same [`RequestState`] machine. Errors from any step are
//! caught here and turned into a [`Notice`]; nothing reaches the document
//! without an explicit approval.

use std::sync::Arc;

use patchwise_core::approval::{ApprovalClient, ApprovalContext};
use patchwise_core::{
    Document, ErrorKind, LlmClient, TextDocument, apply_changes, detect_conflicts,
    parse_change_list, parse_single_code_response, validate,
};

use super::clients::ClientManager;
use super::diff;
use super::error::{Error, Result};
use super::host::{Notice, NoticeLevel, Notifier};
use super::pool::WorkerPool;
use super::prompt;
use crate::config::ConfigStore;

/// Stage of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Prompting,
    AwaitingLlm,
    Parsing,
    Validating,
    AwaitingUserApproval,
    Applying,
    Done,
    Failed,
    Cancelled,
}

impl RequestState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// Whether `self → next` is a legal transition.
    ///
    /// Besides the main path, a request may end in `Done` without applying
    /// anything (nothing valid, or rejected by the user), fail from any
    /// non-terminal state, and be cancelled only while waiting on the LLM.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Idle, Self::Prompting)
            | (Self::Prompting, Self::AwaitingLlm)
            | (Self::AwaitingLlm, Self::Parsing)
            | (Self::Parsing, Self::Validating)
            | (Self::Validating, Self::AwaitingUserApproval)
            | (Self::AwaitingUserApproval, Self::Applying)
            | (Self::Applying | Self::Validating | Self::AwaitingUserApproval, Self::Done)
            | (Self::AwaitingLlm, Self::Cancelled) => true,
            (from, Self::Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// The states a request went through, starting at [`RequestState::Idle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTrail {
    states: Vec<RequestState>,
}

impl Default for StateTrail {
    fn default() -> Self {
        Self {
            states: vec![RequestState::Idle],
        }
    }
}

impl StateTrail {
    #[must_use]
    pub fn current(&self) -> RequestState {
        self.states
            .last()
            .copied()
            .unwrap_or(RequestState::Idle)
    }

    #[must_use]
    pub fn states(&self) -> &[RequestState] {
        &self.states
    }

    fn advance(&mut self, next: RequestState) -> bool {
        let from = self.current();
        if !from.can_advance_to(next) {
            tracing::error!(?from, to = ?next, "illegal request state transition");
            return false;
        }
        tracing::debug!(?from, to = ?next, "request state");
        self.states.push(next);
        true
    }
}

/// How a request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The user approved and the document was changed.
    Applied { count: usize, conflicts: bool },
    /// The user declined.
    Rejected,
    /// The LLM answered with nothing that fits the document.
    NothingToApply,
    /// Interrupted while waiting on the LLM.
    Cancelled,
    Failed(Notice),
}

/// What a flow needs from the host application.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<ConfigStore>,
    pub clients: Arc<ClientManager>,
    pub pool: WorkerPool,
    pub approvals: ApprovalClient,
    pub notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("clients", &self.clients)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl Services {
    fn notify(&self, level: NoticeLevel, title: &str, message: impl Into<String>) {
        self.notifier.notify(Notice::new(level, title, message));
    }

    /// Client for the active LLM.
    fn client(&self) -> Result<Arc<LlmClient>> {
        let llm = self.config.active_llm()?;
        Ok(self.clients.get_or_create(&llm)?)
    }

    /// Run a single-shot completion on the pool.
    async fn complete(&self, client: Arc<LlmClient>, prompt: String) -> Result<String> {
        client.reset_interrupt();
        let handle = self
            .pool
            .spawn(async move { client.get_single_completion(&prompt, None).await });
        Ok(handle.await??)
    }

    /// Turn a failed request into its outcome.
    fn conclude(&self, trail: &mut StateTrail, result: Result<Outcome>) -> Outcome {
        let error = match result {
            Ok(outcome) => return outcome,
            Err(e) => e,
        };

        let notice = Notice::from_error(&error);
        if error.kind() == ErrorKind::Cancellation && trail.advance(RequestState::Cancelled) {
            tracing::info!("request cancelled");
            self.notifier.notify(notice);
            return Outcome::Cancelled;
        }

        tracing::warn!(error = %error, state = ?trail.current(), "request failed");
        trail.advance(RequestState::Failed);
        self.notifier.notify(notice.clone());
        Outcome::Failed(notice)
    }
}

/// Ask the LLM for line-based changes to a document.
#[derive(Debug)]
pub struct ChangesAction {
    services: Services,
    trail: StateTrail,
}

impl ChangesAction {
    #[must_use]
    pub fn new(services: Services) -> Self {
        Self {
            services,
            trail: StateTrail::default(),
        }
    }

    /// States of the most recent run.
    #[must_use]
    pub const fn trail(&self) -> &StateTrail {
        &self.trail
    }

    /// Run the flow against `document`.
    ///
    /// `target` names the document in previews and notices; `language` tags
    /// the code fences in the prompt.
    pub async fn run(
        &mut self,
        document: &mut dyn Document,
        target: &str,
        language: &str,
        instruction: &str,
        suggested_code: Option<&str>,
    ) -> Outcome {
        self.trail = StateTrail::default();
        let result = self
            .execute(document, target, language, instruction, suggested_code)
            .await;
        self.services.conclude(&mut self.trail, result)
    }

    async fn execute(
        &mut self,
        document: &mut dyn Document,
        target: &str,
        language: &str,
        instruction: &str,
        suggested_code: Option<&str>,
    ) -> Result<Outcome> {
        self.trail.advance(RequestState::Prompting);
        let client = self.services.client()?;
        let prompt = prompt::changes_prompt(document.text(), language, instruction, suggested_code);

        self.trail.advance(RequestState::AwaitingLlm);
        let raw = self.services.complete(client, prompt).await?;

        self.trail.advance(RequestState::Parsing);
        let proposed = parse_change_list(&raw)?;
        let proposed_count = proposed.len();

        self.trail.advance(RequestState::Validating);
        let changes = validate(proposed, document.line_count());
        if changes.is_empty() {
            tracing::info!(proposed = proposed_count, "no applicable changes");
            self.trail.advance(RequestState::Done);
            self.services.notify(
                NoticeLevel::Warning,
                "No changes to apply",
                format!("None of the {proposed_count} suggested change(s) fit {target}."),
            );
            return Ok(Outcome::NothingToApply);
        }

        let conflicts = detect_conflicts(&changes);
        if conflicts {
            tracing::warn!(count = changes.len(), "suggested changes overlap");
        }

        let mut preview = TextDocument::new(document.text());
        apply_changes(&mut preview, &changes)?;
        let preview = diff::unified(document.text(), preview.text(), target);

        for change in &changes {
            document.add_highlight(change.start_line..=change.effective_end_line());
        }

        self.trail.advance(RequestState::AwaitingUserApproval);
        let approved = self
            .services
            .approvals
            .request(ApprovalContext::ApplyChanges {
                target: target.to_string(),
                diff: preview,
                change_count: changes.len(),
                conflicts,
            })
            .await;

        let approved = match approved {
            Ok(approved) => approved,
            Err(e) => {
                document.clear_highlights();
                return Err(e.into());
            }
        };

        if !approved {
            document.clear_highlights();
            self.trail.advance(RequestState::Done);
            self.services
                .notify(NoticeLevel::Info, "Changes discarded", format!("{target} is unchanged."));
            return Ok(Outcome::Rejected);
        }

        self.trail.advance(RequestState::Applying);
        let count = apply_changes(document, &changes)?;
        self.trail.advance(RequestState::Done);
        tracing::info!(count, conflicts, "changes applied");
        self.services.notify(
            NoticeLevel::Success,
            "Changes applied",
            format!("Applied {count} change(s) to {target}."),
        );
        Ok(Outcome::Applied { count, conflicts })
    }
}

/// Ask the LLM to comment the selected code.
#[derive(Debug)]
pub struct CommentAction {
    services: Services,
    trail: StateTrail,
}

impl CommentAction {
    #[must_use]
    pub fn new(services: Services) -> Self {
        Self {
            services,
            trail: StateTrail::default(),
        }
    }

    #[must_use]
    pub const fn trail(&self) -> &StateTrail {
        &self.trail
    }

    /// Replace the document's selection with a commented version of it.
    pub async fn run(
        &mut self,
        document: &mut dyn Document,
        target: &str,
        language: &str,
    ) -> Outcome {
        self.trail = StateTrail::default();
        let result = self.execute(document, target, language).await;
        self.services.conclude(&mut self.trail, result)
    }

    async fn execute(
        &mut self,
        document: &mut dyn Document,
        target: &str,
        language: &str,
    ) -> Result<Outcome> {
        let selection = document.selection().filter(|range| !range.is_empty());
        let Some((selection, code)) = selection.and_then(|range| {
            let code = document.text().get(range.clone())?.to_string();
            Some((range, code))
        }) else {
            let notice = Notice::new(
                NoticeLevel::Warning,
                "Nothing selected",
                "Select the code to comment first.",
            );
            self.trail.advance(RequestState::Failed);
            self.services.notifier.notify(notice.clone());
            return Ok(Outcome::Failed(notice));
        };

        self.trail.advance(RequestState::Prompting);
        let client = self.services.client()?;
        let prompt = prompt::comment_prompt(&code, language);

        self.trail.advance(RequestState::AwaitingLlm);
        let raw = self.services.complete(client, prompt).await?;

        self.trail.advance(RequestState::Parsing);
        let commented = parse_single_code_response(&raw)?;

        self.trail.advance(RequestState::Validating);
        if commented.trim().is_empty() || commented == code {
            self.trail.advance(RequestState::Done);
            self.services.notify(
                NoticeLevel::Warning,
                "No changes to apply",
                "The AI returned the selection unchanged.",
            );
            return Ok(Outcome::NothingToApply);
        }

        let mut updated = document.text().to_string();
        updated.replace_range(selection.clone(), &commented);
        let preview = diff::unified(document.text(), &updated, target);

        self.trail.advance(RequestState::AwaitingUserApproval);
        let approved = self
            .services
            .approvals
            .request(ApprovalContext::ApplyComment {
                target: target.to_string(),
                diff: preview,
            })
            .await?;

        if !approved {
            self.trail.advance(RequestState::Done);
            self.services
                .notify(NoticeLevel::Info, "Comments discarded", format!("{target} is unchanged."));
            return Ok(Outcome::Rejected);
        }

        self.trail.advance(RequestState::Applying);
        document.replace_range(selection.start, selection.end, &commented)?;
        document.clear_selection();
        self.trail.advance(RequestState::Done);
        self.services
            .notify(NoticeLevel::Success, "Comments added", format!("Updated {target}."));
        Ok(Outcome::Applied {
            count: 1,
            conflicts: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use patchwise_core::LlmConfig;
    use patchwise_core::approval::{ApprovalActor, ApprovalResponse, InterfaceMessage};
    use patchwise_core::mock::{MockFactory, ScriptedResponse};
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::{Config, LlmProfile};
    use crate::core::host::CollectingNotifier;

    struct Harness {
        services: Services,
        notifier: Arc<CollectingNotifier>,
        factory: Arc<MockFactory>,
    }

    fn config() -> Config {
        Config {
            llms: vec![LlmProfile {
                name: "mock".to_string(),
                enabled: true,
                api_key_env: None,
                llm: LlmConfig::new("sk-test", "http://mock/v1", "gpt-test"),
            }],
            ..Config::default()
        }
    }

    /// Services whose LLM answers with `reply` and whose user always answers
    /// `decision`.
    fn harness(config: Config, reply: ScriptedResponse, decision: ApprovalResponse) -> Harness {
        let factory = Arc::new(MockFactory::new(vec![reply]));
        let notifier = Arc::new(CollectingNotifier::default());
        let (actor, approvals) = ApprovalActor::new();
        tokio::spawn(actor.run());

        let (interface_tx, mut interface_rx) = mpsc::unbounded_channel();
        approvals.register_interface(interface_tx).unwrap();
        let responder = approvals.clone();
        tokio::spawn(async move {
            while let Some(message) = interface_rx.recv().await {
                if let InterfaceMessage::ShowApproval { request_id, .. } = message {
                    responder.respond(request_id, decision).unwrap();
                }
            }
        });

        Harness {
            services: Services {
                config: Arc::new(ConfigStore::new(config)),
                clients: Arc::new(ClientManager::new(factory.clone())),
                pool: WorkerPool::default(),
                approvals,
                notifier: notifier.clone(),
            },
            notifier,
            factory,
        }
    }

    const SOURCE: &str = "fn a() {}\nfn b() {}\nfn c() {}\n";

    #[test]
    fn transitions_follow_the_machine() {
        use RequestState as S;
        assert!(S::Idle.can_advance_to(S::Prompting));
        assert!(S::AwaitingLlm.can_advance_to(S::Cancelled));
        assert!(!S::Parsing.can_advance_to(S::Cancelled));
        assert!(!S::Prompting.can_advance_to(S::Applying));
        assert!(S::Validating.can_advance_to(S::Failed));
        assert!(!S::Done.can_advance_to(S::Failed));

        let mut trail = StateTrail::default();
        assert!(!trail.advance(S::Applying));
        assert_eq!(trail.current(), S::Idle);
    }

    #[tokio::test]
    async fn approved_changes_are_applied() {
        let reply = concat!(
            "Sure: ",
            r#"[{"action":"replace","start_line":2,"end_line":2,"new_code":"fn bee() {}"}]"#
        );
        let h = harness(config(), ScriptedResponse::text(reply), ApprovalResponse::Approve);
        let mut doc = TextDocument::new(SOURCE);
        let mut action = ChangesAction::new(h.services.clone());

        let outcome = action.run(&mut doc, "lib.rs", "rust", "rename b", None).await;

        assert_eq!(
            outcome,
            Outcome::Applied {
                count: 1,
                conflicts: false
            }
        );
        assert_eq!(doc.text(), "fn a() {}\nfn bee() {}\nfn c() {}\n");
        assert!(doc.highlights().is_empty());
        assert_eq!(
            action.trail().states(),
            &[
                RequestState::Idle,
                RequestState::Prompting,
                RequestState::AwaitingLlm,
                RequestState::Parsing,
                RequestState::Validating,
                RequestState::AwaitingUserApproval,
                RequestState::Applying,
                RequestState::Done,
            ]
        );
        assert_eq!(h.notifier.notices()[0].level, NoticeLevel::Success);
    }

    #[tokio::test]
    async fn prompt_numbers_lines_and_carries_suggestion() {
        let h = harness(config(), ScriptedResponse::text("[]"), ApprovalResponse::Approve);
        let mut doc = TextDocument::new(SOURCE);
        ChangesAction::new(h.services.clone())
            .run(&mut doc, "lib.rs", "rust", "add d", Some("fn d() {}"))
            .await;

        let request = &h.factory.created()[0].1.requests()[0];
        let user = &request.messages[1].content;
        assert!(user.contains("2| fn b() {}"));
        assert!(user.contains("fn d() {}"));
    }

    #[tokio::test]
    async fn rejection_leaves_document_untouched() {
        let reply = r#"[{"action":"delete","start_line":1,"end_line":3,"new_code":""}]"#;
        let h = harness(config(), ScriptedResponse::text(reply), ApprovalResponse::Reject);
        let mut doc = TextDocument::new(SOURCE);
        let mut action = ChangesAction::new(h.services.clone());

        let outcome = action.run(&mut doc, "lib.rs", "rust", "delete all", None).await;

        assert_eq!(outcome, Outcome::Rejected);
        assert_eq!(doc.text(), SOURCE);
        assert!(doc.highlights().is_empty());
        assert_eq!(action.trail().current(), RequestState::Done);
    }

    #[tokio::test]
    async fn all_invalid_changes_is_a_no_op() {
        let reply = r#"[{"action":"replace","start_line":2,"end_line":9,"new_code":"x"}]"#;
        let h = harness(config(), ScriptedResponse::text(reply), ApprovalResponse::Approve);
        let mut doc = TextDocument::new(SOURCE);

        let outcome = ChangesAction::new(h.services.clone())
            .run(&mut doc, "lib.rs", "rust", "x", None)
            .await;

        assert_eq!(outcome, Outcome::NothingToApply);
        assert_eq!(doc.text(), SOURCE);
        assert_eq!(h.notifier.notices()[0].title, "No changes to apply");
    }

    #[tokio::test]
    async fn malformed_output_fails_without_mutation() {
        let h = harness(
            config(),
            ScriptedResponse::text("I cannot help with that."),
            ApprovalResponse::Approve,
        );
        let mut doc = TextDocument::new(SOURCE);
        let mut action = ChangesAction::new(h.services.clone());

        let outcome = action.run(&mut doc, "lib.rs", "rust", "x", None).await;

        let Outcome::Failed(notice) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(notice.title, "Could not understand the AI's response");
        assert_eq!(doc.text(), SOURCE);
        assert_eq!(action.trail().current(), RequestState::Failed);
    }

    #[tokio::test]
    async fn missing_configuration_is_reported() {
        let h = harness(
            Config::default(),
            ScriptedResponse::text("[]"),
            ApprovalResponse::Approve,
        );
        let mut doc = TextDocument::new(SOURCE);

        let outcome = ChangesAction::new(h.services.clone())
            .run(&mut doc, "lib.rs", "rust", "x", None)
            .await;

        let Outcome::Failed(notice) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(notice.title, "LLM not configured");
        assert_eq!(h.factory.created_count(), 0);
    }

    #[tokio::test]
    async fn provider_error_message_is_surfaced() {
        let h = harness(
            config(),
            ScriptedResponse::ApiError {
                status: 429,
                message: "rate limited".to_string(),
            },
            ApprovalResponse::Approve,
        );
        let mut doc = TextDocument::new(SOURCE);

        let outcome = ChangesAction::new(h.services.clone())
            .run(&mut doc, "lib.rs", "rust", "x", None)
            .await;

        let Outcome::Failed(notice) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(notice.title, "LLM request failed");
        assert!(notice.message.contains("rate limited"));
    }

    #[tokio::test]
    async fn interrupt_while_waiting_cancels() {
        let h = harness(config(), ScriptedResponse::text("[]"), ApprovalResponse::Approve);
        let clients = Arc::clone(&h.services.clients);
        let mut doc = TextDocument::new(SOURCE);
        let mut action = ChangesAction::new(h.services.clone());

        // Busy pool: the call cannot start before the interrupt lands.
        let interrupter = tokio::spawn(async move {
            loop {
                if let Some(client) = clients.current() {
                    client.interrupt();
                    break;
                }
                tokio::task::yield_now().await;
            }
        });
        let _permits: Vec<_> = {
            let pool = h.services.pool.clone();
            (0..pool.size())
                .map(|_| pool.spawn(tokio::time::sleep(Duration::from_millis(50))))
                .collect()
        };

        let outcome = action.run(&mut doc, "lib.rs", "rust", "x", None).await;
        interrupter.await.unwrap();

        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(action.trail().current(), RequestState::Cancelled);
        assert_eq!(h.notifier.notices()[0].level, NoticeLevel::Info);
    }

    #[tokio::test]
    async fn comment_replaces_selection() {
        let reply = "```json\n{\"commentedCode\": \"// second\\nfn b() {}\"}\n```";
        let h = harness(config(), ScriptedResponse::text(reply), ApprovalResponse::Approve);
        let mut doc = TextDocument::new(SOURCE);
        doc.select_lines(2, 2);
        let mut action = CommentAction::new(h.services.clone());

        let outcome = action.run(&mut doc, "lib.rs", "rust").await;

        assert_eq!(
            outcome,
            Outcome::Applied {
                count: 1,
                conflicts: false
            }
        );
        assert_eq!(doc.text(), "fn a() {}\n// second\nfn b() {}\nfn c() {}\n");
        assert!(doc.selection().is_none());
    }

    #[tokio::test]
    async fn comment_without_selection_fails_fast() {
        let h = harness(config(), ScriptedResponse::text("x"), ApprovalResponse::Approve);
        let mut doc = TextDocument::new(SOURCE);

        let outcome = CommentAction::new(h.services.clone())
            .run(&mut doc, "lib.rs", "rust")
            .await;

        assert!(matches!(outcome, Outcome::Failed(ref n) if n.title == "Nothing selected"));
        assert_eq!(h.factory.created_count(), 0);
    }
}
