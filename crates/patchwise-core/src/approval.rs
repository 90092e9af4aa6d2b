//! User approval for document mutations.
//!
//! Every AI-suggested edit goes through [`ApprovalClient::request`]. The
//! [`ApprovalActor`] forwards requests to whichever interface registered
//! itself and denies them when none is listening. There is no cache and no
//! preset: each request reaches the user or is denied.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// What the user is asked to approve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalContext {
    /// Apply a batch of line-based changes.
    ApplyChanges {
        target: String,
        diff: String,
        change_count: usize,
        conflicts: bool,
    },
    /// Replace a selection with its commented version.
    ApplyComment { target: String, diff: String },
}

impl ApprovalContext {
    #[must_use]
    pub fn diff(&self) -> &str {
        match self {
            Self::ApplyChanges { diff, .. } | Self::ApplyComment { diff, .. } => diff,
        }
    }

    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::ApplyChanges { target, .. } | Self::ApplyComment { target, .. } => target,
        }
    }
}

/// The user's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalResponse {
    Approve,
    Reject,
}

/// Message sent to [`ApprovalActor`].
#[derive(Debug)]
pub enum ApprovalMessage {
    Request {
        context: ApprovalContext,
        response_tx: oneshot::Sender<ApprovalResponse>,
    },
    /// Answer a request shown on the interface.
    Respond {
        request_id: Uuid,
        response: ApprovalResponse,
    },
    RegisterInterface {
        interface_tx: mpsc::UnboundedSender<InterfaceMessage>,
    },
    /// Detach the interface; pending requests are rejected.
    UnregisterInterface,
}

/// Message sent to the approval interface.
#[derive(Debug, Clone)]
pub enum InterfaceMessage {
    ShowApproval {
        request_id: Uuid,
        context: ApprovalContext,
    },
    /// The request was withdrawn; hide its prompt.
    Withdraw { request_id: Uuid },
}

/// Approval system errors.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("approval channel closed")]
    ChannelClosed,
}

/// Cheap handle for requesting approval.
#[derive(Debug, Clone)]
pub struct ApprovalClient {
    tx: mpsc::UnboundedSender<ApprovalMessage>,
}

impl ApprovalClient {
    #[must_use]
    pub const fn new(tx: mpsc::UnboundedSender<ApprovalMessage>) -> Self {
        Self { tx }
    }

    /// Ask the user and wait for the answer.
    ///
    /// Returns `true` only on explicit approval.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::ChannelClosed`] if the actor is gone.
    pub async fn request(&self, context: ApprovalContext) -> Result<bool, ApprovalError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(ApprovalMessage::Request {
                context,
                response_tx,
            })
            .map_err(|_| ApprovalError::ChannelClosed)?;

        let response = response_rx
            .await
            .map_err(|_| ApprovalError::ChannelClosed)?;
        Ok(response == ApprovalResponse::Approve)
    }

    /// Answer a request the interface was shown.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::ChannelClosed`] if the actor is gone.
    pub fn respond(
        &self,
        request_id: Uuid,
        response: ApprovalResponse,
    ) -> Result<(), ApprovalError> {
        self.send(ApprovalMessage::Respond {
            request_id,
            response,
        })
    }

    /// Route future requests to `interface_tx`.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::ChannelClosed`] if the actor is gone.
    pub fn register_interface(
        &self,
        interface_tx: mpsc::UnboundedSender<InterfaceMessage>,
    ) -> Result<(), ApprovalError> {
        self.send(ApprovalMessage::RegisterInterface { interface_tx })
    }

    /// # Errors
    ///
    /// Returns [`ApprovalError::ChannelClosed`] if the actor is gone.
    pub fn unregister_interface(&self) -> Result<(), ApprovalError> {
        self.send(ApprovalMessage::UnregisterInterface)
    }

    fn send(&self, message: ApprovalMessage) -> Result<(), ApprovalError> {
        self.tx
            .send(message)
            .map_err(|_| ApprovalError::ChannelClosed)
    }
}

/// Actor routing approval requests to the registered interface.
pub struct ApprovalActor {
    inbox: mpsc::UnboundedReceiver<ApprovalMessage>,
    interface_tx: Option<mpsc::UnboundedSender<InterfaceMessage>>,
    pending: HashMap<Uuid, oneshot::Sender<ApprovalResponse>>,
}

impl ApprovalActor {
    /// Create the actor and a client bound to it.
    #[must_use]
    pub fn new() -> (Self, ApprovalClient) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                inbox: rx,
                interface_tx: None,
                pending: HashMap::new(),
            },
            ApprovalClient::new(tx),
        )
    }

    /// Run until every client is dropped.
    pub async fn run(mut self) {
        while let Some(msg) = self.inbox.recv().await {
            self.handle_message(msg);
        }
        self.reject_pending();
    }

    /// Handle a single message.
    pub fn handle_message(&mut self, msg: ApprovalMessage) {
        match msg {
            ApprovalMessage::Request {
                context,
                response_tx,
            } => {
                let Some(interface_tx) = &self.interface_tx else {
                    tracing::warn!(document = context.target(), "no approval interface, rejecting");
                    let _ = response_tx.send(ApprovalResponse::Reject);
                    return;
                };

                let request_id = Uuid::new_v4();
                if interface_tx
                    .send(InterfaceMessage::ShowApproval {
                        request_id,
                        context,
                    })
                    .is_err()
                {
                    tracing::warn!("approval interface went away, rejecting");
                    self.interface_tx = None;
                    let _ = response_tx.send(ApprovalResponse::Reject);
                    return;
                }
                self.pending.insert(request_id, response_tx);
            }

            ApprovalMessage::Respond {
                request_id,
                response,
            } => {
                if let Some(tx) = self.pending.remove(&request_id) {
                    tracing::debug!(%request_id, ?response, "approval answered");
                    let _ = tx.send(response);
                } else {
                    tracing::debug!(%request_id, "answer for unknown approval request");
                }
            }

            ApprovalMessage::RegisterInterface { interface_tx } => {
                self.interface_tx = Some(interface_tx);
            }

            ApprovalMessage::UnregisterInterface => {
                self.interface_tx = None;
                self.reject_pending();
            }
        }
    }

    fn reject_pending(&mut self) {
        for (request_id, tx) in self.pending.drain() {
            if let Some(interface_tx) = &self.interface_tx {
                let _ = interface_tx.send(InterfaceMessage::Withdraw { request_id });
            }
            let _ = tx.send(ApprovalResponse::Reject);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn changes_context() -> ApprovalContext {
        ApprovalContext::ApplyChanges {
            target: "src/lib.rs".to_string(),
            diff: "-a\n+b\n".to_string(),
            change_count: 1,
            conflicts: false,
        }
    }

    #[tokio::test]
    async fn client_sends_request() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = ApprovalClient::new(tx);

        let handle = tokio::spawn(async move {
            if let Some(ApprovalMessage::Request { response_tx, .. }) = rx.recv().await {
                response_tx.send(ApprovalResponse::Approve).unwrap();
            }
        });

        let approved = client.request(changes_context()).await.unwrap();
        handle.await.unwrap();
        assert!(approved);
    }

    #[tokio::test]
    async fn client_returns_false_on_reject() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = ApprovalClient::new(tx);

        let handle = tokio::spawn(async move {
            if let Some(ApprovalMessage::Request { response_tx, .. }) = rx.recv().await {
                response_tx.send(ApprovalResponse::Reject).unwrap();
            }
        });

        assert!(!client.request(changes_context()).await.unwrap());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn client_errors_on_closed_channel() {
        let (tx, rx) = mpsc::unbounded_channel::<ApprovalMessage>();
        let client = ApprovalClient::new(tx);
        drop(rx);

        assert!(matches!(
            client.request(changes_context()).await,
            Err(ApprovalError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn actor_rejects_without_interface() {
        let (actor, client) = ApprovalActor::new();
        tokio::spawn(actor.run());

        assert!(!client.request(changes_context()).await.unwrap());
    }

    #[tokio::test]
    async fn actor_forwards_to_interface_and_relays_answer() {
        let (actor, client) = ApprovalActor::new();
        tokio::spawn(actor.run());

        let (interface_tx, mut interface_rx) = mpsc::unbounded_channel();
        client.register_interface(interface_tx).unwrap();

        let request = tokio::spawn({
            let client = client.clone();
            async move { client.request(changes_context()).await }
        });

        let Some(InterfaceMessage::ShowApproval {
            request_id,
            context,
        }) = interface_rx.recv().await
        else {
            panic!("expected an approval prompt");
        };
        assert_eq!(context, changes_context());

        client
            .respond(request_id, ApprovalResponse::Approve)
            .unwrap();
        assert!(request.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn every_request_is_shown() {
        let (actor, client) = ApprovalActor::new();
        tokio::spawn(actor.run());

        let (interface_tx, mut interface_rx) = mpsc::unbounded_channel();
        client.register_interface(interface_tx).unwrap();

        for _ in 0..2 {
            let request = tokio::spawn({
                let client = client.clone();
                async move { client.request(changes_context()).await }
            });
            let msg = tokio::time::timeout(Duration::from_secs(1), interface_rx.recv())
                .await
                .unwrap();
            let Some(InterfaceMessage::ShowApproval { request_id, .. }) = msg else {
                panic!("expected an approval prompt");
            };
            client
                .respond(request_id, ApprovalResponse::Approve)
                .unwrap();
            assert!(request.await.unwrap().unwrap());
        }
    }

    #[tokio::test]
    async fn unregister_rejects_pending() {
        let (actor, client) = ApprovalActor::new();
        tokio::spawn(actor.run());

        let (interface_tx, mut interface_rx) = mpsc::unbounded_channel();
        client.register_interface(interface_tx).unwrap();

        let request = tokio::spawn({
            let client = client.clone();
            async move { client.request(changes_context()).await }
        });
        assert!(matches!(
            interface_rx.recv().await,
            Some(InterfaceMessage::ShowApproval { .. })
        ));

        client.unregister_interface().unwrap();
        assert!(!request.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn dropped_interface_rejects() {
        let (actor, client) = ApprovalActor::new();
        tokio::spawn(actor.run());

        let (interface_tx, interface_rx) = mpsc::unbounded_channel();
        client.register_interface(interface_tx).unwrap();
        drop(interface_rx);

        assert!(!client.request(changes_context()).await.unwrap());
    }
}
