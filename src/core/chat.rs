//! Free-form streaming chat.

use std::sync::Arc;

use futures::StreamExt;
use patchwise_core::conversation::Conversation;

use super::clients::ClientManager;
use super::error::{Error, Result};
use super::pool::WorkerPool;
use crate::config::ConfigStore;

/// The assistant's answer to one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    /// Cut short by [`ChatSession::interrupt`]; `text` is what arrived.
    pub interrupted: bool,
}

/// A chat with the active LLM, recorded in a [`Conversation`].
#[derive(Debug)]
pub struct ChatSession {
    config: Arc<ConfigStore>,
    clients: Arc<ClientManager>,
    pool: WorkerPool,
    conversation: Conversation,
}

impl ChatSession {
    #[must_use]
    pub const fn new(
        config: Arc<ConfigStore>,
        clients: Arc<ClientManager>,
        pool: WorkerPool,
        conversation: Conversation,
    ) -> Self {
        Self {
            config,
            clients,
            pool,
            conversation,
        }
    }

    #[must_use]
    pub const fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub const fn conversation_mut(&mut self) -> &mut Conversation {
        &mut self.conversation
    }

    /// Send `prompt` and stream the answer into `on_chunk`, in order.
    ///
    /// An interrupted reply is not an error: the partial text is returned and
    /// recorded with the interrupted marker. The reply holds a worker pool slot
    /// until the stream ends, so it waits while the pool is full.
    ///
    /// # Errors
    ///
    /// Returns configuration errors before anything is sent, and transport
    /// errors from the stream. Text received before a transport error is kept
    /// in the conversation.
    pub async fn send<F>(&mut self, prompt: &str, mut on_chunk: F) -> Result<Reply>
    where
        F: FnMut(&str),
    {
        let llm = self.config.active_llm()?;
        let _slot = self
            .pool
            .acquire()
            .await
            .map_err(|e| Error::Task(e.to_string()))?;
        let client = self.clients.get_or_create(&llm)?;
        self.conversation.add_user_message(prompt);

        let mut stream = client.stream_completion(prompt, None);
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => {
                    on_chunk(&chunk);
                    text.push_str(&chunk);
                }
                Err(e) => {
                    drop(stream);
                    if !text.is_empty() {
                        self.conversation.add_assistant_message(text, true);
                    }
                    return Err(e.into());
                }
            }
        }

        let interrupted = client.is_interrupted();
        if interrupted {
            tracing::info!(received = text.len(), "reply interrupted");
        }
        self.conversation
            .add_assistant_message(text.clone(), interrupted);
        Ok(Reply { text, interrupted })
    }

    /// Stop the reply in flight.
    pub fn interrupt(&self) {
        self.clients.interrupt_current();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use patchwise_core::LlmConfig;
    use patchwise_core::mock::{MockFactory, ScriptedResponse};
    use patchwise_core::transport::Role;

    use super::*;
    use crate::config::{Config, LlmProfile};

    fn session(script: ScriptedResponse) -> ChatSession {
        session_in(script, WorkerPool::default())
    }

    fn session_in(script: ScriptedResponse, pool: WorkerPool) -> ChatSession {
        let config = Config {
            llms: vec![LlmProfile {
                name: "mock".to_string(),
                enabled: true,
                api_key_env: None,
                llm: LlmConfig::new("sk-test", "http://mock/v1", "gpt-test"),
            }],
            ..Config::default()
        };
        ChatSession::new(
            Arc::new(ConfigStore::new(config)),
            Arc::new(ClientManager::new(Arc::new(MockFactory::new(vec![script])))),
            pool,
            Conversation::new(),
        )
    }

    #[tokio::test]
    async fn reply_is_streamed_and_recorded() {
        let mut chat = session(ScriptedResponse::chunks(["Hel", "lo"]));
        let mut seen = Vec::new();

        let reply = chat.send("hi", |c| seen.push(c.to_string())).await.unwrap();

        assert_eq!(seen, vec!["Hel", "lo"]);
        assert_eq!(reply.text, "Hello");
        assert!(!reply.interrupted);
        let turns = chat.conversation().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].content, "Hello");
    }

    #[tokio::test]
    async fn interrupt_keeps_partial_reply() {
        let mut chat = session(ScriptedResponse::chunks(["1", "2", "3", "4", "5"]));
        let clients = Arc::clone(&chat.clients);
        let mut seen = Vec::new();

        let reply = chat
            .send("count", |c| {
                seen.push(c.to_string());
                if seen.len() == 2 {
                    clients.interrupt_current();
                }
            })
            .await
            .unwrap();

        assert_eq!(seen, vec!["1", "2"]);
        assert_eq!(reply.text, "12");
        assert!(reply.interrupted);
        assert!(chat.conversation().last_reply().unwrap().interrupted);
    }

    #[tokio::test]
    async fn next_message_starts_uninterrupted() {
        let mut chat = session(ScriptedResponse::chunks(["a"]));
        chat.interrupt();
        chat.send("one", |_| {}).await.unwrap();
        chat.interrupt();

        let reply = chat.send("two", |_| {}).await.unwrap();
        assert_eq!(reply.text, "a");
        assert!(!reply.interrupted);
    }

    #[tokio::test]
    async fn transport_error_keeps_received_text() {
        let mut chat = session(ScriptedResponse::Failing {
            before: vec!["par".to_string()],
            message: "reset".to_string(),
        });

        assert!(chat.send("q", |_| {}).await.is_err());
        let last = chat.conversation().last_reply().unwrap();
        assert_eq!(last.content, "par");
        assert!(last.interrupted);
    }

    #[tokio::test(start_paused = true)]
    async fn reply_waits_for_a_free_slot() {
        let pool = WorkerPool::default();
        let mut busy = Vec::new();
        for _ in 0..pool.size() {
            busy.push(pool.acquire().await.unwrap());
        }
        let mut chat = session_in(ScriptedResponse::chunks(["ok"]), pool.clone());

        let blocked = tokio::time::timeout(Duration::from_secs(5), chat.send("hi", |_| {})).await;
        assert!(blocked.is_err());
        assert!(chat.conversation().is_empty());

        busy.pop();
        let reply = chat.send("hi", |_| {}).await.unwrap();
        assert_eq!(reply.text, "ok");
        assert_eq!(pool.available(), 1);
    }
}
