//! Ownership of the active LLM client.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use patchwise_core::providers::OpenAiFactory;
use patchwise_core::transport::TransportFactory;
use patchwise_core::{LlmClient, LlmConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;

/// Keeps one [`LlmClient`] for the current configuration and swaps it when
/// the configuration changes.
///
/// Lookups for an unchanged configuration only take a read lock. A change is
/// handled under a swap mutex and re-checked there, so concurrent callers
/// build at most one client per change. The previous client is closed before
/// the new one is published, and the published slot is never empty or
/// half-built while a client exists.
pub struct ClientManager {
    factory: Arc<dyn TransportFactory>,
    current: RwLock<Option<Arc<LlmClient>>>,
    swap: Mutex<()>,
}

impl std::fmt::Debug for ClientManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientManager")
            .field("current", &*self.current.read())
            .finish_non_exhaustive()
    }
}

impl Default for ClientManager {
    fn default() -> Self {
        Self::new(Arc::new(OpenAiFactory))
    }
}

impl ClientManager {
    #[must_use]
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            factory,
            current: RwLock::new(None),
            swap: Mutex::new(()),
        }
    }

    /// The client for `config`, creating it (and closing the previous one)
    /// when the configuration differs from the current client's.
    ///
    /// # Errors
    ///
    /// Returns the creation error, leaving the previous client in place.
    pub fn get_or_create(&self, config: &LlmConfig) -> patchwise_core::Result<Arc<LlmClient>> {
        if let Some(client) = self.matching(config) {
            return Ok(client);
        }

        let _swap = self.swap.lock();
        if let Some(client) = self.matching(config) {
            return Ok(client);
        }

        let client = Arc::new(LlmClient::with_factory(config.clone(), self.factory.as_ref())?);

        let mut current = self.current.write();
        if let Some(old) = current.take() {
            tracing::info!(
                old_endpoint = %old.config().endpoint,
                new_endpoint = %config.endpoint,
                model = %config.model,
                "LLM configuration changed, replacing client"
            );
            if let Err(e) = old.close() {
                tracing::warn!(error = %e, "failed to close previous LLM client");
            }
        }
        *current = Some(Arc::clone(&client));
        Ok(client)
    }

    fn matching(&self, config: &LlmConfig) -> Option<Arc<LlmClient>> {
        self.current
            .read()
            .as_ref()
            .filter(|client| client.config() == config)
            .cloned()
    }

    /// The current client, if one was created.
    #[must_use]
    pub fn current(&self) -> Option<Arc<LlmClient>> {
        self.current.read().clone()
    }

    /// Interrupt whatever the current client is doing.
    pub fn interrupt_current(&self) {
        if let Some(client) = self.current() {
            client.interrupt();
        }
    }

    /// Keep the current client in step with configuration `changes`.
    ///
    /// When the active profile changes, its client is built and the stale one
    /// closed right away instead of on the next request. When no usable
    /// profile remains, the current client is closed. Nothing is built until
    /// a client has been requested once. Ends when the store is dropped.
    pub fn follow(self: Arc<Self>, mut changes: watch::Receiver<Arc<Config>>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let config = Arc::clone(&changes.borrow_and_update());
                if self.current().is_none() {
                    continue;
                }
                match config.active_llm() {
                    Ok(llm) => {
                        if let Err(e) = self.get_or_create(&llm) {
                            tracing::warn!(error = %e, "failed to switch LLM client");
                        }
                    }
                    Err(e) => {
                        tracing::info!(error = %e, "no usable LLM configured, closing client");
                        if let Err(e) = self.shutdown() {
                            tracing::warn!(error = %e, "failed to close LLM client");
                        }
                    }
                }
            }
        })
    }

    /// Close and forget the current client.
    ///
    /// # Errors
    ///
    /// Propagates the client's close error.
    pub fn shutdown(&self) -> patchwise_core::Result<()> {
        let _swap = self.swap.lock();
        let old = self.current.write().take();
        old.map_or(Ok(()), |client| client.close())
    }
}
