//! Bounded pool for LLM calls.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

/// Upper bound on concurrent outbound LLM operations.
pub const MAX_CONCURRENT_LLM_CALLS: usize = 4;

/// Runs futures on the runtime with at most `size` in flight.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(MAX_CONCURRENT_LLM_CALLS)
    }
}

impl WorkerPool {
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Spawn `fut`; it starts once a slot is free.
    pub fn spawn<F, T>(&self, fut: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            // The semaphore is never closed, so this always holds a permit.
            let _permit = permits.acquire_owned().await;
            fut.await
        })
    }

    /// Take a slot for work the caller drives itself, such as a stream.
    /// The slot is held until the permit is dropped.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        Arc::clone(&self.permits).acquire_owned().await
    }

    /// Slots not currently in use.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }
}
