//! Bound on in-flight collaborator calls

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Caps concurrent calls to one collaborator; one permit means strictly serial
#[derive(Debug, Clone)]
pub struct CallLimiter {
    semaphore: Arc<Semaphore>,
    permits: usize,
}

impl CallLimiter {
    pub fn new(permits: usize) -> Self {
        let permits = permits.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            permits,
        }
    }

    pub fn serialized() -> Self {
        Self::new(1)
    }

    pub fn permits(&self) -> usize {
        self.permits
    }

    /// Await `call` while holding a permit
    pub async fn run<F, T>(&self, call: F) -> T
    where
        F: Future<Output = T>,
    {
        // The semaphore is never closed, so acquire only fails if it were
        let _permit = self.semaphore.acquire().await.ok();
        call.await
    }
}
