use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::instrument;

/// Process-wide map from a string key to a reentrant-per-workflow lock.
/// Gates deploy/archival per service and per registry.
#[derive(Clone, Default)]
pub struct SemaphoreRegistry {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

pub struct Permit {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl Permit {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl SemaphoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deploy_key(service_id: &str) -> String {
        format!("deploy-service:{service_id}")
    }

    pub fn registry_key(registry_id: &str) -> String {
        format!("deploy-registry:{registry_id}")
    }

    async fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    #[instrument(skip(self))]
    pub async fn acquire(&self, key: &str) -> Permit {
        let lock = self.lock_for(key).await;
        let guard = lock.lock_owned().await;
        Permit { key: key.to_string(), _guard: guard }
    }

    /// Releases a permit by dropping it. Idempotent: calling this on an
    /// already-dropped permit is simply a no-op at the call site.
    #[instrument(skip(self, permit))]
    pub fn release(&self, permit: Permit) {
        drop(permit);
    }

    /// Holds the key for the duration of a cleanup closure, without needing
    /// a caller-held [`Permit`] already in scope.
    #[instrument(skip(self, f))]
    pub async fn lock<F, Fut, T>(&self, key: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let _permit = self.acquire(key).await;
        f().await
    }

    /// Drops every currently tracked lock. Used for system cleanup; safe to
    /// call even if some keys are held, since dropping the map entry does
    /// not affect guards already issued.
    #[instrument(skip(self))]
    pub async fn reset(&self) {
        self.locks.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_waits_for_first_release() {
        let registry = SemaphoreRegistry::new();
        let key = SemaphoreRegistry::deploy_key("srv_1");

        let first = registry.acquire(&key).await;
        let registry2 = registry.clone();
        let key2 = key.clone();
        let handle = tokio::spawn(async move {
            let _permit = registry2.acquire(&key2).await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        registry.release(first);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn reset_does_not_panic_with_outstanding_permits() {
        let registry = SemaphoreRegistry::new();
        let _permit = registry.acquire("k").await;
        registry.reset().await;
    }
}
