use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{LockManager, LockToken};
use crate::error::{LedgerError, LedgerResult};

#[derive(Debug)]
struct Entry {
    token: LockToken,
    expires_at: Instant,
}

/// In-process lock manager.
///
/// Same semantics as the Redis backend (set-if-absent with expiry,
/// compare-and-delete release) for tests, dev and single-node deployments.
#[derive(Debug, Default)]
pub struct InMemoryLockManager {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unexpired locks
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map(|entries| entries.values().filter(|e| e.expires_at > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LockManager for InMemoryLockManager {
    async fn acquire(&self, key: &str, ttl: Duration) -> LedgerResult<Option<LockToken>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| LedgerError::internal("lock table poisoned"))?;

        let now = Instant::now();
        if let Some(existing) = entries.get(key) {
            if existing.expires_at > now {
                return Ok(None);
            }
        }

        let token = LockToken::generate();
        entries.insert(
            key.to_string(),
            Entry {
                token: token.clone(),
                expires_at: now + ttl,
            },
        );
        Ok(Some(token))
    }

    async fn release(&self, key: &str, token: &LockToken) -> LedgerResult<bool> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| LedgerError::internal("lock table poisoned"))?;

        match entries.get(key) {
            Some(existing) if existing.token == *token => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let manager = InMemoryLockManager::new();
        let token = manager
            .acquire("k", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(token.is_some());
        assert!(manager
            .acquire("k", Duration::from_secs(5))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_release_requires_matching_token() {
        let manager = InMemoryLockManager::new();
        let token = manager
            .acquire("k", Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();

        let stranger = LockToken::generate();
        assert!(!manager.release("k", &stranger).await.unwrap());
        assert!(manager.release("k", &token).await.unwrap());
        assert!(!manager.release("k", &token).await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_owner_cannot_release_after_expiry() {
        let manager = InMemoryLockManager::new();
        let stale = manager
            .acquire("k", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        let fresh = manager
            .acquire("k", Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();

        // The first holder's token no longer matches
        assert!(!manager.release("k", &stale).await.unwrap());
        assert!(manager.release("k", &fresh).await.unwrap());
    }
}
