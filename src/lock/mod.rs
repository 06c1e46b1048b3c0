//! Distributed lock manager
//!
//! Non-blocking, non-reentrant mutual exclusion over string keys. A lock is a
//! key holding a random token with an expiry; release deletes the key only
//! while it still holds the caller's token.
//!
//! Callers needing several keys go through [`acquire_all`], which sorts and
//! de-duplicates the key set so that every caller takes overlapping keys in
//! the same order, and gives back everything it took if any single key is
//! unavailable.

mod memory;
#[cfg(feature = "redis")]
mod redis_lock;

pub use memory::InMemoryLockManager;
#[cfg(feature = "redis")]
pub use redis_lock::RedisLockManager;

use async_trait::async_trait;
use rand::RngCore;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};

/// Proof of ownership of one lock key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// 128 random bits, hex encoded
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lock backend
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Set `key` to a fresh token if absent. `Ok(None)` when someone else
    /// holds it; a single failed attempt is final.
    async fn acquire(&self, key: &str, ttl: Duration) -> LedgerResult<Option<LockToken>>;

    /// Delete `key` iff it still holds `token`. Returns whether it did.
    async fn release(&self, key: &str, token: &LockToken) -> LedgerResult<bool>;
}

#[async_trait]
impl<L> LockManager for Arc<L>
where
    L: LockManager + ?Sized,
{
    async fn acquire(&self, key: &str, ttl: Duration) -> LedgerResult<Option<LockToken>> {
        (**self).acquire(key, ttl).await
    }

    async fn release(&self, key: &str, token: &LockToken) -> LedgerResult<bool> {
        (**self).release(key, token).await
    }
}

/// Builds lock keys under a common namespace
#[derive(Debug, Clone)]
pub struct LockKeys {
    prefix: String,
}

impl LockKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Key guarding one balance row
    pub fn balance(&self, account_id: Uuid, asset_symbol: &str) -> String {
        format!("{}:balance:{}:{}", self.prefix, account_id, asset_symbol)
    }

    /// Key guarding a withdrawal order's state
    pub fn withdrawal(&self, order_id: Uuid) -> String {
        format!("{}:withdrawal:{}", self.prefix, order_id)
    }

    /// Key guarding a deposit order's processing
    pub fn deposit(&self, order_id: Uuid) -> String {
        format!("{}:deposit:{}", self.prefix, order_id)
    }
}

/// Locks taken by one multi-key acquisition.
///
/// Must be handed back with [`HeldLocks::release`] on every path once the
/// unit of work has committed or failed.
#[must_use = "held locks must be released"]
#[derive(Debug)]
pub struct HeldLocks {
    held: Vec<(String, LockToken)>,
}

impl HeldLocks {
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.held.iter().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Release every lock, in reverse acquisition order.
    ///
    /// Failures are logged, not returned; an unreleased key expires with its TTL.
    pub async fn release(self, manager: &dyn LockManager) {
        release_held(manager, self.held).await;
    }
}

async fn release_held(manager: &dyn LockManager, held: Vec<(String, LockToken)>) {
    for (key, token) in held.into_iter().rev() {
        match manager.release(&key, &token).await {
            Ok(true) => tracing::debug!(key = %key, "lock released"),
            Ok(false) => tracing::warn!(
                key = %key,
                "lock expired or was taken over before release"
            ),
            Err(e) => tracing::warn!(key = %key, error = %e, "lock release failed"),
        }
    }
}

/// Acquire every key in canonical (sorted, de-duplicated) order.
///
/// If any key is unavailable, the keys already taken in this attempt are
/// released before returning `LedgerError::LockUnavailable`.
pub async fn acquire_all<I>(
    manager: &dyn LockManager,
    keys: I,
    ttl: Duration,
) -> LedgerResult<HeldLocks>
where
    I: IntoIterator<Item = String>,
{
    let mut keys: Vec<String> = keys.into_iter().collect();
    keys.sort();
    keys.dedup();

    let mut held = Vec::with_capacity(keys.len());
    for key in keys {
        match manager.acquire(&key, ttl).await {
            Ok(Some(token)) => {
                tracing::debug!(key = %key, "lock acquired");
                held.push((key, token));
            }
            Ok(None) => {
                tracing::debug!(key = %key, "lock busy, abandoning acquisition");
                release_held(manager, held).await;
                return Err(LedgerError::LockUnavailable { key });
            }
            Err(e) => {
                release_held(manager, held).await;
                return Err(e);
            }
        }
    }

    Ok(HeldLocks { held })
}
