//! Redis-backed lock manager (optional).
//!
//! `SET key token NX PX ttl` to acquire; a Lua compare-and-delete to release,
//! so a holder whose lock expired and was re-acquired elsewhere cannot delete
//! the new owner's key.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Script;
use std::time::Duration;

use super::{LockManager, LockToken};
use crate::error::LedgerResult;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct RedisLockManager {
    conn: MultiplexedConnection,
    release: Script,
}

impl std::fmt::Debug for RedisLockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLockManager").finish_non_exhaustive()
    }
}

impl RedisLockManager {
    pub async fn connect(redis_url: impl AsRef<str>) -> LedgerResult<Self> {
        let client = redis::Client::open(redis_url.as_ref())?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            release: Script::new(RELEASE_SCRIPT),
        })
    }
}

#[async_trait]
impl LockManager for RedisLockManager {
    async fn acquire(&self, key: &str, ttl: Duration) -> LedgerResult<Option<LockToken>> {
        let token = LockToken::generate();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        Ok(reply.map(|_| token))
    }

    async fn release(&self, key: &str, token: &LockToken) -> LedgerResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release
            .key(key)
            .arg(token.as_str())
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }
}
