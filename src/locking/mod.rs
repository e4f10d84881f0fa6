//! Lock Registry (spec §4.3): short-lived named locks with an owner tag,
//! degrading open when the backing store is unreachable.
//!
//! **This is a UX throttle, not a correctness primitive.** The authoritative
//! consistency barrier lives in the Booking Engine's conditional `UPDATE`
//! (spec §4.7, §9) — `acquire` returning `true` on a backend failure cannot
//! violate first-webhook-wins because that invariant never depends on the
//! lock. Keep that in mind before "fixing" the degrade-open policy below.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

/// Contract for the Lock Registry (spec §4.3).
#[async_trait]
pub trait LockRegistry: Send + Sync {
    /// Set-if-absent with expiry. Returns `true` on success, `true` also
    /// when the backend is unreachable (degrade-open — see module docs),
    /// and `false` only when the resource is genuinely already held.
    async fn acquire(&self, resource: &str, ttl: Duration, owner_tag: &str) -> bool;

    /// Compare-and-delete: releases only if `owner_tag` currently holds the
    /// lock. A naive read-then-delete is acceptable here (spec §4.3) because
    /// the guarantee needed is "releaser was the owner at some point", not
    /// mutual exclusion with a concurrent `acquire`.
    async fn release_owned(&self, resource: &str, owner_tag: &str) -> bool;

    /// Unconditional delete.
    async fn force_release(&self, resource: &str);
}

/// Redis-backed implementation using `SET resource owner NX PX ttl`.
pub struct RedisLockRegistry {
    conn: ConnectionManager,
}

impl RedisLockRegistry {
    #[must_use]
    pub const fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn key(resource: &str) -> String {
        format!("lock:{resource}")
    }
}

#[async_trait]
impl LockRegistry for RedisLockRegistry {
    async fn acquire(&self, resource: &str, ttl: Duration, owner_tag: &str) -> bool {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<Option<String>> = redis::cmd("SET")
            .arg(Self::key(resource))
            .arg(owner_tag)
            .arg("NX")
            .arg("PX")
            .arg(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
            .query_async(&mut conn)
            .await;

        match result {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(error) => {
                tracing::warn!(%error, resource, "lock registry unreachable, degrading open");
                true
            }
        }
    }

    async fn release_owned(&self, resource: &str, owner_tag: &str) -> bool {
        let mut conn = self.conn.clone();
        let current: redis::RedisResult<Option<String>> = redis::cmd("GET")
            .arg(Self::key(resource))
            .query_async(&mut conn)
            .await;

        match current {
            Ok(Some(ref held_by)) if held_by == owner_tag => {
                let _: redis::RedisResult<()> = redis::cmd("DEL")
                    .arg(Self::key(resource))
                    .query_async(&mut conn)
                    .await;
                true
            }
            Ok(_) => false,
            Err(error) => {
                tracing::warn!(%error, resource, "lock registry unreachable on release");
                false
            }
        }
    }

    async fn force_release(&self, resource: &str) {
        let mut conn = self.conn.clone();
        let _: redis::RedisResult<()> = redis::cmd("DEL")
            .arg(Self::key(resource))
            .query_async(&mut conn)
            .await;
    }
}

/// An always-failing registry, used to test spec §8 property 7
/// ("degraded-lock safety") — every `acquire` degrades open, exactly as a
/// genuinely unreachable Redis would.
#[cfg(test)]
pub struct AlwaysDownLockRegistry;

#[cfg(test)]
#[async_trait]
impl LockRegistry for AlwaysDownLockRegistry {
    async fn acquire(&self, _resource: &str, _ttl: Duration, _owner_tag: &str) -> bool {
        true
    }

    async fn release_owned(&self, _resource: &str, _owner_tag: &str) -> bool {
        false
    }

    async fn force_release(&self, _resource: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn degraded_registry_always_grants_locks() {
        let registry = AlwaysDownLockRegistry;
        assert!(
            registry
                .acquire("tier:1:user:254700000000", Duration::from_secs(600), "254700000000")
                .await
        );
    }
}
