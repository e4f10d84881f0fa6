//! Session Store (spec §4.2): a key→value store of `(state, data)` per
//! normalized phone, with sliding TTL and graceful degradation to an
//! in-process fallback when the backing Redis store is unreachable.
//!
//! Grounded in the teacher's `auth::stores::session_redis` pattern (a
//! `redis::aio::ConnectionManager` wrapped behind a small trait) combined
//! with the "last-resort availability" fallback the teacher documents for
//! its session-store-unreachable paths.

use crate::domain::{ConvState, Session, SessionDataPatch};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Contract for the Session Store (spec §4.2). Never returns an error to
/// the caller — a backend failure degrades to the fallback map, which in
/// turn degrades to "no session" (an idle session) in the worst case.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the current session, or an idle one if none exists or the
    /// store is unreachable.
    async fn get(&self, phone: &str) -> Session;

    /// Read-modify-write: sets the new state, shallow-merges `patch` into
    /// the existing data, and resets the TTL.
    async fn update(&self, phone: &str, state: ConvState, patch: SessionDataPatch) -> Session;

    /// Writes an idle session (not a delete, so TTL-based cleanup ordering
    /// is preserved — spec §4.2).
    async fn clear(&self, phone: &str);
}

struct FallbackEntry {
    session: Session,
    expires_at: Instant,
}

/// Process-local, mutex-protected fallback map. Marked explicitly as a
/// last-resort mechanism: it does not survive process restarts and has no
/// cross-process affinity, so operators should treat periods where this is
/// in active use as degraded (spec §4.2, §9).
#[derive(Default)]
struct FallbackMap {
    entries: Mutex<HashMap<String, FallbackEntry>>,
}

impl FallbackMap {
    fn sweep(map: &mut HashMap<String, FallbackEntry>) {
        let now = Instant::now();
        map.retain(|_, entry| entry.expires_at > now);
    }

    async fn get(&self, phone: &str) -> Option<Session> {
        let mut map = self.entries.lock().await;
        Self::sweep(&mut map);
        map.get(phone).map(|e| e.session.clone())
    }

    async fn put(&self, phone: &str, session: Session, ttl: Duration) {
        let mut map = self.entries.lock().await;
        Self::sweep(&mut map);
        map.insert(
            phone.to_string(),
            FallbackEntry {
                session,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

/// Redis-backed session store with in-process fallback.
pub struct RedisSessionStore {
    conn: ConnectionManager,
    ttl: Duration,
    fallback: Arc<FallbackMap>,
}

impl RedisSessionStore {
    #[must_use]
    pub fn new(conn: ConnectionManager, ttl: Duration) -> Self {
        Self {
            conn,
            ttl,
            fallback: Arc::new(FallbackMap::default()),
        }
    }

    fn key(phone: &str) -> String {
        format!("session:{phone}")
    }

    async fn redis_get(&self, phone: &str) -> Option<Session> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(Self::key(phone))
            .query_async(&mut conn)
            .await
            .ok()?;
        raw.and_then(|s| serde_json::from_str(&s).ok())
    }

    async fn redis_put(&self, phone: &str, session: &Session) -> Option<()> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(session).ok()?;
        redis::cmd("SET")
            .arg(Self::key(phone))
            .arg(raw)
            .arg("EX")
            .arg(self.ttl.as_secs())
            .query_async::<_, ()>(&mut conn)
            .await
            .ok()
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, phone: &str) -> Session {
        if let Some(session) = self.redis_get(phone).await {
            return session;
        }
        tracing::warn!(phone = %crate::error::mask_phone(phone), "session store unreachable, falling back to in-process map");
        self.fallback
            .get(phone)
            .await
            .unwrap_or_else(Session::idle)
    }

    async fn update(&self, phone: &str, state: ConvState, patch: SessionDataPatch) -> Session {
        let mut session = self.get(phone).await;
        session.state = state;
        session.data.merge(patch);

        if self.redis_put(phone, &session).await.is_none() {
            tracing::warn!(phone = %crate::error::mask_phone(phone), "session store unreachable, writing to in-process fallback");
            self.fallback.put(phone, session.clone(), self.ttl).await;
        }
        session
    }

    async fn clear(&self, phone: &str) {
        let idle = Session::idle();
        if self.redis_put(phone, &idle).await.is_none() {
            self.fallback.put(phone, idle, self.ttl).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SessionDataPatch;

    /// A pure in-memory store used by unit tests that don't need Redis —
    /// exercises the same merge/TTL-reset contract `RedisSessionStore`
    /// promises, without a network dependency.
    pub struct InMemorySessionStore {
        fallback: FallbackMap,
        ttl: Duration,
    }

    impl InMemorySessionStore {
        pub fn new(ttl: Duration) -> Self {
            Self {
                fallback: FallbackMap::default(),
                ttl,
            }
        }
    }

    #[async_trait]
    impl SessionStore for InMemorySessionStore {
        async fn get(&self, phone: &str) -> Session {
            self.fallback.get(phone).await.unwrap_or_else(Session::idle)
        }

        async fn update(&self, phone: &str, state: ConvState, patch: SessionDataPatch) -> Session {
            let mut session = self.get(phone).await;
            session.state = state;
            session.data.merge(patch);
            self.fallback.put(phone, session.clone(), self.ttl).await;
            session
        }

        async fn clear(&self, phone: &str) {
            self.fallback.put(phone, Session::idle(), self.ttl).await;
        }
    }

    #[tokio::test]
    async fn get_on_unknown_phone_is_idle() {
        let store = InMemorySessionStore::new(Duration::from_secs(600));
        let session = store.get("254700000000").await;
        assert_eq!(session.state, ConvState::Idle);
    }

    #[tokio::test]
    async fn update_merges_and_get_reflects_it() {
        let store = InMemorySessionStore::new(Duration::from_secs(600));
        store
            .update(
                "254700000000",
                ConvState::SelectingTier,
                SessionDataPatch::default().quantity(3),
            )
            .await;
        let session = store.get("254700000000").await;
        assert_eq!(session.state, ConvState::SelectingTier);
        assert_eq!(session.data.quantity, Some(3));
    }

    #[tokio::test]
    async fn clear_resets_to_idle_without_deleting() {
        let store = InMemorySessionStore::new(Duration::from_secs(600));
        store
            .update(
                "254700000000",
                ConvState::SelectingTier,
                SessionDataPatch::default().quantity(3),
            )
            .await;
        store.clear("254700000000").await;
        let session = store.get("254700000000").await;
        assert_eq!(session.state, ConvState::Idle);
        assert_eq!(session.data.quantity, None);
    }
}
