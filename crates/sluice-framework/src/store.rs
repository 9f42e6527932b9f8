//! Transient session state shared by a chain of interactions.
//!
//! A session is created for the first interaction of a conversation and
//! then reached by its follow-ups through lineage links
//! (`interaction id → correlation id`). Sessions expire after a TTL: an
//! access that finds an expired session evicts it, and a periodic sweep
//! removes the ones nobody touches again.
//!
//! # Locking
//!
//! The session map is behind a readers-writer lock; each session's data is
//! behind its own mutex, so merges into different sessions never contend
//! and a reader always sees a merge either fully applied or not at all.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use sluice_core::{InteractionId, RouterError, UserId};

use crate::error::SessionError;

/// Default session lifetime.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(15 * 60);

/// Identifies a context session: the originating user plus a counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of a session returned to readers.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextSession {
    pub correlation_id: CorrelationId,
    pub data: HashMap<String, Value>,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl ContextSession {
    /// Reads one value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

struct SessionEntry {
    data: HashMap<String, Value>,
    created_at: Instant,
    expires_at: Instant,
    /// Interactions whose lineage resolves to this session.
    links: Vec<InteractionId>,
}

impl SessionEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Default)]
struct StoreInner {
    sessions: HashMap<CorrelationId, Arc<Mutex<SessionEntry>>>,
    lineage: HashMap<InteractionId, CorrelationId>,
}

impl StoreInner {
    /// Removes a session and every lineage link into it.
    fn evict(&mut self, id: &CorrelationId) -> bool {
        let Some(entry) = self.sessions.remove(id) else {
            return false;
        };
        for link in entry.lock().links.drain(..) {
            self.lineage.remove(&link);
        }
        true
    }
}

/// Owns every context session.
pub struct ContextStore {
    inner: RwLock<StoreInner>,
    default_ttl: Duration,
    counter: AtomicU64,
}

impl ContextStore {
    /// Creates a store whose sessions live for `default_ttl` unless
    /// overridden.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            default_ttl,
            counter: AtomicU64::new(0),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Number of sessions currently held, expired or not.
    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocates an empty session with the default TTL.
    pub fn create_session(&self, origin_user: &UserId) -> CorrelationId {
        self.create_session_with_ttl(origin_user, self.default_ttl)
    }

    /// Allocates an empty session that expires after `ttl`.
    pub fn create_session_with_ttl(&self, origin_user: &UserId, ttl: Duration) -> CorrelationId {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let id = CorrelationId(format!("{origin_user}-{seq}"));
        let now = Instant::now();
        let entry = SessionEntry {
            data: HashMap::new(),
            created_at: now,
            expires_at: now + ttl,
            links: Vec::new(),
        };
        self.inner
            .write()
            .sessions
            .insert(id.clone(), Arc::new(Mutex::new(entry)));
        debug!(correlation_id = %id, ttl = ?ttl, "Created context session");
        id
    }

    /// Returns a live session, evicting it if it has expired.
    pub fn get(&self, id: &CorrelationId) -> Option<ContextSession> {
        let entry = self.inner.read().sessions.get(id).cloned()?;
        let guard = entry.lock();
        if guard.is_expired(Instant::now()) {
            drop(guard);
            self.evict_expired(id);
            return None;
        }
        Some(ContextSession {
            correlation_id: id.clone(),
            data: guard.data.clone(),
            created_at: guard.created_at,
            expires_at: guard.expires_at,
        })
    }

    /// Records that `interaction` belongs to session `id`.
    pub fn link_child(
        &self,
        interaction: &InteractionId,
        id: &CorrelationId,
    ) -> Result<(), SessionError> {
        let mut inner = self.inner.write();
        let entry = inner
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let mut guard = entry.lock();
        if guard.is_expired(Instant::now()) {
            drop(guard);
            inner.evict(id);
            return Err(SessionError::NotFound(id.to_string()));
        }
        if let Some(previous) = inner.lineage.insert(interaction.clone(), id.clone())
            && previous != *id
        {
            // The old session must not take this link with it when evicted.
            if let Some(old) = inner.sessions.get(&previous) {
                old.lock().links.retain(|link| link != interaction);
            }
            trace!(
                interaction_id = %interaction,
                from = %previous,
                to = %id,
                "Relinked interaction to a new session"
            );
        }
        if !guard.links.contains(interaction) {
            guard.links.push(interaction.clone());
        }
        Ok(())
    }

    /// Follows the lineage link of `interaction` to a live session.
    ///
    /// A link into a session that no longer exists is store corruption:
    /// eviction always removes the links with the session.
    pub fn resolve_lineage(
        &self,
        interaction: &InteractionId,
    ) -> Result<Option<CorrelationId>, RouterError> {
        let (id, entry) = {
            let inner = self.inner.read();
            let Some(id) = inner.lineage.get(interaction).cloned() else {
                return Ok(None);
            };
            let Some(entry) = inner.sessions.get(&id).cloned() else {
                error!(
                    interaction_id = %interaction,
                    correlation_id = %id,
                    "Lineage link points at a missing session"
                );
                return Err(RouterError::StoreCorrupted(format!(
                    "interaction '{interaction}' is linked to missing session '{id}'"
                )));
            };
            (id, entry)
        };
        let expired = entry.lock().is_expired(Instant::now());
        if expired {
            self.evict_expired(&id);
            return Ok(None);
        }
        Ok(Some(id))
    }

    /// Shallow-merges `partial` into the session, last writer wins per key.
    pub fn merge<I, K>(&self, id: &CorrelationId, partial: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let entry = self
            .inner
            .read()
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let mut guard = entry.lock();
        if guard.is_expired(Instant::now()) {
            drop(guard);
            self.evict_expired(id);
            return Err(SessionError::NotFound(id.to_string()));
        }
        guard
            .data
            .extend(partial.into_iter().map(|(k, v)| (k.into(), v)));
        Ok(())
    }

    /// Deletes a session and its lineage links.
    pub fn clear(&self, id: &CorrelationId) -> bool {
        let removed = self.inner.write().evict(id);
        if removed {
            debug!(correlation_id = %id, "Cleared context session");
        }
        removed
    }

    /// Evicts every expired session. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.write();
        let expired: Vec<CorrelationId> = inner
            .sessions
            .iter()
            .filter(|(_, entry)| entry.lock().is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            inner.evict(id);
        }
        if !expired.is_empty() {
            debug!(evicted = expired.len(), "Swept expired context sessions");
        }
        expired.len()
    }

    /// Runs [`sweep`](Self::sweep) every `interval` until `token` is
    /// cancelled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        store.sweep();
                    }
                }
            }
            trace!("Session sweeper stopped");
        })
    }

    fn evict_expired(&self, id: &CorrelationId) {
        let mut inner = self.inner.write();
        // Re-check under the write lock; another writer may have replaced it.
        let still_expired = inner
            .sessions
            .get(id)
            .is_some_and(|entry| entry.lock().is_expired(Instant::now()));
        if still_expired {
            inner.evict(id);
            trace!(correlation_id = %id, "Evicted expired context session");
        }
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}

#[cfg(any(test, feature = "test-util"))]
impl ContextStore {
    /// Links `interaction` to a session id that does not exist.
    #[doc(hidden)]
    pub fn link_dangling(&self, interaction: &InteractionId, id: &str) {
        self.inner
            .write()
            .lineage
            .insert(interaction.clone(), CorrelationId(id.to_string()));
    }
}

impl fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ContextStore")
            .field("sessions", &inner.sessions.len())
            .field("links", &inner.lineage.len())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn user() -> UserId {
        UserId::from("u1")
    }

    #[tokio::test(start_paused = true)]
    async fn session_expires_on_the_access_that_crosses_ttl() {
        let store = ContextStore::default();
        let id = store.create_session_with_ttl(&user(), Duration::from_millis(100));

        tokio::time::advance(Duration::from_millis(99)).await;
        assert!(store.get(&id).is_some());
        assert_eq!(store.len(), 1);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(store.get(&id).is_none());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn merge_is_shallow_and_last_writer_wins() {
        let store = ContextStore::default();
        let id = store.create_session(&user());
        store
            .merge(&id, [("a", json!(1)), ("b", json!({"x": 1}))])
            .unwrap();
        store.merge(&id, [("b", json!({"y": 2}))]).unwrap();

        let session = store.get(&id).unwrap();
        assert_eq!(session.get("a"), Some(&json!(1)));
        assert_eq!(session.get("b"), Some(&json!({"y": 2})));
    }

    #[tokio::test]
    async fn correlation_ids_are_unique_per_user() {
        let store = ContextStore::default();
        let a = store.create_session(&user());
        let b = store.create_session(&user());
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("u1-"));
    }

    #[tokio::test]
    async fn lineage_resolves_through_links() {
        let store = ContextStore::default();
        let id = store.create_session(&user());
        store.link_child(&InteractionId::from("100"), &id).unwrap();
        store.link_child(&InteractionId::from("101"), &id).unwrap();

        assert_eq!(
            store.resolve_lineage(&InteractionId::from("101")).unwrap(),
            Some(id.clone())
        );
        assert_eq!(store.resolve_lineage(&InteractionId::from("999")).unwrap(), None);
    }

    #[tokio::test]
    async fn clear_drops_links() {
        let store = ContextStore::default();
        let id = store.create_session(&user());
        store.link_child(&InteractionId::from("100"), &id).unwrap();

        assert!(store.clear(&id));
        assert!(!store.clear(&id));
        assert_eq!(store.resolve_lineage(&InteractionId::from("100")).unwrap(), None);
        assert_eq!(
            store.merge(&id, [("k", json!(1))]),
            Err(SessionError::NotFound(id.to_string()))
        );
    }

    #[tokio::test]
    async fn relinked_interaction_survives_eviction_of_its_old_session() {
        let store = ContextStore::default();
        let interaction = InteractionId::from("500");
        let first = store.create_session(&user());
        store.link_child(&interaction, &first).unwrap();

        let second = store.create_session_with_ttl(&user(), Duration::from_secs(600));
        store.link_child(&interaction, &second).unwrap();
        assert!(store.clear(&first));

        assert_eq!(store.resolve_lineage(&interaction).unwrap(), Some(second.clone()));
        assert!(store.clear(&second));
        assert_eq!(store.resolve_lineage(&interaction).unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_only_expired_sessions() {
        let store = ContextStore::new(Duration::from_secs(10));
        let short = store.create_session_with_ttl(&user(), Duration::from_secs(1));
        let long = store.create_session(&user());
        store.link_child(&InteractionId::from("1"), &short).unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.sweep(), 1);
        assert!(store.get(&long).is_some());
        assert_eq!(store.resolve_lineage(&InteractionId::from("1")).unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_until_cancelled() {
        let store = Arc::new(ContextStore::new(Duration::from_secs(1)));
        store.create_session(&user());
        let token = CancellationToken::new();
        let handle = store.spawn_sweeper(Duration::from_secs(5), token.clone());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(store.is_empty());

        token.cancel();
        handle.await.unwrap();
    }
}
