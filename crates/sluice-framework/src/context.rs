//! The context handed to handlers.
//!
//! One [`HandlerContext`] is built by the router per executed interaction.
//! It carries the interaction itself, a [`Session`] handle onto the
//! conversation's context session, and a [`Lifecycle`] handle scoped to the
//! matched handler instance.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;

use sluice_core::{Interaction, InteractionId, LINEAGE_SEPARATOR, UserId};

use crate::error::SessionError;
use crate::lifecycle::Lifecycle;
use crate::store::{ContextSession, ContextStore, CorrelationId};

// =============================================================================
// Session
// =============================================================================

/// Handle onto the context session of the current conversation.
///
/// For the first interaction of a conversation no session exists yet; it is
/// created on the first write and linked to the interaction, so follow-ups
/// naming this interaction as their parent find it.
#[derive(Clone)]
pub struct Session {
    store: Arc<ContextStore>,
    slot: Arc<Mutex<Option<CorrelationId>>>,
    origin_user: UserId,
    interaction_id: InteractionId,
}

impl Session {
    pub(crate) fn new(
        store: Arc<ContextStore>,
        existing: Option<CorrelationId>,
        interaction: &Interaction,
    ) -> Self {
        Self {
            store,
            slot: Arc::new(Mutex::new(existing)),
            origin_user: interaction.origin_user().clone(),
            interaction_id: interaction.id().clone(),
        }
    }

    /// Correlation id of the session, if one has been started.
    pub fn id(&self) -> Option<CorrelationId> {
        self.slot.lock().clone()
    }

    /// Snapshot of the whole session.
    pub fn snapshot(&self) -> Option<ContextSession> {
        let id = self.id()?;
        self.store.get(&id)
    }

    /// Reads one value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.snapshot()?.data.remove(key)
    }

    /// Reads one value and deserializes it.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Returns the session id, starting a session with the store's default
    /// TTL if there is none.
    pub fn start(&self) -> Result<CorrelationId, SessionError> {
        self.start_with(None)
    }

    /// Starts a fresh session that expires after `ttl`, replacing any
    /// current one for this interaction.
    pub fn start_with_ttl(&self, ttl: Duration) -> Result<CorrelationId, SessionError> {
        self.start_with(Some(ttl))
    }

    fn start_with(&self, ttl: Option<Duration>) -> Result<CorrelationId, SessionError> {
        let mut slot = self.slot.lock();
        if ttl.is_none()
            && let Some(id) = slot.as_ref()
            && self.store.get(id).is_some()
        {
            return Ok(id.clone());
        }
        let id = match ttl {
            Some(ttl) => self.store.create_session_with_ttl(&self.origin_user, ttl),
            None => self.store.create_session(&self.origin_user),
        };
        self.store.link_child(&self.interaction_id, &id)?;
        *slot = Some(id.clone());
        Ok(id)
    }

    /// Stores one value.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<(), SessionError> {
        self.merge([(key.into(), value.into())])
    }

    /// Shallow-merges values into the session, starting one if needed.
    ///
    /// If the session expired in the meantime a new one is started.
    pub fn merge<I, K>(&self, partial: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let partial: Vec<(String, Value)> = partial.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let id = self.start()?;
        match self.store.merge(&id, partial.clone()) {
            Err(SessionError::NotFound(_)) => {
                trace!(correlation_id = %id, "Session expired during merge, starting a new one");
                *self.slot.lock() = None;
                let id = self.start()?;
                self.store.merge(&id, partial)
            }
            other => other,
        }
    }

    /// Deletes the session. Later writes start a new one.
    pub fn clear(&self) -> bool {
        match self.slot.lock().take() {
            Some(id) => self.store.clear(&id),
            None => false,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &*self.slot.lock())
            .field("interaction_id", &self.interaction_id)
            .finish()
    }
}

// =============================================================================
// HandlerContext
// =============================================================================

/// Everything a handler can extract its arguments from.
pub struct HandlerContext {
    interaction: Arc<Interaction>,
    session: Session,
    lifecycle: Lifecycle,
}

impl HandlerContext {
    pub fn new(interaction: Arc<Interaction>, session: Session, lifecycle: Lifecycle) -> Self {
        Self {
            interaction,
            session,
            lifecycle,
        }
    }

    pub fn interaction(&self) -> &Arc<Interaction> {
        &self.interaction
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Builds a routing key that carries this interaction as the parent of
    /// whatever the key is attached to (a form, a button).
    ///
    /// ```rust,ignore
    /// Response::form(ctx.chained_key("feedback-form"), "Feedback", fields)
    /// ```
    pub fn chained_key(&self, key: &str) -> String {
        format!("{key}{LINEAGE_SEPARATOR}{}", self.interaction.id())
    }
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("interaction_id", self.interaction.id())
            .field("kind", &self.interaction.kind())
            .field("routing_key", &self.interaction.routing_key())
            .field("session", &self.session)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use sluice_core::InteractionKind;

    use super::*;
    use crate::lifecycle::{InstanceId, LifecycleManager};

    fn context(store: &Arc<ContextStore>, id: &str) -> HandlerContext {
        let interaction = Interaction::builder(id, InteractionKind::Command, "survey", "u1").build();
        let session = Session::new(store.clone(), None, &interaction);
        let lifecycle = Lifecycle::new(InstanceId::next(), Arc::new(LifecycleManager::new()));
        HandlerContext::new(Arc::new(interaction), session, lifecycle)
    }

    #[tokio::test]
    async fn first_write_starts_and_links_a_session() {
        let store = Arc::new(ContextStore::default());
        let ctx = context(&store, "500");
        assert!(ctx.session().id().is_none());
        assert!(ctx.session().get("step").is_none());

        ctx.session().insert("step", 1).unwrap();
        let id = ctx.session().id().unwrap();
        assert_eq!(
            store.resolve_lineage(&InteractionId::from("500")).unwrap(),
            Some(id)
        );
        assert_eq!(ctx.session().get_as::<u32>("step"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_session_is_restarted_on_write() {
        let store = Arc::new(ContextStore::new(Duration::from_secs(1)));
        let ctx = context(&store, "501");
        ctx.session().insert("a", json!(1)).unwrap();
        let first = ctx.session().id().unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        ctx.session().insert("b", json!(2)).unwrap();
        let second = ctx.session().id().unwrap();

        assert_ne!(first, second);
        let snapshot = ctx.session().snapshot().unwrap();
        assert_eq!(snapshot.get("a"), None);
        assert_eq!(snapshot.get("b"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn restarted_session_keeps_the_chain_after_the_old_one_is_cleared() {
        let store = Arc::new(ContextStore::default());
        let ctx = context(&store, "500");
        ctx.session().insert("step", 1).unwrap();
        let first = ctx.session().id().unwrap();

        let second = ctx.session().start_with_ttl(Duration::from_secs(600)).unwrap();
        assert_ne!(first, second);
        assert!(store.clear(&first));

        assert_eq!(
            store.resolve_lineage(&InteractionId::from("500")).unwrap(),
            Some(second)
        );
    }

    #[tokio::test]
    async fn chained_key_appends_interaction_id() {
        let store = Arc::new(ContextStore::default());
        let ctx = context(&store, "777");
        assert_eq!(ctx.chained_key("feedback-form"), "feedback-form::777");
    }
}
