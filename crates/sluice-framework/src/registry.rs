//! Handler registry.
//!
//! [`HandlerRegistry`] stores every routable handler and answers two
//! questions: which registration handles `(kind, routing key)`, and which
//! subscription scopes the registered set needs as a whole.
//!
//! # Resolution
//!
//! 1. exact routing key match for the kind
//! 2. first pattern match for the kind, in registration order
//! 3. none
//!
//! Exact keys are unique per kind; a duplicate registration is rejected with
//! [`CollisionError`]. Patterns are never rejected, only warned about when
//! they look like they overlap an earlier pattern.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, error, info, warn};

use sluice_core::{CollisionError, InteractionKind, ScopeSet, infer_scopes};

use crate::estimator::DurationEstimator;
use crate::handler::BoxHandlerService;
use crate::lifecycle::{InstanceId, LifecycleManager};

// =============================================================================
// RoutingKey
// =============================================================================

/// How a registration matches routing keys.
#[derive(Debug, Clone)]
pub enum RoutingKey {
    /// Matches one key exactly.
    Exact(String),
    /// Matches every key the expression matches.
    Pattern(Regex),
}

impl RoutingKey {
    /// The exact key, or the pattern source.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Exact(key) => key,
            Self::Pattern(re) => re.as_str(),
        }
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, Self::Pattern(_))
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == key,
            Self::Pattern(re) => re.is_match(key),
        }
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(key) => f.write_str(key),
            Self::Pattern(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

impl From<&str> for RoutingKey {
    fn from(key: &str) -> Self {
        Self::Exact(key.to_string())
    }
}

impl From<String> for RoutingKey {
    fn from(key: String) -> Self {
        Self::Exact(key)
    }
}

impl From<Regex> for RoutingKey {
    fn from(re: Regex) -> Self {
        Self::Pattern(re)
    }
}

// =============================================================================
// HandlerRegistration
// =============================================================================

/// One routable handler. Immutable once built.
pub struct HandlerRegistration {
    instance: InstanceId,
    kind: InteractionKind,
    routing_key: RoutingKey,
    required_scopes: ScopeSet,
    expected_duration: Option<Duration>,
    service: BoxHandlerService,
}

impl HandlerRegistration {
    /// Builds a registration; required scopes are inferred from `kind` and
    /// `routing_key` and unioned with `extra_scopes`.
    pub fn new(
        kind: InteractionKind,
        routing_key: RoutingKey,
        extra_scopes: ScopeSet,
        expected_duration: Option<Duration>,
        service: BoxHandlerService,
    ) -> Self {
        let mut required_scopes = infer_scopes(kind, routing_key.as_str());
        required_scopes.extend_from(&extra_scopes);
        Self {
            instance: InstanceId::next(),
            kind,
            routing_key,
            required_scopes,
            expected_duration,
            service,
        }
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    pub fn kind(&self) -> InteractionKind {
        self.kind
    }

    pub fn routing_key(&self) -> &RoutingKey {
        &self.routing_key
    }

    pub fn required_scopes(&self) -> &ScopeSet {
        &self.required_scopes
    }

    /// Duration the handler declared it may take.
    pub fn expected_duration(&self) -> Option<Duration> {
        self.expected_duration
    }

    /// A fresh handle onto the handler service.
    pub fn service(&self) -> BoxHandlerService {
        self.service.clone()
    }
}

impl fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("instance", &self.instance)
            .field("kind", &self.kind)
            .field("routing_key", &self.routing_key)
            .field("required_scopes", &self.required_scopes)
            .field("expected_duration", &self.expected_duration)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// HandlerRegistry
// =============================================================================

#[derive(Default)]
struct RegistryInner {
    exact: HashMap<(InteractionKind, String), Arc<HandlerRegistration>>,
    patterns: Vec<Arc<HandlerRegistration>>,
    scopes: ScopeSet,
}

impl RegistryInner {
    fn recompute_scopes(&mut self) {
        let mut scopes = ScopeSet::new();
        for registration in self.exact.values().chain(self.patterns.iter()) {
            scopes.extend_from(registration.required_scopes());
        }
        self.scopes = scopes;
    }
}

/// Stores routable handlers.
///
/// Resolution takes a read lock; register/deregister take the write lock.
pub struct HandlerRegistry {
    inner: RwLock<RegistryInner>,
    lifecycle: Arc<LifecycleManager>,
    estimator: DurationEstimator,
}

impl HandlerRegistry {
    /// Creates an empty registry that disposes deregistered instances through
    /// `lifecycle`.
    pub fn new(lifecycle: Arc<LifecycleManager>) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            lifecycle,
            estimator: DurationEstimator::default(),
        }
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    /// Run-time estimates of the registered handlers.
    pub fn estimator(&self) -> &DurationEstimator {
        &self.estimator
    }

    /// Adds a registration.
    ///
    /// # Errors
    ///
    /// [`CollisionError`] if an exact registration with the same kind and
    /// key exists; the existing one is kept.
    pub fn register(
        &self,
        registration: HandlerRegistration,
    ) -> Result<Arc<HandlerRegistration>, CollisionError> {
        let registration = Arc::new(registration);
        let kind = registration.kind();
        let mut inner = self.inner.write();

        match registration.routing_key() {
            RoutingKey::Exact(key) => {
                let slot = (kind, key.clone());
                if inner.exact.contains_key(&slot) {
                    error!(
                        kind = %kind,
                        routing_key = %key,
                        "Routing key collision, registration rejected"
                    );
                    return Err(CollisionError {
                        kind,
                        routing_key: key.clone(),
                    });
                }
                inner.exact.insert(slot, Arc::clone(&registration));
            }
            RoutingKey::Pattern(re) => {
                for earlier in inner.patterns.iter().filter(|r| r.kind() == kind) {
                    if patterns_overlap(earlier.routing_key(), re) {
                        warn!(
                            kind = %kind,
                            pattern = %re.as_str(),
                            earlier = %earlier.routing_key(),
                            "Pattern overlaps an earlier pattern; the earlier one wins"
                        );
                    }
                }
                inner.patterns.push(Arc::clone(&registration));
            }
        }

        inner.recompute_scopes();
        self.lifecycle.track(registration.instance());
        info!(
            kind = %kind,
            routing_key = %registration.routing_key(),
            instance = %registration.instance(),
            "Registered handler"
        );
        Ok(registration)
    }

    /// Finds the registration for `(kind, routing_key)`.
    pub fn resolve(&self, kind: InteractionKind, routing_key: &str) -> Option<Arc<HandlerRegistration>> {
        let inner = self.inner.read();
        if let Some(exact) = inner.exact.get(&(kind, routing_key.to_string())) {
            return Some(Arc::clone(exact));
        }
        inner
            .patterns
            .iter()
            .find(|r| r.kind() == kind && r.routing_key().matches(routing_key))
            .cloned()
    }

    /// Removes every registration whose exact key or pattern source equals
    /// `routing_key`, across all kinds, and disposes their resources.
    ///
    /// Returns how many registrations were removed.
    pub fn deregister(&self, routing_key: &str) -> usize {
        let removed: Vec<Arc<HandlerRegistration>> = {
            let mut inner = self.inner.write();
            let mut removed = Vec::new();
            inner.exact.retain(|(_, key), registration| {
                let keep = key != routing_key;
                if !keep {
                    removed.push(Arc::clone(registration));
                }
                keep
            });
            inner.patterns.retain(|registration| {
                let keep = registration.routing_key().as_str() != routing_key;
                if !keep {
                    removed.push(Arc::clone(registration));
                }
                keep
            });
            if !removed.is_empty() {
                inner.recompute_scopes();
            }
            removed
        };

        for registration in &removed {
            self.lifecycle.dispose(registration.instance());
            self.estimator.forget(registration.instance());
            info!(
                kind = %registration.kind(),
                routing_key = %registration.routing_key(),
                instance = %registration.instance(),
                "Deregistered handler"
            );
        }
        if removed.is_empty() {
            debug!(routing_key = %routing_key, "Nothing registered under routing key");
        }
        removed.len()
    }

    /// Union of the required scopes of every registration.
    pub fn required_scopes(&self) -> ScopeSet {
        self.inner.read().scopes.clone()
    }

    /// Instance ids of every registration.
    pub fn instances(&self) -> Vec<InstanceId> {
        let inner = self.inner.read();
        inner
            .exact
            .values()
            .chain(inner.patterns.iter())
            .map(|r| r.instance())
            .collect()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read();
        inner.exact.len() + inner.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("HandlerRegistry")
            .field("exact", &inner.exact.len())
            .field("patterns", &inner.patterns.len())
            .field("scopes", &inner.scopes)
            .finish()
    }
}

/// Heuristic overlap check: identical sources, or either pattern matching
/// the other's source text.
fn patterns_overlap(earlier: &RoutingKey, new: &Regex) -> bool {
    let RoutingKey::Pattern(earlier) = earlier else {
        return false;
    };
    let (a, b) = (earlier.as_str(), new.as_str());
    a == b || earlier.is_match(b) || new.is_match(a)
}
