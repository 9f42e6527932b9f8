//! Dispatch router.
//!
//! [`Router`] turns one [`Interaction`] into exactly one [`DispatchOutcome`]:
//!
//! ```text
//! Received ─► Resolving ─┬─► Unmatched                       (NoMatch)
//!                        ├─► Rejected                        (ConstraintViolated)
//!                        └─► Executing ─┬─► Succeeded        (Handled)
//!                                       ├─► Failed           (HandlerFailed)
//!                                       └─► Rejected         (ConstraintViolated)
//! ```
//!
//! Every execution runs in its own task tracked for shutdown, so a slow
//! handler never blocks other in-flight dispatches. Interaction ids are
//! remembered for a window; a duplicate receives the first dispatch's
//! outcome and never invokes the handler again.
//!
//! A [`RouterError`] is unrecoverable: besides being returned to the caller
//! it is latched, and [`Router::failed`] resolves so the process can stop.

use std::collections::HashMap;
use std::future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;
use tracing::{Instrument, Level, debug, error, info, span, trace, warn};

use sluice_core::{
    ConstraintProfile, ConstraintViolation, Dispatch, DispatchOutcome, HandlerError, Interaction,
    InteractionId, RouterError, ScopeSet,
};

use crate::context::{HandlerContext, Session};
use crate::lifecycle::Lifecycle;
use crate::registry::{HandlerRegistration, HandlerRegistry};
use crate::store::ContextStore;

/// Default time a dispatched interaction id is remembered.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Minimum time between two prunes of the dedup table.
const PRUNE_INTERVAL: Duration = Duration::from_secs(1);

type SharedOutcome = Shared<BoxFuture<'static, Result<DispatchOutcome, RouterError>>>;

/// Router tuning.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// How long a dispatched interaction id is remembered.
    pub dedup_window: Duration,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }
}

struct DedupEntry {
    outcome: SharedOutcome,
    dispatched_at: Instant,
    /// Stops this execution only.
    cancel: CancellationToken,
}

struct DedupTable {
    entries: HashMap<InteractionId, DedupEntry>,
    last_pruned: Instant,
}

struct RouterShared {
    registry: Arc<HandlerRegistry>,
    store: Arc<ContextStore>,
    profile: ConstraintProfile,
    dedup: Mutex<DedupTable>,
    dedup_window: Duration,
    tasks: TaskTracker,
    cancel: CancellationToken,
    accepting: AtomicBool,
    failure: Mutex<Option<RouterError>>,
    failed: CancellationToken,
}

/// Matches interactions to handlers and runs them under the host's
/// constraint profile.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Router {
    shared: Arc<RouterShared>,
}

impl Router {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        store: Arc<ContextStore>,
        profile: ConstraintProfile,
    ) -> Self {
        Self::with_options(registry, store, profile, RouterOptions::default())
    }

    pub fn with_options(
        registry: Arc<HandlerRegistry>,
        store: Arc<ContextStore>,
        profile: ConstraintProfile,
        options: RouterOptions,
    ) -> Self {
        Self {
            shared: Arc::new(RouterShared {
                registry,
                store,
                profile,
                dedup: Mutex::new(DedupTable {
                    entries: HashMap::new(),
                    last_pruned: Instant::now(),
                }),
                dedup_window: options.dedup_window,
                tasks: TaskTracker::new(),
                cancel: CancellationToken::new(),
                accepting: AtomicBool::new(true),
                failure: Mutex::new(None),
                failed: CancellationToken::new(),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.shared.registry
    }

    pub fn store(&self) -> &Arc<ContextStore> {
        &self.shared.store
    }

    pub fn profile(&self) -> ConstraintProfile {
        self.shared.profile
    }

    /// Number of executions still running.
    pub fn in_flight(&self) -> usize {
        self.shared.tasks.len()
    }

    /// The first unrecoverable error, if one has occurred.
    pub fn failure(&self) -> Option<RouterError> {
        self.shared.failure.lock().clone()
    }

    /// Resolves with the first unrecoverable error.
    pub async fn failed(&self) -> RouterError {
        loop {
            self.shared.failed.cancelled().await;
            if let Some(err) = self.failure() {
                return err;
            }
        }
    }

    /// Stops the running execution of `id`. See [`Dispatch::abandon`].
    pub fn abandon(&self, id: &InteractionId) -> bool {
        let dedup = self.shared.dedup.lock();
        let Some(entry) = dedup.entries.get(id) else {
            return false;
        };
        if entry.cancel.is_cancelled() {
            return false;
        }
        entry.cancel.cancel();
        debug!(interaction_id = %id, "Dispatch abandoned");
        true
    }

    /// Dispatches one interaction.
    ///
    /// Returns `Err` only for unrecoverable router failures.
    pub async fn dispatch(&self, interaction: Interaction) -> Result<DispatchOutcome, RouterError> {
        let outcome = {
            let mut dedup = self.shared.dedup.lock();
            let now = Instant::now();
            if now.duration_since(dedup.last_pruned) >= PRUNE_INTERVAL {
                let window = self.shared.dedup_window;
                dedup
                    .entries
                    .retain(|_, entry| now.duration_since(entry.dispatched_at) < window);
                dedup.last_pruned = now;
            }

            if let Some(entry) = dedup.entries.get(interaction.id()) {
                debug!(
                    interaction_id = %interaction.id(),
                    "Duplicate dispatch, reusing the first outcome"
                );
                entry.outcome.clone()
            } else if !self.shared.accepting.load(Ordering::Acquire) {
                drop(dedup);
                warn!(
                    interaction_id = %interaction.id(),
                    "Router is shutting down, interaction not dispatched"
                );
                return Ok(DispatchOutcome::HandlerFailed(HandlerError::Shutdown));
            } else {
                let id = interaction.id().clone();
                let cancel = self.shared.cancel.child_token();
                let outcome = self.spawn_execution(interaction, cancel.clone());
                dedup.entries.insert(
                    id,
                    DedupEntry {
                        outcome: outcome.clone(),
                        dispatched_at: now,
                        cancel,
                    },
                );
                outcome
            }
        };
        outcome.await
    }

    /// Stops accepting interactions, lets in-flight handlers finish within
    /// `grace`, then cancels the rest. Cancelled handlers report
    /// [`HandlerError::Shutdown`].
    pub async fn shutdown(&self, grace: Duration) {
        self.shared.accepting.store(false, Ordering::Release);
        self.shared.tasks.close();

        let in_flight = self.shared.tasks.len();
        if in_flight > 0 {
            info!(in_flight, grace = ?grace, "Waiting for in-flight dispatches");
        }
        if tokio::time::timeout(grace, self.shared.tasks.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = self.shared.tasks.len(),
                "Shutdown grace period elapsed, cancelling in-flight handlers"
            );
            self.shared.cancel.cancel();
            self.shared.tasks.wait().await;
        }
        debug!("Router stopped");
    }

    fn spawn_execution(&self, interaction: Interaction, cancel: CancellationToken) -> SharedOutcome {
        let span = span!(
            Level::DEBUG,
            "interaction",
            interaction_id = %interaction.id(),
            kind = %interaction.kind(),
            routing_key = %interaction.routing_key(),
        );
        let shared = Arc::clone(&self.shared);
        let handle = self.shared.tasks.spawn(
            async move {
                let result = shared.execute(interaction, cancel).await;
                if let Err(err) = &result {
                    shared.fail(err);
                }
                result
            }
            .instrument(span),
        );

        let shared = Arc::clone(&self.shared);
        async move {
            match handle.await {
                Ok(result) => result,
                Err(err) => {
                    let err = RouterError::TaskFailed(err.to_string());
                    shared.fail(&err);
                    Err(err)
                }
            }
        }
        .boxed()
        .shared()
    }
}

impl RouterShared {
    /// Latches the first unrecoverable error.
    fn fail(&self, err: &RouterError) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            error!(error = %err, "Router failed");
            *failure = Some(err.clone());
            self.failed.cancel();
        }
    }

    async fn execute(
        &self,
        interaction: Interaction,
        cancel: CancellationToken,
    ) -> Result<DispatchOutcome, RouterError> {
        trace!("Resolving");
        let Some(registration) = self
            .registry
            .resolve(interaction.kind(), interaction.routing_key())
        else {
            debug!("No handler matched");
            return Ok(DispatchOutcome::NoMatch);
        };

        let session = self.resolve_session(&interaction)?;

        if let Some(violation) = self.precheck(&registration) {
            warn!(reason = %violation, "Rejected before execution");
            return Ok(DispatchOutcome::ConstraintViolated(violation));
        }

        let started = Instant::now();
        let deadline = self.deadline(&interaction, started);
        let lifecycle = Lifecycle::new(registration.instance(), Arc::clone(self.registry.lifecycle()));
        let ctx = Arc::new(HandlerContext::new(Arc::new(interaction), session, lifecycle));
        let run = AssertUnwindSafe(registration.service().oneshot(ctx)).catch_unwind();
        let expiry = async {
            match deadline {
                Some((at, _)) => sleep_until(at).await,
                None => future::pending().await,
            }
        };

        trace!(deadline = ?deadline.map(|(at, _)| at - started), "Executing");
        let outcome = tokio::select! {
            biased;
            result = run => {
                let elapsed = started.elapsed();
                self.registry.estimator().record(registration.instance(), elapsed);
                match result {
                    Ok(Ok(response)) => {
                        debug!(elapsed = ?elapsed, "Handled");
                        DispatchOutcome::Handled(response)
                    }
                    Ok(Err(err)) => {
                        let err = HandlerError::from_boxed(err);
                        warn!(error = %err, elapsed = ?elapsed, "Handler failed");
                        DispatchOutcome::HandlerFailed(err)
                    }
                    Err(panic) => {
                        let err = HandlerError::Panicked(panic_message(panic.as_ref()));
                        warn!(error = %err, "Handler panicked");
                        DispatchOutcome::HandlerFailed(err)
                    }
                }
            }
            () = expiry => {
                self.registry
                    .estimator()
                    .record_cutoff(registration.instance(), started.elapsed());
                let violation = match deadline {
                    Some((_, violation)) => violation,
                    None => ConstraintViolation::AckDeadlineMissed,
                };
                warn!(reason = %violation, "Handler did not finish in time");
                DispatchOutcome::ConstraintViolated(violation)
            }
            () = cancel.cancelled() => {
                if self.cancel.is_cancelled() {
                    warn!("Handler cancelled by shutdown");
                    DispatchOutcome::HandlerFailed(HandlerError::Shutdown)
                } else {
                    debug!("Handler stopped, its reply was abandoned");
                    DispatchOutcome::ConstraintViolated(
                        ConstraintViolation::BackgroundExecutionUnavailable,
                    )
                }
            }
        };
        Ok(outcome)
    }

    /// Resumes the parent's session, or starts an empty one linked to both
    /// the parent and this interaction when the parent's is gone.
    fn resolve_session(&self, interaction: &Interaction) -> Result<Session, RouterError> {
        let Some(parent) = interaction.parent_interaction_id() else {
            return Ok(Session::new(Arc::clone(&self.store), None, interaction));
        };

        let resumed = match self.store.resolve_lineage(parent)? {
            Some(id) => self
                .store
                .link_child(interaction.id(), &id)
                .ok()
                .map(|()| id),
            None => None,
        };
        let id = match resumed {
            Some(id) => {
                trace!(correlation_id = %id, parent = %parent, "Resumed session from lineage");
                id
            }
            None => {
                let id = self.store.create_session(interaction.origin_user());
                self.store
                    .link_child(parent, &id)
                    .and_then(|()| self.store.link_child(interaction.id(), &id))
                    .map_err(|e| RouterError::StoreCorrupted(e.to_string()))?;
                debug!(
                    correlation_id = %id,
                    parent = %parent,
                    "Parent session not found, starting an empty one"
                );
                id
            }
        };
        Ok(Session::new(Arc::clone(&self.store), Some(id), interaction))
    }

    /// Rejects a handler whose declared or estimated duration cannot fit
    /// on a host without background execution.
    fn precheck(&self, registration: &HandlerRegistration) -> Option<ConstraintViolation> {
        if self.profile.supports_background_execution {
            return None;
        }
        let limit = self.profile.max_execution_time?;
        let expected = match registration.expected_duration() {
            Some(declared) => (declared > limit).then_some(declared)?,
            None => self
                .registry
                .estimator()
                .over_limit(registration.instance(), limit)?,
        };
        Some(ConstraintViolation::ExpectedDurationExceedsLimit { expected, limit })
    }

    /// The instant execution is cut off, and the violation reported then.
    ///
    /// Hosts with background execution only enforce their execution
    /// ceiling; the delivery strategy defers the reply past the ack
    /// deadline. Hosts without it must answer by the ack deadline.
    fn deadline(
        &self,
        interaction: &Interaction,
        started: Instant,
    ) -> Option<(Instant, ConstraintViolation)> {
        let execution = self
            .profile
            .max_execution_time
            .map(|limit| (started + limit, ConstraintViolation::ExecutionTimeExceeded { limit }));
        if self.profile.supports_background_execution {
            return execution;
        }
        let ack = (interaction.ack_deadline(), ConstraintViolation::AckDeadlineMissed);
        Some(match execution {
            Some(execution) if execution.0 < ack.0 => execution,
            _ => ack,
        })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[async_trait]
impl Dispatch for Router {
    async fn dispatch(&self, interaction: Interaction) -> Result<DispatchOutcome, RouterError> {
        Router::dispatch(self, interaction).await
    }

    fn abandon(&self, id: &InteractionId) -> bool {
        Router::abandon(self, id)
    }

    fn profile(&self) -> ConstraintProfile {
        self.shared.profile
    }

    fn required_scopes(&self) -> ScopeSet {
        self.shared.registry.required_scopes()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;
    use sluice_core::{InteractionKind, Response};

    use super::*;
    use crate::lifecycle::LifecycleManager;
    use crate::routing::{on_command, on_component, on_form_submit};

    fn router(profile: ConstraintProfile) -> Router {
        let registry = Arc::new(HandlerRegistry::new(Arc::new(LifecycleManager::new())));
        Router::new(registry, Arc::new(ContextStore::default()), profile)
    }

    fn command(id: &str, key: &str) -> Interaction {
        Interaction::builder(id, InteractionKind::Command, key, "u1").build()
    }

    fn restricted(limit_ms: u64) -> ConstraintProfile {
        ConstraintProfile {
            max_execution_time: Some(Duration::from_millis(limit_ms)),
            supports_background_execution: false,
            ..ConstraintProfile::PERMISSIVE
        }
    }

    #[tokio::test]
    async fn literal_response_is_handled() {
        let router = router(ConstraintProfile::PERMISSIVE);
        router
            .registry()
            .register(on_command("ping").handler(|| async { "pong" }))
            .unwrap();

        let outcome = router.dispatch(command("1", "ping")).await.unwrap();
        assert_eq!(outcome.response(), Some(&Response::message("pong")));
    }

    #[tokio::test]
    async fn unmatched_key_is_no_match() {
        let router = router(ConstraintProfile::PERMISSIVE);
        router
            .registry()
            .register(on_component("confirm-delete").handler(|| async { "deleted" }))
            .unwrap();

        let interaction =
            Interaction::builder("1", InteractionKind::Component, "confirm-other", "u1").build();
        let outcome = router.dispatch(interaction).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::NoMatch));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_dispatch_invokes_handler_once() {
        let router = router(ConstraintProfile::PERMISSIVE);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        router
            .registry()
            .register(on_command("count").handler(move || {
                let counter = counter.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    (counter.fetch_add(1, Ordering::SeqCst) + 1).to_string()
                }
            }))
            .unwrap();

        let (a, b) = tokio::join!(
            router.dispatch(command("42", "count")),
            router.dispatch(command("42", "count")),
        );
        let c = router.dispatch(command("42", "count")).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap().response(), Some(&Response::message("1")));
        assert_eq!(b.unwrap().response(), Some(&Response::message("1")));
        assert_eq!(c.response(), Some(&Response::message("1")));
    }

    #[tokio::test(start_paused = true)]
    async fn ids_are_forgotten_after_the_window() {
        let registry = Arc::new(HandlerRegistry::new(Arc::new(LifecycleManager::new())));
        let router = Router::with_options(
            registry,
            Arc::new(ContextStore::default()),
            ConstraintProfile::PERMISSIVE,
            RouterOptions {
                dedup_window: Duration::from_secs(60),
            },
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        router
            .registry()
            .register(on_command("count").handler(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {}
            }))
            .unwrap();

        router.dispatch(command("7", "count")).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        router.dispatch(command("7", "count")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_without_background_execution_is_violation() {
        let router = router(restricted(100));
        router
            .registry()
            .register(on_command("slow").handler(|| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                "done"
            }))
            .unwrap();

        let outcome = router.dispatch(command("1", "slow")).await.unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::ConstraintViolated(ConstraintViolation::ExecutionTimeExceeded { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn declared_duration_over_limit_short_circuits() {
        let router = router(restricted(100));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        router
            .registry()
            .register(
                on_command("report")
                    .expected_duration(Duration::from_secs(5))
                    .handler(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                        async { "report" }
                    }),
            )
            .unwrap();

        let outcome = router.dispatch(command("1", "report")).await.unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::ConstraintViolated(
                ConstraintViolation::ExpectedDurationExceedsLimit { .. }
            )
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cut_off_handler_is_rejected_then_retried() {
        let router = router(restricted(50));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        router
            .registry()
            .register(on_command("warmup").handler(move || {
                let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
                async move {
                    if first {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                    "ready"
                }
            }))
            .unwrap();

        let cut = router.dispatch(command("1", "warmup")).await.unwrap();
        assert!(matches!(
            cut,
            DispatchOutcome::ConstraintViolated(ConstraintViolation::ExecutionTimeExceeded { .. })
        ));

        let rejected = router.dispatch(command("2", "warmup")).await.unwrap();
        assert!(matches!(
            rejected,
            DispatchOutcome::ConstraintViolated(
                ConstraintViolation::ExpectedDurationExceedsLimit { .. }
            )
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(crate::estimator::DEFAULT_RETRY_AFTER + Duration::from_secs(1)).await;
        let retried = router.dispatch(command("3", "warmup")).await.unwrap();
        assert_eq!(retried.response(), Some(&Response::message("ready")));
        let after = router.dispatch(command("4", "warmup")).await.unwrap();
        assert!(after.is_handled());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_dispatch_stops_its_handler() {
        let router = router(ConstraintProfile {
            supports_background_execution: false,
            ..ConstraintProfile::PERMISSIVE
        });
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = finished.clone();
        router
            .registry()
            .register(on_command("slow").handler(move || {
                let counter = counter.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(2800)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    "late"
                }
            }))
            .unwrap();

        let dispatching = tokio::spawn({
            let router = router.clone();
            async move { router.dispatch(command("1", "slow")).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(router.abandon(&InteractionId::from("1")));
        assert!(!router.abandon(&InteractionId::from("1")));
        assert!(!router.abandon(&InteractionId::from("unknown")));
        let outcome = dispatching.await.unwrap().unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::ConstraintViolated(ConstraintViolation::BackgroundExecutionUnavailable)
        ));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert_eq!(router.in_flight(), 0);
    }

    #[tokio::test]
    async fn corrupted_store_fails_the_router() {
        let router = router(ConstraintProfile::PERMISSIVE);
        router
            .registry()
            .register(on_form_submit("survey-form").handler(|| async { "ok" }))
            .unwrap();
        router
            .store()
            .link_dangling(&InteractionId::from("100"), "gone");
        assert!(router.failure().is_none());

        let submit = Interaction::builder("101", InteractionKind::FormSubmit, "survey-form", "u1")
            .parent("100")
            .build();
        let err = router.dispatch(submit).await.unwrap_err();
        assert!(matches!(err, RouterError::StoreCorrupted(_)));

        let latched = tokio::time::timeout(Duration::from_secs(1), router.failed())
            .await
            .unwrap();
        assert!(matches!(latched, RouterError::StoreCorrupted(_)));
        assert!(router.failure().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn ack_deadline_bounds_hosts_without_background_execution() {
        let router = router(ConstraintProfile {
            supports_background_execution: false,
            ..ConstraintProfile::PERMISSIVE
        });
        router
            .registry()
            .register(on_command("slow").handler(|| async {
                tokio::time::sleep(Duration::from_secs(4)).await;
                "late"
            }))
            .unwrap();

        let outcome = router.dispatch(command("1", "slow")).await.unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::ConstraintViolated(ConstraintViolation::AckDeadlineMissed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn background_hosts_run_past_the_ack_deadline() {
        let router = router(ConstraintProfile::PERMISSIVE);
        router
            .registry()
            .register(on_command("slow").handler(|| async {
                tokio::time::sleep(Duration::from_secs(4)).await;
                "late"
            }))
            .unwrap();

        let outcome = router.dispatch(command("1", "slow")).await.unwrap();
        assert!(outcome.is_handled());
    }

    #[tokio::test]
    async fn handler_errors_and_panics_are_contained() {
        let router = router(ConstraintProfile::PERMISSIVE);
        router
            .registry()
            .register(on_command("fail").handler(|| async {
                Err::<String, _>(std::io::Error::other("disk on fire"))
            }))
            .unwrap();
        router
            .registry()
            .register(on_command("panic").handler(|| async {
                if true {
                    panic!("handler bug");
                }
                "unreachable"
            }))
            .unwrap();

        let failed = router.dispatch(command("1", "fail")).await.unwrap();
        match failed {
            DispatchOutcome::HandlerFailed(HandlerError::Handler(err)) => {
                assert_eq!(err.to_string(), "disk on fire");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let panicked = router.dispatch(command("2", "panic")).await.unwrap();
        assert!(matches!(
            panicked,
            DispatchOutcome::HandlerFailed(HandlerError::Panicked(ref msg)) if msg == "handler bug"
        ));
    }

    #[tokio::test]
    async fn follow_up_sees_parent_session() {
        let router = router(ConstraintProfile::PERMISSIVE);
        router
            .registry()
            .register(on_command("survey").handler(|ctx: Arc<HandlerContext>, session: Session| async move {
                session.insert("topic", "rust")?;
                Ok::<_, crate::error::SessionError>(Response::form(
                    ctx.chained_key("survey-form"),
                    "Survey",
                    json!([]),
                ))
            }))
            .unwrap();
        router
            .registry()
            .register(on_form_submit("survey-form").handler(|session: Session| async move {
                session.get_as::<String>("topic").unwrap_or_default()
            }))
            .unwrap();

        router.dispatch(command("100", "survey")).await.unwrap();
        let submit = Interaction::builder("101", InteractionKind::FormSubmit, "survey-form", "u1")
            .parent("100")
            .build();
        let outcome = router.dispatch(submit).await.unwrap();
        assert_eq!(outcome.response(), Some(&Response::message("rust")));
    }

    #[tokio::test]
    async fn unknown_parent_gets_an_empty_session() {
        let router = router(ConstraintProfile::PERMISSIVE);
        router
            .registry()
            .register(on_form_submit("orphan").handler(|session: Session| async move {
                let snapshot = session.snapshot().expect("synthetic session");
                snapshot.data.len().to_string()
            }))
            .unwrap();

        let submit = Interaction::builder("9", InteractionKind::FormSubmit, "orphan", "u1")
            .parent("does-not-exist")
            .build();
        let outcome = router.dispatch(submit).await.unwrap();
        assert_eq!(outcome.response(), Some(&Response::message("0")));
        assert!(
            router
                .store()
                .resolve_lineage(&InteractionId::from("does-not-exist"))
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_handlers_after_grace() {
        let router = router(ConstraintProfile::PERMISSIVE);
        router
            .registry()
            .register(on_command("forever").handler(|| async {
                future::pending::<()>().await;
                "never"
            }))
            .unwrap();

        let dispatching = tokio::spawn({
            let router = router.clone();
            async move { router.dispatch(command("1", "forever")).await }
        });
        tokio::task::yield_now().await;

        router.shutdown(Duration::from_millis(500)).await;
        let outcome = dispatching.await.unwrap().unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::HandlerFailed(HandlerError::Shutdown)
        ));

        let late = router.dispatch(command("2", "forever")).await.unwrap();
        assert!(matches!(late, DispatchOutcome::HandlerFailed(HandlerError::Shutdown)));
    }
}
