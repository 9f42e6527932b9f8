//! Request/response delivery strategy.
//!
//! Every inbound request must be answered before a fixed deadline. When the
//! dispatch is not done by then, the request is answered with a deferred
//! reply and the real one is sent as a follow-up, provided the host lets
//! work outlive the request. Otherwise the interaction is abandoned, its
//! handler is stopped, and it is answered as a constraint violation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::{Instant, sleep_until};
use tokio_util::task::TaskTracker;
use tracing::{Instrument, Level, debug, error, info, span, warn};

use sluice_core::{
    BoxedDispatch, ConstraintViolation, DeliveryStrategy, DispatchOutcome, OutboundApi, RawRequest,
    RawResponse, ReplyStatus, RequestHandler, SetupError, WireCodec,
};

use crate::codec::InteractionCodec;

/// Default time allowed to produce the synchronous reply.
pub const DEFAULT_RESPONSE_DEADLINE: Duration = Duration::from_millis(2500);

/// Checks that a request really comes from the platform.
///
/// Cryptographic verification is left to implementors; the strategy only
/// rejects requests the verifier refuses.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, request: &RawRequest) -> bool;
}

/// Accepts requests carrying a shared secret in a header.
pub struct SharedSecretVerifier {
    header: String,
    secret: String,
}

impl SharedSecretVerifier {
    pub fn new(header: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            secret: secret.into(),
        }
    }
}

impl SignatureVerifier for SharedSecretVerifier {
    fn verify(&self, request: &RawRequest) -> bool {
        request.header(&self.header) == Some(self.secret.as_str())
    }
}

#[derive(Clone)]
struct Active {
    dispatch: BoxedDispatch,
    limiter: Option<Arc<Semaphore>>,
}

/// Delivery over per-request webhooks.
///
/// Implements [`RequestHandler`]; a host adapter (such as the axum listener
/// in `sluice-transport`) only translates requests in and replies out.
pub struct WebhookStrategy {
    codec: Arc<InteractionCodec>,
    outbound: Option<Arc<dyn OutboundApi>>,
    verifier: Option<Arc<dyn SignatureVerifier>>,
    response_deadline: Duration,
    active: RwLock<Option<Active>>,
    followups: TaskTracker,
}

impl WebhookStrategy {
    pub fn new() -> Self {
        Self {
            codec: Arc::new(InteractionCodec::new()),
            outbound: None,
            verifier: None,
            response_deadline: DEFAULT_RESPONSE_DEADLINE,
            active: RwLock::new(None),
            followups: TaskTracker::new(),
        }
    }

    pub fn with_codec(mut self, codec: InteractionCodec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Outbound API used for follow-ups after a deferred reply. Without one
    /// slow dispatches are never deferred.
    pub fn with_outbound(mut self, outbound: Arc<dyn OutboundApi>) -> Self {
        self.outbound = Some(outbound);
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_response_deadline(mut self, deadline: Duration) -> Self {
        self.response_deadline = deadline;
        self
    }

    /// Follow-ups still being delivered.
    pub fn pending_followups(&self) -> usize {
        self.followups.len()
    }

    async fn handle_interaction(&self, active: Active, raw: Value) -> RawResponse {
        let received_at = Instant::now();
        let interaction = match self.codec.normalize(raw, received_at) {
            Ok(interaction) => interaction,
            Err(e) => {
                warn!(error = %e, "Rejecting malformed webhook request");
                return RawResponse::error(ReplyStatus::BadRequest, e.to_string());
            }
        };
        let id = interaction.id().clone();
        let deadline = std::cmp::min(received_at + self.response_deadline, interaction.ack_deadline());

        let span = span!(
            Level::DEBUG,
            "webhook",
            interaction_id = %id,
            routing_key = %interaction.routing_key(),
        );

        let dispatch = active.dispatch.clone();
        let limiter = active.limiter.clone();
        let subject = interaction.clone();
        let mut pending = tokio::spawn(
            async move {
                // Requests beyond the ceiling queue here instead of being
                // dropped.
                let _permit = match limiter {
                    Some(limiter) => limiter.acquire_owned().await.ok(),
                    None => None,
                };
                dispatch.dispatch(subject).await
            }
            .instrument(span),
        );

        tokio::select! {
            joined = &mut pending => {
                match joined {
                    Ok(Ok(outcome)) => {
                        debug!(interaction_id = %id, outcome = outcome.label(), "Webhook dispatch finished");
                        self.codec.denormalize(&interaction, &outcome)
                    }
                    Ok(Err(e)) => {
                        error!(interaction_id = %id, error = %e, "Dispatch failed at the router");
                        RawResponse::error(ReplyStatus::ServiceUnavailable, e.to_string())
                    }
                    Err(e) => {
                        error!(interaction_id = %id, error = %e, "Dispatch task failed");
                        RawResponse::error(ReplyStatus::ServiceUnavailable, e.to_string())
                    }
                }
            }
            _ = sleep_until(deadline) => {
                let background = active.dispatch.profile().supports_background_execution;
                match (background, &self.outbound, interaction.callback_token()) {
                    (true, Some(outbound), Some(token)) => {
                        debug!(interaction_id = %id, "Response deadline reached, deferring");
                        let outbound = outbound.clone();
                        let codec = self.codec.clone();
                        let token = token.to_string();
                        self.followups.spawn(async move {
                            let body = match pending.await {
                                Ok(Ok(outcome)) => codec.followup_body(&outcome),
                                Ok(Err(e)) => {
                                    error!(interaction_id = %id, error = %e, "Dispatch failed at the router");
                                    codec.failure_followup()
                                }
                                Err(e) => {
                                    error!(interaction_id = %id, error = %e, "Dispatch task failed");
                                    codec.failure_followup()
                                }
                            };
                            if let Err(e) = outbound.send_followup(&token, body).await {
                                warn!(interaction_id = %id, error = %e, "Failed to send follow-up");
                            }
                        });
                        RawResponse::ok(InteractionCodec::deferred(&interaction))
                    }
                    _ => {
                        warn!(
                            interaction_id = %id,
                            "Response deadline reached and the reply cannot be deferred, abandoning"
                        );
                        // Once the task is gone the dispatch is either
                        // registered with the router or never started.
                        pending.abort();
                        let _ = (&mut pending).await;
                        if active.dispatch.abandon(&id) {
                            debug!(interaction_id = %id, "Stopped the abandoned handler");
                        }
                        self.codec.denormalize(
                            &interaction,
                            &DispatchOutcome::ConstraintViolated(
                                ConstraintViolation::BackgroundExecutionUnavailable,
                            ),
                        )
                    }
                }
            }
        }
    }
}

impl Default for WebhookStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryStrategy for WebhookStrategy {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn setup(&self, dispatch: BoxedDispatch) -> Result<(), SetupError> {
        let mut active = self.active.write();
        if active.is_some() {
            return Err(SetupError::AlreadySetUp(self.name()));
        }
        let profile = dispatch.profile();
        let limiter = profile
            .max_concurrent_operations
            .map(|max| Arc::new(Semaphore::new(max)));
        *active = Some(Active { dispatch, limiter });
        self.followups.reopen();
        info!(
            strategy = self.name(),
            max_concurrent = ?profile.max_concurrent_operations,
            deadline = ?self.response_deadline,
            "Webhook strategy ready"
        );
        Ok(())
    }

    async fn teardown(&self) {
        if self.active.write().take().is_none() {
            return;
        }
        self.followups.close();
        info!(
            strategy = self.name(),
            pending_followups = self.followups.len(),
            "Webhook strategy stopped"
        );
    }

    async fn drain(&self) {
        self.followups.close();
        self.followups.wait().await;
        debug!(strategy = self.name(), "Follow-ups drained");
    }
}

#[async_trait]
impl RequestHandler for WebhookStrategy {
    async fn handle(&self, request: RawRequest) -> RawResponse {
        if let Some(verifier) = &self.verifier
            && !verifier.verify(&request)
        {
            warn!("Rejecting webhook request with invalid signature");
            return RawResponse::error(ReplyStatus::Unauthorized, "invalid request signature");
        }

        let raw: Value = match serde_json::from_slice(&request.body) {
            Ok(raw) => raw,
            Err(e) => return RawResponse::error(ReplyStatus::BadRequest, e.to_string()),
        };
        if InteractionCodec::is_ping(&raw) {
            return InteractionCodec::pong();
        }

        let Some(active) = self.active.read().clone() else {
            return RawResponse::error(ReplyStatus::ServiceUnavailable, "not accepting interactions");
        };
        self.handle_interaction(active, raw).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use sluice_core::{
        ConstraintProfile, Dispatch, Interaction, InteractionId, Response, RouterError, ScopeSet,
    };
    use sluice_framework::{ContextStore, HandlerRegistry, LifecycleManager, Router, on_command};
    use sluice_transport::{OutboundCall, RecordingOutbound};

    use super::*;

    fn router(profile: ConstraintProfile) -> Router {
        let registry = Arc::new(HandlerRegistry::new(Arc::new(LifecycleManager::new())));
        Router::new(registry, Arc::new(ContextStore::default()), profile)
    }

    fn request(id: &str, name: &str) -> RawRequest {
        let body = json!({
            "id": id,
            "type": 2,
            "token": format!("tok-{id}"),
            "user": { "id": "u1" },
            "data": { "name": name }
        });
        RawRequest::new(body.to_string())
    }

    fn register_slow(router: &Router, delay: Duration) {
        router
            .registry()
            .register(on_command("slow").handler(move || async move {
                tokio::time::sleep(delay).await;
                Response::message("finally")
            }))
            .unwrap();
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let strategy = WebhookStrategy::new();
        let reply = strategy
            .handle(RawRequest::new(json!({ "type": 1 }).to_string()))
            .await;
        assert_eq!(reply, RawResponse::ok(json!({ "type": 1 })));
    }

    #[tokio::test]
    async fn fast_dispatch_is_answered_synchronously() {
        let router = router(ConstraintProfile::PERMISSIVE);
        router
            .registry()
            .register(on_command("ping").handler(|| async { "pong" }))
            .unwrap();
        let strategy = WebhookStrategy::new();
        strategy.setup(Arc::new(router)).await.unwrap();

        let reply = strategy.handle(request("1", "ping")).await;
        assert_eq!(reply.status, ReplyStatus::Ok);
        assert_eq!(reply.body, json!({ "type": 4, "data": { "content": "pong" } }));

        let reply = strategy.handle(request("2", "nope")).await;
        assert_eq!(reply.status, ReplyStatus::NotFound);
    }

    #[tokio::test]
    async fn requests_before_setup_are_refused() {
        let strategy = WebhookStrategy::new();
        let reply = strategy.handle(request("1", "ping")).await;
        assert_eq!(reply.status, ReplyStatus::ServiceUnavailable);

        let reply = strategy.handle(RawRequest::new("{not json")).await;
        assert_eq!(reply.status, ReplyStatus::BadRequest);
    }

    #[tokio::test]
    async fn invalid_signature_is_rejected() {
        let strategy = WebhookStrategy::new()
            .with_verifier(Arc::new(SharedSecretVerifier::new("X-Signature", "s3cret")));

        let reply = strategy.handle(request("1", "ping")).await;
        assert_eq!(reply.status, ReplyStatus::Unauthorized);

        let reply = strategy
            .handle(RawRequest::new(json!({ "type": 1 }).to_string()).with_header("x-signature", "s3cret"))
            .await;
        assert_eq!(reply.status, ReplyStatus::Ok);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_dispatch_is_deferred_and_followed_up() {
        let router = router(ConstraintProfile::PERMISSIVE);
        register_slow(&router, Duration::from_secs(10));
        let outbound = RecordingOutbound::new();
        let strategy = WebhookStrategy::new().with_outbound(Arc::new(outbound.clone()));
        strategy.setup(Arc::new(router)).await.unwrap();

        let reply = strategy.handle(request("9", "slow")).await;
        assert_eq!(reply, RawResponse::ok(json!({ "type": 5 })));

        let calls = outbound.wait_for(1).await;
        assert_eq!(
            calls[0],
            OutboundCall::Followup {
                token: "tok-9".to_string(),
                body: json!({ "content": "finally" }),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_dispatch_without_background_is_abandoned() {
        let profile = ConstraintProfile {
            supports_background_execution: false,
            ..ConstraintProfile::PERMISSIVE
        };
        let router = router(profile);
        register_slow(&router, Duration::from_secs(10));
        let outbound = RecordingOutbound::new();
        let strategy = WebhookStrategy::new().with_outbound(Arc::new(outbound.clone()));
        strategy.setup(Arc::new(router)).await.unwrap();

        let reply = strategy.handle(request("9", "slow")).await;
        assert_eq!(reply.status, ReplyStatus::Ok);
        assert_eq!(reply.body["type"], json!(4));
        assert_eq!(reply.body["data"]["flags"], json!(64));
        assert!(outbound.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn requests_beyond_the_ceiling_queue() {
        let profile = ConstraintProfile {
            max_concurrent_operations: Some(1),
            ..ConstraintProfile::PERMISSIVE
        };
        let router = router(profile);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (running.clone(), peak.clone());
        router
            .registry()
            .register(on_command("work").handler(move || {
                let (running, peak) = (r.clone(), p.clone());
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    "done"
                }
            }))
            .unwrap();
        let strategy = Arc::new(WebhookStrategy::new());
        strategy.setup(Arc::new(router)).await.unwrap();

        let replies = futures::future::join_all(
            ["1", "2", "3"].map(|id| {
                let strategy = strategy.clone();
                async move { strategy.handle(request(id, "work")).await }
            }),
        )
        .await;

        for reply in replies {
            assert_eq!(reply.body["data"]["content"], json!("done"));
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_handler_is_stopped() {
        let profile = ConstraintProfile {
            supports_background_execution: false,
            ..ConstraintProfile::PERMISSIVE
        };
        let router = router(profile);
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
        let strategy = WebhookStrategy::new();
        strategy.setup(Arc::new(router.clone())).await.unwrap();

        let reply = strategy.handle(request("9", "slow")).await;
        assert_eq!(reply.body["data"]["flags"], json!(64));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert_eq!(router.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_reply_survives_shutdown() {
        let router = router(ConstraintProfile::PERMISSIVE);
        router
            .registry()
            .register(on_command("forever").handler(|| async {
                std::future::pending::<()>().await;
                "never"
            }))
            .unwrap();
        let outbound = RecordingOutbound::new();
        let strategy = WebhookStrategy::new().with_outbound(Arc::new(outbound.clone()));
        strategy.setup(Arc::new(router.clone())).await.unwrap();

        let reply = strategy.handle(request("9", "forever")).await;
        assert_eq!(reply, RawResponse::ok(json!({ "type": 5 })));
        assert_eq!(strategy.pending_followups(), 1);

        tokio::time::timeout(Duration::from_secs(60), async {
            strategy.teardown().await;
            router.shutdown(Duration::from_millis(500)).await;
            strategy.drain().await;
        })
        .await
        .unwrap();

        assert_eq!(
            outbound.calls(),
            vec![OutboundCall::Followup {
                token: "tok-9".to_string(),
                body: json!({
                    "content": "Something went wrong while handling this interaction.",
                    "flags": 64
                }),
            }]
        );
    }

    /// Fails every dispatch at the router level after a delay.
    struct BrokenRouter {
        delay: Duration,
    }

    #[async_trait]
    impl Dispatch for BrokenRouter {
        async fn dispatch(&self, _: Interaction) -> Result<DispatchOutcome, RouterError> {
            tokio::time::sleep(self.delay).await;
            Err(RouterError::StoreCorrupted("lineage".to_string()))
        }

        fn abandon(&self, _: &InteractionId) -> bool {
            false
        }

        fn profile(&self) -> ConstraintProfile {
            ConstraintProfile::PERMISSIVE
        }

        fn required_scopes(&self) -> ScopeSet {
            ScopeSet::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn router_failure_after_deferral_is_followed_up() {
        let outbound = RecordingOutbound::new();
        let strategy = WebhookStrategy::new().with_outbound(Arc::new(outbound.clone()));
        strategy
            .setup(Arc::new(BrokenRouter {
                delay: Duration::from_secs(5),
            }))
            .await
            .unwrap();

        let reply = strategy.handle(request("9", "anything")).await;
        assert_eq!(reply, RawResponse::ok(json!({ "type": 5 })));

        let calls = outbound.wait_for(1).await;
        assert_eq!(
            calls[0],
            OutboundCall::Followup {
                token: "tok-9".to_string(),
                body: json!({
                    "content": "Something went wrong while handling this interaction.",
                    "flags": 64
                }),
            }
        );
    }

    #[tokio::test]
    async fn teardown_stops_intake() {
        let strategy = WebhookStrategy::new();
        strategy
            .setup(Arc::new(router(ConstraintProfile::PERMISSIVE)))
            .await
            .unwrap();
        strategy.teardown().await;
        strategy.teardown().await;

        let reply = strategy.handle(request("1", "ping")).await;
        assert_eq!(reply.status, ReplyStatus::ServiceUnavailable);
    }
}
