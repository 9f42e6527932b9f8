//! Push-channel delivery strategy.
//!
//! Holds one long-lived connection. Events are normalized and handed to the
//! dispatcher strictly in arrival order; the dispatches themselves run
//! concurrently and answer through the outbound API. A dropped connection
//! is re-established with exponential backoff. Events missed while
//! disconnected are not replayed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use sluice_core::{
    BoxedDispatch, DeliveryStrategy, EventStream, GatewayConnector, Interaction,
    OutboundApi, ReplyStatus, ScopeSet, SetupError, WireCodec,
};

use crate::codec::InteractionCodec;

/// Reconnect and reply timing for [`GatewayStrategy`].
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound on the reconnect delay.
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Consecutive failed reconnects before giving up. `None` retries forever.
    pub max_retries: Option<u32>,
    /// How long before the ack deadline a slow dispatch is deferred.
    pub defer_margin: Duration,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            max_retries: None,
            defer_margin: Duration::from_millis(500),
        }
    }
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Delivery over a persistent push channel.
pub struct GatewayStrategy {
    connector: Arc<dyn GatewayConnector>,
    outbound: Arc<dyn OutboundApi>,
    codec: Arc<InteractionCodec>,
    options: GatewayOptions,
    running: Mutex<Option<Running>>,
    replies: TaskTracker,
}

impl GatewayStrategy {
    pub fn new(connector: Arc<dyn GatewayConnector>, outbound: Arc<dyn OutboundApi>) -> Self {
        Self {
            connector,
            outbound,
            codec: Arc::new(InteractionCodec::new()),
            options: GatewayOptions::default(),
            running: Mutex::new(None),
            replies: TaskTracker::new(),
        }
    }

    pub fn with_codec(mut self, codec: InteractionCodec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    pub fn with_options(mut self, options: GatewayOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns `true` while the connection loop is running.
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    /// Replies still being sent.
    pub fn pending_replies(&self) -> usize {
        self.replies.len()
    }
}

#[async_trait]
impl DeliveryStrategy for GatewayStrategy {
    fn name(&self) -> &'static str {
        "gateway"
    }

    async fn setup(&self, dispatch: BoxedDispatch) -> Result<(), SetupError> {
        if !dispatch.profile().supports_persistent_connection {
            return Err(SetupError::Unsupported {
                strategy: self.name(),
                reason: "host does not allow persistent connections",
            });
        }
        if self.running.lock().is_some() {
            return Err(SetupError::AlreadySetUp(self.name()));
        }

        let scopes = dispatch.required_scopes();
        let events = self.connector.connect(&scopes).await?;
        info!(strategy = self.name(), intents = scopes.intents(), "Push channel connected");

        let cancel = CancellationToken::new();
        self.replies.reopen();
        let connection = Connection {
            connector: self.connector.clone(),
            outbound: self.outbound.clone(),
            codec: self.codec.clone(),
            options: self.options.clone(),
            dispatch,
            scopes,
            cancel: cancel.clone(),
            replies: self.replies.clone(),
        };
        let task = tokio::spawn(connection.run(events));

        let mut running = self.running.lock();
        if running.is_some() {
            cancel.cancel();
            return Err(SetupError::AlreadySetUp(self.name()));
        }
        *running = Some(Running { cancel, task });
        Ok(())
    }

    async fn teardown(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = running.task.await {
            error!(strategy = self.name(), error = %e, "Push channel task failed");
        }
        info!(
            strategy = self.name(),
            pending_replies = self.replies.len(),
            "Push channel closed"
        );
    }

    async fn drain(&self) {
        self.replies.close();
        self.replies.wait().await;
        debug!(strategy = self.name(), "Replies drained");
    }
}

/// State owned by the connection loop.
struct Connection {
    connector: Arc<dyn GatewayConnector>,
    outbound: Arc<dyn OutboundApi>,
    codec: Arc<InteractionCodec>,
    options: GatewayOptions,
    dispatch: BoxedDispatch,
    scopes: ScopeSet,
    cancel: CancellationToken,
    replies: TaskTracker,
}

impl Connection {
    async fn run(self, mut events: EventStream) {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                event = events.next() => match event {
                    Some(Ok(raw)) => self.hand_off(raw),
                    Some(Err(e)) => warn!(error = %e, "Push channel error"),
                    None => {
                        info!("Push channel dropped");
                        match self.reconnect().await {
                            Some(next) => events = next,
                            None => break,
                        }
                    }
                },
            }
        }
        self.replies.close();
        debug!(pending = self.replies.len(), "Push channel loop stopped");
    }

    /// Normalizes one event and starts its dispatch. Runs on the loop task,
    /// so hand-off order is arrival order.
    fn hand_off(&self, raw: serde_json::Value) {
        let interaction = match self.codec.normalize(raw, Instant::now()) {
            Ok(interaction) => interaction,
            Err(e) => {
                warn!(error = %e, "Dropping malformed push-channel event");
                return;
            }
        };
        debug!(
            interaction_id = %interaction.id(),
            kind = %interaction.kind(),
            routing_key = %interaction.routing_key(),
            "Push-channel interaction received"
        );

        let dispatch = self.dispatch.clone();
        let outbound = self.outbound.clone();
        let codec = self.codec.clone();
        let defer_margin = self.options.defer_margin;
        self.replies.spawn(async move {
            reply(dispatch, outbound, codec, interaction, defer_margin).await;
        });
    }

    /// Reconnects with exponential backoff. Returns `None` on cancellation
    /// or once the retry limit is reached.
    async fn reconnect(&self) -> Option<EventStream> {
        let mut delay = self.options.initial_delay;
        let mut retry_count = 0u32;

        loop {
            if let Some(max) = self.options.max_retries
                && retry_count >= max
            {
                error!(retries = retry_count, "Max retries reached, giving up");
                return None;
            }

            warn!(delay = ?delay, "Reconnecting...");
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = sleep(delay) => {}
            }

            match self.connector.connect(&self.scopes).await {
                Ok(events) => {
                    info!("Reconnected successfully");
                    return Some(events);
                }
                Err(e) => {
                    warn!(error = %e, "Reconnection failed");
                    retry_count += 1;
                    delay = std::cmp::min(
                        Duration::from_secs_f64(
                            delay.as_secs_f64() * self.options.backoff_multiplier,
                        ),
                        self.options.max_delay,
                    );
                }
            }
        }
    }
}

/// Dispatches one interaction and answers it through the outbound API.
///
/// If the outcome is not ready shortly before the ack deadline and the host
/// allows background work, a deferred callback goes out first and the real
/// reply follows as a follow-up.
async fn reply(
    dispatch: BoxedDispatch,
    outbound: Arc<dyn OutboundApi>,
    codec: Arc<InteractionCodec>,
    interaction: Interaction,
    defer_margin: Duration,
) {
    let id = interaction.id().clone();
    let Some(token) = interaction.callback_token().map(str::to_string) else {
        warn!(interaction_id = %id, "Interaction has no callback token, not replying");
        match dispatch.dispatch(interaction).await {
            Ok(outcome) => debug!(interaction_id = %id, outcome = outcome.label(), "Dispatched"),
            Err(e) => error!(interaction_id = %id, error = %e, "Dispatch failed at the router"),
        }
        return;
    };
    let defer_at = interaction
        .ack_deadline()
        .checked_sub(defer_margin)
        .unwrap_or_else(|| interaction.received_at());
    let can_defer = dispatch.profile().supports_background_execution;

    let pending = dispatch.dispatch(interaction.clone());
    tokio::pin!(pending);

    let (outcome, deferred) = tokio::select! {
        outcome = &mut pending => (outcome, false),
        _ = sleep_until(defer_at), if can_defer => {
            debug!(interaction_id = %id, "Dispatch is slow, deferring reply");
            if let Err(e) = outbound
                .send_callback(&id, &token, InteractionCodec::deferred(&interaction))
                .await
            {
                warn!(interaction_id = %id, error = %e, "Failed to send deferred callback");
            }
            ((&mut pending).await, true)
        }
    };

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(interaction_id = %id, error = %e, "Dispatch failed at the router");
            let result = if deferred {
                outbound.send_followup(&token, codec.failure_followup()).await
            } else {
                outbound
                    .send_callback(&id, &token, codec.failure_callback(&interaction))
                    .await
            };
            if let Err(e) = result {
                warn!(interaction_id = %id, error = %e, "Failed to send failure reply");
            }
            return;
        }
    };

    let result = if deferred {
        outbound
            .send_followup(&token, codec.followup_body(&outcome))
            .await
    } else {
        let raw = codec.denormalize(&interaction, &outcome);
        if raw.status != ReplyStatus::Ok {
            debug!(
                interaction_id = %id,
                outcome = outcome.label(),
                "No callback for unhandled interaction"
            );
            return;
        }
        outbound.send_callback(&id, &token, raw.body).await
    };

    match result {
        Ok(()) => debug!(interaction_id = %id, outcome = outcome.label(), deferred, "Reply sent"),
        Err(e) => warn!(interaction_id = %id, error = %e, "Failed to send reply"),
    }
}
