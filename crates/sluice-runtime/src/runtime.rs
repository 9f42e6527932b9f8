//! Process orchestration.
//!
//! [`SluiceRuntime`] owns the registry, context store and router, wires
//! delivery strategies to the router, and shuts everything down in order.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use sluice_runtime::SluiceRuntime;
//!
//! // Loads sluice.toml / SLUICE_* from the current directory
//! let runtime = SluiceRuntime::new();
//! runtime.register(on_command("ping").handler(|| async { "pong" }))?;
//! runtime.run().await?;
//!
//! // Custom configuration
//! let runtime = SluiceRuntime::builder()
//!     .config_file("deploy/sluice.toml")
//!     .profile("production")
//!     .build()?;
//! ```
//!
//! # Shutdown order
//!
//! 1. Stop accepting webhook requests
//! 2. Tear down every strategy (no new interactions)
//! 3. Give in-flight dispatches the configured grace period
//! 4. Let strategies send the replies they still owe
//! 5. Stop the session sweeper
//! 6. Dispose every handler instance's timers and subscriptions
//!
//! A router failure also triggers this sequence, and `run` returns it.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sluice_core::{BoxedDispatch, BoxedStrategy, ConstraintProfile, OutboundApi};
use sluice_delivery::{SharedSecretVerifier, WebhookStrategy};
use sluice_framework::{
    ContextStore, HandlerRegistration, HandlerRegistry, LifecycleManager, Router, RouterOptions,
};

use crate::config::{ConfigLoader, SluiceConfig, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::host::detect_host;
use crate::logging;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Running,
    Stopped,
}

struct Sweeper {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// The Sluice runtime.
///
/// ```rust,ignore
/// let runtime = SluiceRuntime::from_config(&load_config()?)?;
/// runtime.register_all([
///     on_command("setup").handler(open_form),
///     on_form_submit("setup_form").handler(save_form),
/// ])?;
/// runtime.run().await?;
/// ```
pub struct SluiceRuntime {
    config: SluiceConfig,
    host: String,
    lifecycle: Arc<LifecycleManager>,
    registry: Arc<HandlerRegistry>,
    store: Arc<ContextStore>,
    router: Router,
    /// Every strategy, in the order it was added.
    strategies: Mutex<Vec<BoxedStrategy>>,
    /// Strategies whose setup succeeded.
    active: Mutex<Vec<BoxedStrategy>>,
    webhook: Option<Arc<WebhookStrategy>>,
    sweeper: Mutex<Option<Sweeper>>,
    state: Mutex<RunState>,
    #[cfg(feature = "http-server")]
    listener: Mutex<Option<sluice_transport::ListenerHandle>>,
}

impl SluiceRuntime {
    /// Creates a runtime from `sluice.*` in the current directory and the
    /// `SLUICE_*` environment, falling back to defaults if that fails.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .load()
            .map_err(RuntimeError::from)
            .and_then(|config| {
                validate_config(&config)?;
                Ok(config)
            })
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                SluiceConfig::default()
            });

        Self::assemble(config, None, Vec::new())
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from an already loaded configuration.
    ///
    /// Initializes logging, selects the constraint profile and builds the
    /// strategies enabled in `config`.
    pub fn from_config(config: &SluiceConfig) -> RuntimeResult<Self> {
        validate_config(config)?;
        Ok(Self::assemble(config.clone(), None, Vec::new()))
    }

    fn assemble(
        config: SluiceConfig,
        profile_override: Option<ConstraintProfile>,
        extra: Vec<BoxedStrategy>,
    ) -> Self {
        logging::init_from_config(&config.logging);

        let host = config
            .host
            .name
            .clone()
            .unwrap_or_else(|| detect_host().as_str().to_string());
        let profile = profile_override.unwrap_or_else(|| config.host.constraint_profile(&host));

        let lifecycle = Arc::new(LifecycleManager::new());
        let registry = Arc::new(HandlerRegistry::new(Arc::clone(&lifecycle)));
        let store = Arc::new(ContextStore::new(config.sessions.default_ttl()));
        let router = Router::with_options(
            Arc::clone(&registry),
            Arc::clone(&store),
            profile,
            RouterOptions {
                dedup_window: config.dispatch.dedup_window(),
            },
        );

        let (mut strategies, webhook) = configured_strategies(&config);
        strategies.extend(extra);

        info!(
            host = %host,
            log_level = %config.logging.level,
            max_execution_time = ?profile.max_execution_time,
            background = profile.supports_background_execution,
            persistent = profile.supports_persistent_connection,
            strategies = strategies.len(),
            "Runtime initialized from configuration"
        );

        Self {
            config,
            host,
            lifecycle,
            registry,
            store,
            router,
            strategies: Mutex::new(strategies),
            active: Mutex::new(Vec::new()),
            webhook,
            sweeper: Mutex::new(None),
            state: Mutex::new(RunState::Idle),
            #[cfg(feature = "http-server")]
            listener: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SluiceConfig {
        &self.config
    }

    /// Host identifier the constraint profile was selected for.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn profile(&self) -> ConstraintProfile {
        self.router.profile()
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The webhook strategy built from `[webhook]`, if enabled.
    ///
    /// On hosts that own the HTTP layer, pass requests to its
    /// [`handle`](sluice_core::RequestHandler::handle) directly.
    pub fn webhook(&self) -> Option<Arc<WebhookStrategy>> {
        self.webhook.clone()
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock() == RunState::Running
    }

    pub fn strategy_count(&self) -> usize {
        self.strategies.lock().len()
    }

    /// Number of strategies currently set up.
    pub fn active_strategy_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Address of the webhook listener while it is running.
    #[cfg(feature = "http-server")]
    pub fn webhook_addr(&self) -> Option<std::net::SocketAddr> {
        self.listener.lock().as_ref().map(|l| l.local_addr())
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Registers a handler.
    ///
    /// Registering after [`start`](Self::start) works, but a push channel
    /// that is already connected keeps the scopes it connected with.
    pub fn register(
        &self,
        registration: HandlerRegistration,
    ) -> RuntimeResult<Arc<HandlerRegistration>> {
        let registration = self.registry.register(registration)?;
        if self.is_running() {
            debug!(
                routing_key = %registration.routing_key(),
                "Registered while running; connected channels keep their scopes"
            );
        }
        Ok(registration)
    }

    /// Registers several handlers, stopping at the first collision.
    pub fn register_all<I>(&self, registrations: I) -> RuntimeResult<()>
    where
        I: IntoIterator<Item = HandlerRegistration>,
    {
        for registration in registrations {
            self.register(registration)?;
        }
        Ok(())
    }

    /// Removes every registration under `routing_key` and disposes its
    /// resources.
    pub fn deregister(&self, routing_key: &str) -> usize {
        self.registry.deregister(routing_key)
    }

    /// Adds a strategy. If the runtime is running it is set up right away.
    pub async fn add_strategy(&self, strategy: BoxedStrategy) {
        self.strategies.lock().push(Arc::clone(&strategy));
        if self.is_running() {
            self.setup_strategy(strategy).await;
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts the sweeper and sets up every strategy.
    ///
    /// A strategy whose setup fails is logged and skipped; the others keep
    /// running.
    pub async fn start(&self) -> RuntimeResult<()> {
        {
            let mut state = self.state.lock();
            match *state {
                RunState::Running => {
                    warn!("Runtime is already running");
                    return Ok(());
                }
                RunState::Stopped => return Err(RuntimeError::ShutDown),
                RunState::Idle => *state = RunState::Running,
            }
        }

        info!(host = %self.host, "Starting Sluice runtime");

        let cancel = CancellationToken::new();
        let task = self
            .store
            .spawn_sweeper(self.config.sessions.sweep_interval(), cancel.clone());
        *self.sweeper.lock() = Some(Sweeper { cancel, task });

        let strategies: Vec<_> = self.strategies.lock().clone();
        for strategy in strategies {
            self.setup_strategy(strategy).await;
        }

        #[cfg(feature = "http-server")]
        self.bind_webhook_listener().await;

        info!(
            active = self.active_strategy_count(),
            handlers = self.registry.len(),
            "Runtime started"
        );
        Ok(())
    }

    async fn setup_strategy(&self, strategy: BoxedStrategy) {
        let dispatch: BoxedDispatch = Arc::new(self.router.clone());
        match strategy.setup(dispatch).await {
            Ok(()) => {
                info!(strategy = strategy.name(), "Strategy set up");
                self.active.lock().push(strategy);
            }
            Err(e) => {
                error!(strategy = strategy.name(), error = %e, "Strategy setup failed, skipping");
            }
        }
    }

    #[cfg(feature = "http-server")]
    async fn bind_webhook_listener(&self) {
        use sluice_core::RequestHandler;
        use sluice_transport::WebhookListener;

        let Some(webhook) = self.webhook.clone() else {
            return;
        };
        let is_active = self
            .active
            .lock()
            .iter()
            .any(|s| std::ptr::addr_eq(Arc::as_ptr(s), Arc::as_ptr(&webhook)));
        if !is_active {
            return;
        }

        let handler: Arc<dyn RequestHandler> = webhook;
        match WebhookListener::bind(&self.config.webhook.bind, &self.config.webhook.path, handler)
            .await
        {
            Ok(listener) => *self.listener.lock() = Some(listener),
            Err(e) => error!(
                bind = %self.config.webhook.bind,
                error = %e,
                "Failed to bind webhook listener"
            ),
        }
    }

    /// Stops the runtime. The runtime cannot be started again afterwards.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if *state != RunState::Running {
                warn!("Runtime is not running");
                *state = RunState::Stopped;
                return;
            }
            *state = RunState::Stopped;
        }

        info!("Stopping Sluice runtime");

        #[cfg(feature = "http-server")]
        {
            let listener = self.listener.lock().take();
            if let Some(listener) = listener {
                listener.stop().await;
            }
        }

        let active: Vec<_> = self.active.lock().drain(..).collect();
        for strategy in active.iter().rev() {
            strategy.teardown().await;
            debug!(strategy = strategy.name(), "Strategy torn down");
        }

        self.router.shutdown(self.config.dispatch.shutdown_grace()).await;

        for strategy in &active {
            strategy.drain().await;
        }

        let sweeper = self.sweeper.lock().take();
        if let Some(Sweeper { cancel, task }) = sweeper {
            cancel.cancel();
            let _ = task.await;
        }

        let disposed = self.lifecycle.dispose_all();
        info!(disposed, "Runtime stopped");
    }

    /// Runs until Ctrl+C or SIGTERM, then shuts down.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start().await?;
        info!("Sluice runtime is now running. Press Ctrl+C to stop.");

        let waited = tokio::select! {
            waited = wait_for_shutdown() => waited,
            err = self.router.failed() => Err(RuntimeError::Router(err)),
        };
        self.shutdown().await;
        waited
    }

    /// Runs until `shutdown` completes or the router fails, then shuts
    /// down.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        let result = tokio::select! {
            () = shutdown => Ok(()),
            err = self.router.failed() => Err(RuntimeError::Router(err)),
        };
        self.shutdown().await;
        result
    }
}

impl Default for SluiceRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for Ctrl+C or SIGTERM.
async fn wait_for_shutdown() -> RuntimeResult<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .map_err(RuntimeError::Signal)?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result.map_err(RuntimeError::Signal)?;
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.map_err(RuntimeError::Signal)?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}

// =============================================================================
// Strategies from configuration
// =============================================================================

#[allow(unused_mut)]
fn configured_strategies(config: &SluiceConfig) -> (Vec<BoxedStrategy>, Option<Arc<WebhookStrategy>>) {
    let mut strategies: Vec<BoxedStrategy> = Vec::new();
    let outbound = configured_outbound(config);

    if config.gateway.enabled {
        #[cfg(feature = "ws-client")]
        match (&outbound, config.gateway.token.as_deref()) {
            (Some(outbound), Some(token)) => {
                use sluice_delivery::GatewayStrategy;
                use sluice_transport::{WsGatewayConfig, WsGatewayConnector};

                let connector =
                    WsGatewayConnector::new(WsGatewayConfig::new(&config.gateway.url, token));
                let gateway = GatewayStrategy::new(Arc::new(connector), Arc::clone(outbound))
                    .with_options(config.gateway.to_options());
                strategies.push(Arc::new(gateway));
            }
            (None, _) => warn!("Gateway enabled but no outbound API is configured, skipping"),
            (_, None) => warn!("Gateway enabled without a token, skipping"),
        }

        #[cfg(not(feature = "ws-client"))]
        warn!("Gateway enabled but the ws-client feature is disabled, skipping");
    }

    let mut webhook = None;
    if config.webhook.enabled {
        let mut strategy =
            WebhookStrategy::new().with_response_deadline(config.webhook.response_deadline());
        if let Some(outbound) = &outbound {
            strategy = strategy.with_outbound(Arc::clone(outbound));
        }
        if let Some(secret) = &config.webhook.secret {
            strategy = strategy.with_verifier(Arc::new(SharedSecretVerifier::new(
                &config.webhook.secret_header,
                secret,
            )));
        }
        let strategy = Arc::new(strategy);
        strategies.push(strategy.clone());
        webhook = Some(strategy);
    }

    (strategies, webhook)
}

#[cfg(feature = "http-client")]
fn configured_outbound(config: &SluiceConfig) -> Option<Arc<dyn OutboundApi>> {
    use std::time::Duration;

    use sluice_transport::{HttpOutboundApi, HttpOutboundConfig};

    let application_id = config.api.application_id.as_deref()?;
    let http_config = HttpOutboundConfig {
        base_url: config.api.base_url.clone(),
        application_id: application_id.to_string(),
        timeout: Duration::from_millis(config.api.timeout_ms),
    };
    match HttpOutboundApi::new(http_config) {
        Ok(api) => Some(Arc::new(api)),
        Err(e) => {
            error!(error = %e, "Failed to build outbound API client");
            None
        }
    }
}

#[cfg(not(feature = "http-client"))]
fn configured_outbound(config: &SluiceConfig) -> Option<Arc<dyn OutboundApi>> {
    if config.api.application_id.is_some() {
        warn!("API configured but the http-client feature is disabled");
    }
    None
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`SluiceRuntime`] with custom configuration.
///
/// ```rust,ignore
/// let runtime = SluiceRuntime::builder()
///     .profile("production")
///     .constraint_profile(Host::CloudflareWorkers.profile())
///     .strategy(Arc::new(my_strategy))
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    constraint_profile: Option<ConstraintProfile>,
    strategies: Vec<BoxedStrategy>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            constraint_profile: None,
            strategies: Vec::new(),
        }
    }

    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g. "development", "production").
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    pub fn merge(mut self, config: SluiceConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Uses `profile` instead of looking one up for the host.
    pub fn constraint_profile(mut self, profile: ConstraintProfile) -> Self {
        self.constraint_profile = Some(profile);
        self
    }

    /// Adds a strategy next to those enabled in configuration.
    pub fn strategy(mut self, strategy: BoxedStrategy) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn build(self) -> RuntimeResult<SluiceRuntime> {
        let config = self.config_loader.load()?;
        validate_config(&config)?;
        Ok(SluiceRuntime::assemble(
            config,
            self.constraint_profile,
            self.strategies,
        ))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{Value, json};
    use sluice_core::{InteractionId, RawRequest, ReplyStatus, RequestHandler, RouterError};
    use sluice_delivery::{GatewayOptions, GatewayStrategy};
    use sluice_framework::{Lifecycle, on_command, on_form_submit};
    use sluice_transport::{MemoryGateway, OutboundCall, RecordingOutbound};

    use super::*;
    use crate::config::ProfileOverride;

    fn command(id: &str, name: &str) -> Value {
        json!({
            "id": id,
            "type": 2,
            "token": format!("tok-{id}"),
            "user": { "id": "u1" },
            "data": { "name": name }
        })
    }

    fn gateway_strategy(gateway: &MemoryGateway, outbound: &RecordingOutbound) -> BoxedStrategy {
        Arc::new(
            GatewayStrategy::new(Arc::new(gateway.clone()), Arc::new(outbound.clone()))
                .with_options(GatewayOptions {
                    initial_delay: Duration::from_millis(10),
                    ..Default::default()
                }),
        )
    }

    fn runtime(config: SluiceConfig) -> SluiceRuntime {
        SluiceRuntime::from_config(&config).unwrap()
    }

    fn server_config() -> SluiceConfig {
        let mut config = SluiceConfig::default();
        config.host.name = Some("server".to_string());
        config
    }

    #[tokio::test]
    async fn gateway_strategy_delivers_through_the_router() {
        let runtime = runtime(server_config());
        runtime
            .register(on_command("ping").handler(|| async { "pong" }))
            .unwrap();

        let gateway = MemoryGateway::new();
        let outbound = RecordingOutbound::new();
        runtime
            .add_strategy(gateway_strategy(&gateway, &outbound))
            .await;
        runtime.start().await.unwrap();
        assert!(runtime.is_running());
        assert_eq!(runtime.active_strategy_count(), 1);

        gateway.push(command("1", "ping"));
        let calls = outbound.wait_for(1).await;
        assert!(matches!(&calls[0], OutboundCall::Callback { token, .. } if token == "tok-1"));

        runtime.shutdown().await;
        assert!(!runtime.is_running());
        assert_eq!(runtime.active_strategy_count(), 0);
    }

    #[tokio::test]
    async fn failing_setup_skips_only_that_strategy() {
        let mut config = server_config();
        config.webhook.enabled = true;
        config.webhook.bind = "127.0.0.1:0".to_string();
        config.host.profile = Some(ProfileOverride {
            max_execution_time_ms: Some(10_000),
            supports_background_execution: false,
            supports_persistent_connection: false,
            supports_file_system: false,
            max_concurrent_operations: None,
        });
        let runtime = runtime(config);
        runtime
            .register(on_command("ping").handler(|| async { "pong" }))
            .unwrap();

        let gateway = MemoryGateway::new();
        let outbound = RecordingOutbound::new();
        runtime
            .add_strategy(gateway_strategy(&gateway, &outbound))
            .await;
        runtime.start().await.unwrap();

        assert_eq!(runtime.strategy_count(), 2);
        assert_eq!(runtime.active_strategy_count(), 1);
        assert_eq!(gateway.connect_count(), 0);

        let webhook = runtime.webhook().unwrap();
        let reply = webhook
            .handle(RawRequest::new(command("2", "ping").to_string()))
            .await;
        assert_eq!(reply.status, ReplyStatus::Ok);
        assert_eq!(reply.body["data"]["content"], "pong");

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_disposes_handler_resources() {
        let runtime = runtime(server_config());
        let registration = runtime
            .register(on_command("timer").handler(|lifecycle: Lifecycle| async move {
                lifecycle.spawn_timer(Duration::from_secs(3600), async {});
            }))
            .unwrap();
        let webhook = Arc::new(WebhookStrategy::new());
        runtime.add_strategy(webhook.clone()).await;
        runtime.start().await.unwrap();

        webhook
            .handle(RawRequest::new(command("3", "timer").to_string()))
            .await;
        assert_eq!(runtime.lifecycle().resource_count(registration.instance()), 1);

        runtime.shutdown().await;
        assert!(!runtime.lifecycle().is_tracked(registration.instance()));
    }

    #[tokio::test]
    async fn cannot_restart_after_shutdown() {
        let runtime = runtime(server_config());
        runtime.start().await.unwrap();
        runtime.start().await.unwrap();
        runtime.shutdown().await;
        assert!(matches!(
            runtime.start().await,
            Err(RuntimeError::ShutDown)
        ));
    }

    #[tokio::test]
    async fn run_until_stops_when_the_future_completes() {
        let runtime = runtime(server_config());
        runtime.run_until(async {}).await.unwrap();
        assert!(!runtime.is_running());
    }

    #[tokio::test]
    async fn router_failure_stops_the_runtime() {
        let runtime = runtime(server_config());
        runtime
            .register(on_form_submit("survey-form").handler(|| async { "ok" }))
            .unwrap();
        runtime
            .store()
            .link_dangling(&InteractionId::from("100"), "gone");

        let gateway = MemoryGateway::new();
        let outbound = RecordingOutbound::new();
        runtime
            .add_strategy(gateway_strategy(&gateway, &outbound))
            .await;

        let submit = json!({
            "id": "101",
            "type": 5,
            "token": "tok-101",
            "parent_interaction_id": "100",
            "user": { "id": "u1" },
            "data": { "custom_id": "survey-form", "components": [] }
        });
        let err = runtime
            .run_until(async {
                gateway.wait_for_connections(1).await;
                gateway.push(submit);
                std::future::pending::<()>().await;
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RuntimeError::Router(RouterError::StoreCorrupted(_))));
        assert!(!runtime.is_running());
        let calls = outbound.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].body()["data"]["flags"], json!(64));
    }

    #[test]
    fn builder_profile_override_wins() {
        let profile = ConstraintProfile {
            max_concurrent_operations: Some(3),
            ..ConstraintProfile::PERMISSIVE
        };
        let runtime = SluiceRuntime::builder()
            .without_env()
            .merge(server_config())
            .constraint_profile(profile)
            .build()
            .unwrap();
        assert_eq!(runtime.profile(), profile);
        assert_eq!(runtime.host(), "server");
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let mut config = SluiceConfig::default();
        config.sessions.default_ttl_secs = 0;
        assert!(matches!(
            SluiceRuntime::from_config(&config),
            Err(RuntimeError::Config(_))
        ));
    }
}
