//! Registration builders.
//!
//! Each `on_*` function starts a [`RegistrationBuilder`] for one interaction
//! kind and routing key. Options and tower layers are added on the builder;
//! `.handler(f)` or `.service(s)` finishes it into a
//! [`HandlerRegistration`].
//!
//! # Example
//!
//! ```rust,ignore
//! use sluice::prelude::*;
//!
//! registry.register(on_command("ping").handler(|| async { "pong" }))?;
//!
//! registry.register(
//!     on_component_matching(Regex::new(r"^page-\d+$")?)
//!         .expected_duration(Duration::from_millis(300))
//!         .handler(turn_page),
//! )?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service, ServiceBuilder};
use tower_layer::{Identity, Stack};

use sluice_core::{BoxError, InteractionKind, Response, Scope, ScopeSet};

use crate::context::HandlerContext;
use crate::handler::{Handler, HandlerService};
use crate::registry::{HandlerRegistration, RoutingKey};

/// Builds one [`HandlerRegistration`].
pub struct RegistrationBuilder<L = Identity> {
    kind: InteractionKind,
    routing_key: RoutingKey,
    expected_duration: Option<Duration>,
    scopes: ScopeSet,
    builder: ServiceBuilder<L>,
}

impl RegistrationBuilder {
    pub fn new(kind: InteractionKind, routing_key: impl Into<RoutingKey>) -> Self {
        Self {
            kind,
            routing_key: routing_key.into(),
            expected_duration: None,
            scopes: ScopeSet::new(),
            builder: ServiceBuilder::new(),
        }
    }
}

impl<L> RegistrationBuilder<L> {
    /// Declares how long the handler may take. On hosts without background
    /// execution a declaration above the execution ceiling is rejected
    /// before the handler runs.
    pub fn expected_duration(mut self, duration: Duration) -> Self {
        self.expected_duration = Some(duration);
        self
    }

    /// Requests scopes beyond the inferred ones.
    pub fn scopes(mut self, scopes: impl IntoIterator<Item = Scope>) -> Self {
        self.scopes.extend(scopes);
        self
    }

    /// Wraps the handler in a tower layer. Layers added first are outermost.
    pub fn layer<T>(self, layer: T) -> RegistrationBuilder<Stack<T, L>> {
        RegistrationBuilder {
            kind: self.kind,
            routing_key: self.routing_key,
            expected_duration: self.expected_duration,
            scopes: self.scopes,
            builder: self.builder.layer(layer),
        }
    }

    /// Finishes with a handler function.
    pub fn handler<H, T>(self, handler: H) -> HandlerRegistration
    where
        H: Handler<T>,
        T: 'static,
        L: Layer<HandlerService<H, T>>,
        L::Service: Service<Arc<HandlerContext>, Response = Response, Error = BoxError>
            + Clone
            + Send
            + Sync
            + 'static,
        <L::Service as Service<Arc<HandlerContext>>>::Future: Send + 'static,
    {
        self.service(HandlerService::new(handler))
    }

    /// Finishes with an arbitrary tower service.
    pub fn service<S>(self, service: S) -> HandlerRegistration
    where
        L: Layer<S>,
        L::Service: Service<Arc<HandlerContext>, Response = Response, Error = BoxError>
            + Clone
            + Send
            + Sync
            + 'static,
        <L::Service as Service<Arc<HandlerContext>>>::Future: Send + 'static,
    {
        let service = self.builder.service(service);
        HandlerRegistration::new(
            self.kind,
            self.routing_key,
            self.scopes,
            self.expected_duration,
            BoxCloneSyncService::new(service),
        )
    }
}

/// Slash command `name`.
pub fn on_command(name: impl Into<String>) -> RegistrationBuilder {
    RegistrationBuilder::new(InteractionKind::Command, name.into())
}

/// Component (button, select menu) with custom id `id`.
pub fn on_component(id: impl Into<String>) -> RegistrationBuilder {
    RegistrationBuilder::new(InteractionKind::Component, id.into())
}

/// Form submission with custom id `id`.
pub fn on_form_submit(id: impl Into<String>) -> RegistrationBuilder {
    RegistrationBuilder::new(InteractionKind::FormSubmit, id.into())
}

/// Autocomplete for command `name`.
pub fn on_autocomplete(name: impl Into<String>) -> RegistrationBuilder {
    RegistrationBuilder::new(InteractionKind::Autocomplete, name.into())
}

/// Commands whose name matches `pattern`.
pub fn on_command_matching(pattern: Regex) -> RegistrationBuilder {
    RegistrationBuilder::new(InteractionKind::Command, pattern)
}

/// Components whose custom id matches `pattern`.
pub fn on_component_matching(pattern: Regex) -> RegistrationBuilder {
    RegistrationBuilder::new(InteractionKind::Component, pattern)
}

/// Form submissions whose custom id matches `pattern`.
pub fn on_form_submit_matching(pattern: Regex) -> RegistrationBuilder {
    RegistrationBuilder::new(InteractionKind::FormSubmit, pattern)
}

/// Autocomplete for commands whose name matches `pattern`.
pub fn on_autocomplete_matching(pattern: Regex) -> RegistrationBuilder {
    RegistrationBuilder::new(InteractionKind::Autocomplete, pattern)
}

#[cfg(test)]
mod tests {
    use tower::ServiceExt;
    use tower::util::MapResponseLayer;

    use sluice_core::{Interaction, Response};

    use super::*;
    use crate::context::Session;
    use crate::lifecycle::{Lifecycle, LifecycleManager};
    use crate::store::ContextStore;

    fn ctx(kind: InteractionKind, key: &str) -> Arc<HandlerContext> {
        let interaction = Interaction::builder("1", kind, key, "u1").build();
        let session = Session::new(Arc::new(ContextStore::default()), None, &interaction);
        let lifecycle = Lifecycle::new(
            crate::lifecycle::InstanceId::next(),
            Arc::new(LifecycleManager::new()),
        );
        Arc::new(HandlerContext::new(Arc::new(interaction), session, lifecycle))
    }

    #[test]
    fn builder_carries_options() {
        let reg = on_component_matching(Regex::new("^dm:page-").unwrap())
            .expected_duration(Duration::from_millis(300))
            .scopes([Scope::MessageContent])
            .handler(|| async { "next" });

        assert_eq!(reg.kind(), InteractionKind::Component);
        assert!(reg.routing_key().is_pattern());
        assert_eq!(reg.expected_duration(), Some(Duration::from_millis(300)));
        assert!(reg.required_scopes().contains(Scope::MessageContent));
        assert!(reg.required_scopes().contains(Scope::GuildMessages));
        assert!(reg.required_scopes().contains(Scope::DirectMessages));
    }

    #[tokio::test]
    async fn layers_wrap_the_handler() {
        let reg = on_command("shout")
            .layer(MapResponseLayer::new(|response: Response| {
                match response.content() {
                    Some(text) => Response::message(text.to_uppercase()),
                    None => response,
                }
            }))
            .handler(|| async { "hello" });

        let response = reg
            .service()
            .oneshot(ctx(InteractionKind::Command, "shout"))
            .await
            .unwrap();
        assert_eq!(response, Response::message("HELLO"));
    }
}
