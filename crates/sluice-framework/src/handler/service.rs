//! [`HandlerService`] wraps a single handler and implements
//! `tower::Service<Arc<HandlerContext>>`.

use std::marker::PhantomData;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tower::Service;
use tower::util::BoxCloneSyncService;

use sluice_core::{BoxError, Response};

use super::traits::Handler;
use crate::context::HandlerContext;

/// Type-erased handler service stored in a registration.
pub type BoxHandlerService = BoxCloneSyncService<Arc<HandlerContext>, Response, BoxError>;

/// A tower [`Service`] that calls one handler.
pub struct HandlerService<H, T> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<H, T> HandlerService<H, T> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

impl<H: Clone, T> Clone for HandlerService<H, T> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            _marker: PhantomData,
        }
    }
}

impl<H, T> Service<Arc<HandlerContext>> for HandlerService<H, T>
where
    H: Handler<T>,
{
    type Response = Response;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Response, BoxError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, ctx: Arc<HandlerContext>) -> Self::Future {
        self.handler.clone().call(ctx)
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_ready_ok, task};
    use tower::ServiceExt;

    use sluice_core::{Interaction, InteractionKind};

    use super::*;
    use crate::context::Session;
    use crate::lifecycle::{InstanceId, Lifecycle, LifecycleManager};
    use crate::store::ContextStore;

    fn ctx() -> Arc<HandlerContext> {
        let interaction = Interaction::builder("1", InteractionKind::Command, "ping", "u1").build();
        let session = Session::new(Arc::new(ContextStore::default()), None, &interaction);
        let lifecycle = Lifecycle::new(InstanceId::next(), Arc::new(LifecycleManager::new()));
        Arc::new(HandlerContext::new(Arc::new(interaction), session, lifecycle))
    }

    async fn ping() -> &'static str {
        "pong"
    }

    #[test]
    fn always_ready() {
        let mut svc = HandlerService::new(ping);
        let mut ready = task::spawn(std::future::poll_fn(|cx| svc.poll_ready(cx)));
        assert_ready_ok!(ready.poll());
    }

    #[tokio::test]
    async fn boxed_service_calls_handler() {
        let svc: BoxHandlerService = BoxCloneSyncService::new(HandlerService::new(ping));
        let response = svc.oneshot(ctx()).await.unwrap();
        assert_eq!(response, Response::message("pong"));
    }

    #[tokio::test]
    async fn extractors_are_applied() {
        async fn echo_key(interaction: Arc<Interaction>) -> String {
            interaction.routing_key().to_string()
        }
        let response = HandlerService::new(echo_key).oneshot(ctx()).await.unwrap();
        assert_eq!(response.content(), Some("ping"));
    }
}
