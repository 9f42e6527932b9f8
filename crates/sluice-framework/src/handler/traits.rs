//! The [`Handler`] trait and its blanket implementations.
//!
//! Handlers are plain async functions, similar to Axum's handler system:
//!
//! ```rust,ignore
//! // No extractors, literal reply
//! async fn ping() -> &'static str {
//!     "pong"
//! }
//!
//! // Extractors and a fallible body
//! async fn open_survey(ctx: Arc<HandlerContext>, session: Session) -> Result<Response, BoxError> {
//!     session.insert("started_by", ctx.interaction().origin_user().as_str())?;
//!     Ok(Response::form(ctx.chained_key("survey"), "Survey", fields()))
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use sluice_core::{BoxError, Response};

use crate::context::HandlerContext;
use crate::extractor::FromContext;

// ============================================================================
// IntoResponse
// ============================================================================

/// Types a handler may return.
///
/// `Err` becomes [`HandlerFailed`](sluice_core::DispatchOutcome::HandlerFailed).
pub trait IntoResponse: Send + 'static {
    fn into_response(self) -> Result<Response, BoxError>;
}

impl IntoResponse for Response {
    fn into_response(self) -> Result<Response, BoxError> {
        Ok(self)
    }
}

/// A plain message.
impl IntoResponse for String {
    fn into_response(self) -> Result<Response, BoxError> {
        Ok(Response::message(self))
    }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Result<Response, BoxError> {
        Ok(Response::message(self))
    }
}

/// Acknowledge without visible output.
impl IntoResponse for () {
    fn into_response(self) -> Result<Response, BoxError> {
        Ok(Response::Acknowledge)
    }
}

/// `None` acknowledges without visible output.
impl<T: IntoResponse> IntoResponse for Option<T> {
    fn into_response(self) -> Result<Response, BoxError> {
        match self {
            Some(t) => t.into_response(),
            None => Ok(Response::Acknowledge),
        }
    }
}

impl<T, E> IntoResponse for Result<T, E>
where
    T: IntoResponse,
    E: Into<BoxError> + Send + 'static,
{
    fn into_response(self) -> Result<Response, BoxError> {
        self.map_err(Into::into)?.into_response()
    }
}

// ============================================================================
// Handler
// ============================================================================

/// The core trait for interaction handlers.
///
/// Implemented for async functions that:
/// - take 0-8 parameters implementing [`FromContext`]
/// - return a type implementing [`IntoResponse`]
///
/// `T` is the tuple of extractor types; it only exists to keep the blanket
/// implementations apart.
pub trait Handler<T>: Clone + Send + Sync + 'static {
    /// Extracts the arguments and runs the handler.
    fn call(self, ctx: Arc<HandlerContext>) -> BoxFuture<'static, Result<Response, BoxError>>;
}

macro_rules! impl_handler {
    (
        $($ty:ident),*
    ) => {
        #[allow(non_snake_case, unused_variables)]
        impl<F, Fut, Res, $($ty,)*> Handler<($($ty,)*)> for F
        where
            F: FnOnce($($ty,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = Res> + Send + 'static,
            Res: IntoResponse,
            $( $ty: FromContext + Send + 'static, )*
        {
            fn call(self, ctx: Arc<HandlerContext>) -> BoxFuture<'static, Result<Response, BoxError>> {
                async move {
                    $(
                        let $ty = $ty::from_context(&ctx)?;
                    )*
                    (self)($($ty,)*).await.into_response()
                }
                .boxed()
            }
        }
    };
}

impl_handler!();
impl_handler!(T1);
impl_handler!(T1, T2);
impl_handler!(T1, T2, T3);
impl_handler!(T1, T2, T3, T4);
impl_handler!(T1, T2, T3, T4, T5);
impl_handler!(T1, T2, T3, T4, T5, T6);
impl_handler!(T1, T2, T3, T4, T5, T6, T7);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8);

#[cfg(test)]
mod tests {
    use std::fmt;

    use super::*;

    #[derive(Debug)]
    struct Boom;

    impl fmt::Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("boom")
        }
    }

    impl std::error::Error for Boom {}

    #[test]
    fn literal_returns_become_messages() {
        assert_eq!("pong".into_response().unwrap(), Response::message("pong"));
        assert_eq!(
            String::from("hi").into_response().unwrap().content(),
            Some("hi")
        );
        assert_eq!(().into_response().unwrap(), Response::Acknowledge);
        assert_eq!(None::<String>.into_response().unwrap(), Response::Acknowledge);
    }

    #[test]
    fn errors_propagate() {
        let result: Result<String, Boom> = Err(Boom);
        let err = result.into_response().unwrap_err();
        assert_eq!(err.to_string(), "boom");

        let nested: Result<Result<&'static str, Boom>, Boom> = Ok(Err(Boom));
        assert!(nested.into_response().is_err());
    }
}
