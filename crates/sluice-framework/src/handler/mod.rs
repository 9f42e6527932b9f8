//! Handler and service system.
//!
//! - **Handler** ([`traits`]): the [`Handler`] trait, implemented for async
//!   functions whose arguments are [`FromContext`](crate::FromContext)
//!   extractors, and [`IntoResponse`] for their return values
//! - **Service** ([`service`]): [`HandlerService`], which turns a handler
//!   into a `tower::Service<Arc<HandlerContext>>`
//!
//! Cross-cutting concerns (timeouts, metrics, filters) are ordinary tower
//! layers stacked on top of the handler service:
//!
//! ```text
//! on_command("ping")              ← RegistrationBuilder (ServiceBuilder inside)
//!     .layer(SomeLayer)           ← Stack<SomeLayer, Identity>
//!     .handler(ping)              ← SomeLayer<HandlerService<ping>>, type-erased
//! ```

pub mod service;
pub mod traits;

pub use service::{BoxHandlerService, HandlerService};
pub use traits::{Handler, IntoResponse};

pub use tower::Layer;
