//! Interfaces to the transport collaborators.
//!
//! Concrete implementations (WebSocket, HTTP server, HTTP client, in-memory)
//! live in `sluice-transport`; delivery strategies only see these traits.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::error::TransportResult;
use crate::interaction::InteractionId;
use crate::scope::ScopeSet;

// =============================================================================
// Push channel
// =============================================================================

/// Inbound events of one push-channel connection, in arrival order.
///
/// The stream ends when the connection drops.
pub type EventStream = BoxStream<'static, TransportResult<Value>>;

/// Opens push-channel connections.
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    /// Connects, subscribing to `scopes`.
    async fn connect(&self, scopes: &ScopeSet) -> TransportResult<EventStream>;
}

/// Outbound API used to answer interactions out of band.
#[async_trait]
pub trait OutboundApi: Send + Sync {
    /// Sends the initial reply to an interaction.
    async fn send_callback(
        &self,
        interaction_id: &InteractionId,
        token: &str,
        body: Value,
    ) -> TransportResult<()>;

    /// Replaces a deferred reply with the real one.
    async fn send_followup(&self, token: &str, body: Value) -> TransportResult<()>;
}

// =============================================================================
// Request/response channel
// =============================================================================

/// A host request reduced to what the core needs.
#[derive(Debug, Clone, Default)]
pub struct RawRequest {
    /// Header names are lower-cased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RawRequest {
    /// Creates a request from a body.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Adds a header; the name is lower-cased.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Looks up a header case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Status discriminator of a synchronous reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Ok,
    BadRequest,
    Unauthorized,
    NotFound,
    ServiceUnavailable,
}

impl ReplyStatus {
    /// HTTP status code.
    pub fn as_u16(&self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::NotFound => 404,
            Self::ServiceUnavailable => 503,
        }
    }
}

/// A synchronous reply.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: ReplyStatus,
    pub body: Value,
}

impl RawResponse {
    /// A reply with status [`ReplyStatus::Ok`].
    pub fn ok(body: Value) -> Self {
        Self {
            status: ReplyStatus::Ok,
            body,
        }
    }

    /// A reply with the given status and an `{"error": ..}` body.
    pub fn error(status: ReplyStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            body: serde_json::json!({ "error": message.into() }),
        }
    }
}

/// Answers host requests. Implemented by the request/response strategy and
/// driven by a host adapter.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: RawRequest) -> RawResponse;
}
