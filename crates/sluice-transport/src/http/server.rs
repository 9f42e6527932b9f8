//! Webhook listener.
//!
//! Accepts `POST` requests on one path and hands them to a
//! [`RequestHandler`], answering with whatever it returns.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace};

use sluice_core::{RawRequest, ReplyStatus, RequestHandler, TransportResult};

/// Binds webhook endpoints.
pub struct WebhookListener;

impl WebhookListener {
    /// Listens on `addr`, routing `POST {path}` to `handler`.
    ///
    /// The server runs until the returned handle is stopped or dropped.
    pub async fn bind(
        addr: &str,
        path: &str,
        handler: Arc<dyn RequestHandler>,
    ) -> TransportResult<ListenerHandle> {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };

        let router = Router::new()
            .route(&path, post(webhook_handler))
            .with_state(handler);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, path = %path, "Webhook listener started");

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, router)
                .with_graceful_shutdown(async move { signal.cancelled().await });
            if let Err(e) = server.await {
                error!(error = %e, "Webhook listener error");
            }
            info!(addr = %local_addr, "Webhook listener stopped");
        });

        Ok(ListenerHandle {
            local_addr,
            shutdown,
            task: Some(task),
        })
    }
}

/// A running listener. Dropping it stops the server.
pub struct ListenerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Address actually bound (useful with port `0`).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting requests and waits for in-flight ones to finish.
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn webhook_handler(
    State(handler): State<Arc<dyn RequestHandler>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let mut request = RawRequest::new(body.to_vec());
    for (name, value) in &headers {
        if let Ok(value) = value.to_str() {
            request = request.with_header(name.as_str(), value);
        }
    }
    trace!(len = request.body.len(), "Received webhook request");

    let reply = handler.handle(request).await;
    (status_code(reply.status), Json(reply.body))
}

fn status_code(status: ReplyStatus) -> StatusCode {
    match status {
        ReplyStatus::Ok => StatusCode::OK,
        ReplyStatus::BadRequest => StatusCode::BAD_REQUEST,
        ReplyStatus::Unauthorized => StatusCode::UNAUTHORIZED,
        ReplyStatus::NotFound => StatusCode::NOT_FOUND,
        ReplyStatus::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}
