//! In-process transports for tests and demos.
//!
//! - [`MemoryGateway`]: a [`GatewayConnector`] whose events are pushed by
//!   the caller; connections can be dropped on demand
//! - [`RecordingOutbound`]: an [`OutboundApi`] that records every call

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use sluice_core::{
    EventStream, GatewayConnector, InteractionId, OutboundApi, ScopeSet, TransportError,
    TransportResult,
};

// =============================================================================
// MemoryGateway
// =============================================================================

type EventSender = mpsc::UnboundedSender<TransportResult<Value>>;

#[derive(Default)]
struct GatewayState {
    current: Option<EventSender>,
    last_scopes: Option<ScopeSet>,
    refuse_next: usize,
}

/// Push channel backed by an in-process queue.
///
/// Clones share one gateway: hand one to the delivery strategy and keep
/// another to push events.
#[derive(Clone)]
pub struct MemoryGateway {
    state: Arc<Mutex<GatewayState>>,
    connects: Arc<watch::Sender<usize>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(GatewayState::default())),
            connects: Arc::new(watch::Sender::new(0)),
        }
    }

    /// Delivers an event on the current connection.
    ///
    /// Returns `false` if nothing is connected; the event is lost, as it
    /// would be on a real dropped connection.
    pub fn push(&self, event: Value) -> bool {
        let state = self.state.lock();
        match &state.current {
            Some(tx) => tx.send(Ok(event)).is_ok(),
            None => false,
        }
    }

    /// Ends the current connection's stream.
    pub fn drop_connection(&self) {
        if self.state.lock().current.take().is_some() {
            debug!("Memory gateway connection dropped");
        }
    }

    /// Makes the next `n` connection attempts fail.
    pub fn refuse_connections(&self, n: usize) {
        self.state.lock().refuse_next = n;
    }

    /// Number of successful connections so far.
    pub fn connect_count(&self) -> usize {
        *self.connects.borrow()
    }

    /// Scopes requested by the latest connection.
    pub fn last_scopes(&self) -> Option<ScopeSet> {
        self.state.lock().last_scopes.clone()
    }

    /// Waits until at least `n` connections have been made.
    pub async fn wait_for_connections(&self, n: usize) {
        let mut rx = self.connects.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|count| *count >= n).await;
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GatewayConnector for MemoryGateway {
    async fn connect(&self, scopes: &ScopeSet) -> TransportResult<EventStream> {
        let rx = {
            let mut state = self.state.lock();
            if state.refuse_next > 0 {
                state.refuse_next -= 1;
                return Err(TransportError::ConnectionFailed {
                    url: "memory://gateway".to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            let (tx, rx) = mpsc::unbounded_channel();
            state.current = Some(tx);
            state.last_scopes = Some(scopes.clone());
            rx
        };
        self.connects.send_modify(|count| *count += 1);
        trace!(intents = scopes.intents(), "Memory gateway connected");

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed())
    }
}

// =============================================================================
// RecordingOutbound
// =============================================================================

/// One recorded outbound call.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundCall {
    Callback {
        interaction_id: InteractionId,
        token: String,
        body: Value,
    },
    Followup {
        token: String,
        body: Value,
    },
}

impl OutboundCall {
    pub fn body(&self) -> &Value {
        match self {
            Self::Callback { body, .. } | Self::Followup { body, .. } => body,
        }
    }
}

/// Outbound API that records calls instead of sending them.
#[derive(Clone)]
pub struct RecordingOutbound {
    calls: Arc<Mutex<Vec<OutboundCall>>>,
    count: Arc<watch::Sender<usize>>,
}

impl RecordingOutbound {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            count: Arc::new(watch::Sender::new(0)),
        }
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<OutboundCall> {
        self.calls.lock().clone()
    }

    /// Waits until at least `n` calls have been recorded.
    pub async fn wait_for(&self, n: usize) -> Vec<OutboundCall> {
        let mut rx = self.count.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
        self.calls()
    }

    fn record(&self, call: OutboundCall) {
        self.calls.lock().push(call);
        self.count.send_modify(|count| *count += 1);
    }
}

impl Default for RecordingOutbound {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboundApi for RecordingOutbound {
    async fn send_callback(
        &self,
        interaction_id: &InteractionId,
        token: &str,
        body: Value,
    ) -> TransportResult<()> {
        self.record(OutboundCall::Callback {
            interaction_id: interaction_id.clone(),
            token: token.to_string(),
            body,
        });
        Ok(())
    }

    async fn send_followup(&self, token: &str, body: Value) -> TransportResult<()> {
        self.record(OutboundCall::Followup {
            token: token.to_string(),
            body,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use sluice_core::Scope;

    use super::*;

    #[tokio::test]
    async fn pushed_events_arrive_in_order_until_dropped() {
        let gateway = MemoryGateway::new();
        assert!(!gateway.push(json!(0)));

        let scopes = ScopeSet::from([Scope::Guilds]);
        let mut events = gateway.connect(&scopes).await.unwrap();
        assert_eq!(gateway.connect_count(), 1);
        assert_eq!(gateway.last_scopes(), Some(scopes));

        assert!(gateway.push(json!(1)));
        assert!(gateway.push(json!(2)));
        gateway.drop_connection();

        assert_eq!(events.next().await.unwrap().unwrap(), json!(1));
        assert_eq!(events.next().await.unwrap().unwrap(), json!(2));
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn refused_connections_fail() {
        let gateway = MemoryGateway::new();
        gateway.refuse_connections(1);
        assert!(gateway.connect(&ScopeSet::new()).await.is_err());
        assert!(gateway.connect(&ScopeSet::new()).await.is_ok());
    }

    #[tokio::test]
    async fn outbound_calls_are_recorded() {
        let outbound = RecordingOutbound::new();
        outbound
            .send_callback(&InteractionId::from("1"), "tok", json!({"type": 4}))
            .await
            .unwrap();
        outbound.send_followup("tok", json!({"content": "x"})).await.unwrap();

        let calls = outbound.wait_for(2).await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].body(), &json!({"content": "x"}));
    }
}
