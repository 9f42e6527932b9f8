//! WebSocket push-channel connector.
//!
//! Speaks the gateway handshake: waits for `HELLO`, identifies with the
//! intents derived from the requested scopes, heartbeats on the interval the
//! server announced, and yields the payload of every `INTERACTION_CREATE`
//! dispatch. The stream ends when the socket closes or the server asks for a
//! reconnect; re-establishing the connection is up to the caller.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt, stream};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

use sluice_core::{EventStream, GatewayConnector, ScopeSet, TransportError, TransportResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const OP_DISPATCH: u64 = 0;
const OP_HEARTBEAT: u64 = 1;
const OP_IDENTIFY: u64 = 2;
const OP_RECONNECT: u64 = 7;
const OP_INVALID_SESSION: u64 = 9;
const OP_HELLO: u64 = 10;
const OP_HEARTBEAT_ACK: u64 = 11;

const INTERACTION_CREATE: &str = "INTERACTION_CREATE";

/// Connection settings for [`WsGatewayConnector`].
#[derive(Debug, Clone)]
pub struct WsGatewayConfig {
    /// Gateway URL, e.g. `wss://gateway.discord.gg/?v=10&encoding=json`.
    pub url: String,
    /// Bot token sent in the identify payload.
    pub token: String,
    /// How long to wait for `HELLO` after connecting.
    pub hello_timeout: Duration,
}

impl WsGatewayConfig {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            hello_timeout: Duration::from_secs(10),
        }
    }
}

/// [`GatewayConnector`] over a WebSocket connection.
pub struct WsGatewayConnector {
    config: WsGatewayConfig,
}

impl WsGatewayConnector {
    pub fn new(config: WsGatewayConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl GatewayConnector for WsGatewayConnector {
    async fn connect(&self, scopes: &ScopeSet) -> TransportResult<EventStream> {
        let url = self.config.url.clone();
        info!(url = %url, intents = scopes.intents(), "Connecting to gateway");

        let (ws_stream, _response) =
            connect_async(&url)
                .await
                .map_err(|e| TransportError::ConnectionFailed {
                    url: url.clone(),
                    reason: format!("WebSocket connection failed: {e}"),
                })?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let heartbeat_interval = await_hello(&mut ws_rx, &url, self.config.hello_timeout).await?;
        let identify = json!({
            "op": OP_IDENTIFY,
            "d": {
                "token": self.config.token,
                "intents": scopes.intents(),
                "properties": { "os": std::env::consts::OS, "browser": "sluice", "device": "sluice" },
            },
        });
        send_json(&mut ws_tx, &identify).await?;
        info!(url = %url, heartbeat = ?heartbeat_interval, "Gateway connected");

        let (events_tx, events_rx) = mpsc::channel(256);
        tokio::spawn(run_connection(ws_tx, ws_rx, events_tx, heartbeat_interval));

        Ok(stream::unfold(events_rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed())
    }
}

async fn await_hello(
    ws_rx: &mut WsSource,
    url: &str,
    timeout: Duration,
) -> TransportResult<Duration> {
    let hello = tokio::time::timeout(timeout, async {
        while let Some(msg) = ws_rx.next().await {
            let msg = msg.map_err(|e| TransportError::ConnectionFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            if let Some(frame) = parse_frame(&msg)
                && frame["op"].as_u64() == Some(OP_HELLO)
            {
                return Ok(frame);
            }
        }
        Err(TransportError::ConnectionClosed {
            reason: "closed before HELLO".to_string(),
        })
    })
    .await
    .map_err(|_| TransportError::ConnectionFailed {
        url: url.to_string(),
        reason: "timed out waiting for HELLO".to_string(),
    })??;

    let millis = hello["d"]["heartbeat_interval"]
        .as_u64()
        .ok_or_else(|| TransportError::ConnectionFailed {
            url: url.to_string(),
            reason: "HELLO without heartbeat_interval".to_string(),
        })?;
    Ok(Duration::from_millis(millis))
}

/// Heartbeats and forwards interaction dispatches until the socket ends or
/// the event stream is dropped.
async fn run_connection(
    mut ws_tx: WsSink,
    mut ws_rx: WsSource,
    events: mpsc::Sender<TransportResult<Value>>,
    heartbeat_interval: Duration,
) {
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.tick().await;
    let mut last_seq: Option<u64> = None;

    loop {
        tokio::select! {
            _ = events.closed() => {
                debug!("Gateway event stream dropped, closing connection");
                let _ = ws_tx.close().await;
                break;
            }

            _ = heartbeat.tick() => {
                let beat = json!({ "op": OP_HEARTBEAT, "d": last_seq });
                if let Err(e) = send_json(&mut ws_tx, &beat).await {
                    warn!(error = %e, "Failed to send heartbeat");
                    break;
                }
                trace!(seq = ?last_seq, "Heartbeat sent");
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Gateway closed the connection");
                        break;
                    }
                    Some(Ok(msg)) => {
                        let Some(frame) = parse_frame(&msg) else { continue };
                        if let Some(seq) = frame["s"].as_u64() {
                            last_seq = Some(seq);
                        }
                        match frame["op"].as_u64() {
                            Some(OP_DISPATCH) if frame["t"].as_str() == Some(INTERACTION_CREATE) => {
                                let mut frame = frame;
                                if events.send(Ok(frame["d"].take())).await.is_err() {
                                    break;
                                }
                            }
                            Some(OP_HEARTBEAT) => {
                                let beat = json!({ "op": OP_HEARTBEAT, "d": last_seq });
                                let _ = send_json(&mut ws_tx, &beat).await;
                            }
                            Some(OP_HEARTBEAT_ACK) => trace!("Heartbeat acknowledged"),
                            Some(OP_RECONNECT) | Some(OP_INVALID_SESSION) => {
                                info!(op = ?frame["op"].as_u64(), "Gateway requested a reconnect");
                                let _ = ws_tx.close().await;
                                break;
                            }
                            _ => {}
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Gateway connection error");
                        let _ = events
                            .send(Err(TransportError::ConnectionClosed { reason: e.to_string() }))
                            .await;
                        break;
                    }
                }
            }
        }
    }
}

fn parse_frame(msg: &Message) -> Option<Value> {
    match msg {
        Message::Text(text) => serde_json::from_str(text.as_str()).ok(),
        Message::Binary(data) => serde_json::from_slice(data).ok(),
        _ => None,
    }
}

async fn send_json(ws_tx: &mut WsSink, value: &Value) -> TransportResult<()> {
    ws_tx
        .send(Message::Text(value.to_string().into()))
        .await
        .map_err(|e| TransportError::SendFailed(e.to_string()))
}
