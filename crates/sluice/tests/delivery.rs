//! Delivery behavior across hosts: duplicate events on the push channel,
//! deferred and abandoned webhook replies, and constraint enforcement.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use sluice::core::{
    BoxedStrategy, ConstraintViolation, RawRequest, ReplyStatus, RequestHandler,
};
use sluice::delivery::GatewayOptions;
use sluice::prelude::*;
use sluice::runtime::SluiceConfig;
use sluice::transport::{MemoryGateway, OutboundCall, RecordingOutbound};

fn config() -> SluiceConfig {
    let mut config = SluiceConfig::default();
    config.host.name = Some("server".to_string());
    config
}

fn runtime_with(profile: ConstraintProfile, strategy: BoxedStrategy) -> SluiceRuntime {
    SluiceRuntime::builder()
        .without_env()
        .merge(config())
        .constraint_profile(profile)
        .strategy(strategy)
        .build()
        .unwrap()
}

fn command(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "type": 2,
        "token": format!("tok-{id}"),
        "user": { "id": "u1" },
        "data": { "name": name }
    })
}

fn serverless(limit_ms: u64) -> ConstraintProfile {
    ConstraintProfile {
        max_execution_time: Some(Duration::from_millis(limit_ms)),
        supports_background_execution: false,
        supports_persistent_connection: false,
        supports_file_system: false,
        max_concurrent_operations: None,
    }
}

#[tokio::test]
async fn redelivered_event_runs_the_handler_once() {
    let gateway = MemoryGateway::new();
    let outbound = RecordingOutbound::new();
    let strategy = GatewayStrategy::new(Arc::new(gateway.clone()), Arc::new(outbound.clone()))
        .with_options(GatewayOptions {
            initial_delay: Duration::from_millis(10),
            ..Default::default()
        });
    let runtime = runtime_with(ConstraintProfile::PERMISSIVE, Arc::new(strategy));

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    runtime
        .register(on_command("count").handler(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { n.to_string() }
        }))
        .unwrap();
    runtime.start().await.unwrap();

    gateway.push(command("42", "count"));
    gateway.push(command("42", "count"));
    let sent = outbound.wait_for(2).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(sent[0].body(), sent[1].body());
    assert_eq!(sent[0].body()["data"]["content"], json!("1"));
    runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn slow_webhook_reply_is_deferred_on_background_hosts() {
    let outbound = RecordingOutbound::new();
    let webhook = Arc::new(WebhookStrategy::new().with_outbound(Arc::new(outbound.clone())));
    let runtime = runtime_with(ConstraintProfile::PERMISSIVE, webhook.clone());
    runtime
        .register(on_command("report").handler(|| async {
            tokio::time::sleep(Duration::from_secs(4)).await;
            "report ready"
        }))
        .unwrap();
    runtime.start().await.unwrap();

    let reply = webhook
        .handle(RawRequest::new(command("7", "report").to_string()))
        .await;
    assert_eq!(reply.status, ReplyStatus::Ok);
    assert_eq!(reply.body, json!({ "type": 5 }));

    let calls = outbound.wait_for(1).await;
    assert_eq!(
        calls[0],
        OutboundCall::Followup {
            token: "tok-7".to_string(),
            body: json!({ "content": "report ready" }),
        }
    );
    runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn slow_webhook_reply_is_abandoned_without_background_execution() {
    let outbound = RecordingOutbound::new();
    let webhook = Arc::new(WebhookStrategy::new().with_outbound(Arc::new(outbound.clone())));
    let runtime = runtime_with(serverless(10_000), webhook.clone());
    runtime
        .register(on_command("report").handler(|| async {
            tokio::time::sleep(Duration::from_secs(4)).await;
            "report ready"
        }))
        .unwrap();
    runtime.start().await.unwrap();

    let reply = webhook
        .handle(RawRequest::new(command("8", "report").to_string()))
        .await;
    assert_eq!(reply.body["type"], json!(4));
    assert_eq!(reply.body["data"]["flags"], json!(64));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(outbound.calls().is_empty());
    runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn handler_over_the_execution_limit_is_a_violation() {
    let webhook: BoxedStrategy = Arc::new(WebhookStrategy::new());
    let runtime = runtime_with(serverless(100), webhook);
    runtime
        .register(on_command("slow").handler(|| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            "done"
        }))
        .unwrap();

    let interaction = Interaction::builder("9", InteractionKind::Command, "slow", "u1").build();
    let outcome = runtime.router().dispatch(interaction).await.unwrap();

    assert!(matches!(
        outcome,
        DispatchOutcome::ConstraintViolated(ConstraintViolation::ExecutionTimeExceeded { .. })
    ));
}

#[tokio::test]
async fn push_channel_is_refused_on_serverless_hosts() {
    let gateway = MemoryGateway::new();
    let strategy = GatewayStrategy::new(
        Arc::new(gateway.clone()),
        Arc::new(RecordingOutbound::new()),
    );
    let runtime = runtime_with(serverless(10_000), Arc::new(strategy));
    runtime.start().await.unwrap();

    assert_eq!(runtime.active_strategy_count(), 0);
    assert_eq!(gateway.connect_count(), 0);
    runtime.shutdown().await;
}
