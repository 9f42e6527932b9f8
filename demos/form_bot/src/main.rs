//! Form Bot Example
//!
//! A `/feedback` command stores who asked in its session and opens a form.
//! The form's custom id carries the command's interaction id, so the
//! submission resolves the same session and can thank the right person.
//!
//! The platform side is simulated in-process: a [`MemoryGateway`] plays the
//! push channel and a [`RecordingOutbound`] collects the replies that would
//! have gone to the platform's API.
//!
//! # Usage
//!
//! ```bash
//! cargo run --package form-bot
//! ```

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use sluice::delivery::GatewayOptions;
use sluice::prelude::*;
use sluice::transport::{MemoryGateway, OutboundCall, RecordingOutbound};
use tracing::info;

// ============================================================================
// Handler Functions
// ============================================================================

#[derive(Debug, Deserialize)]
struct FeedbackCommand {
    #[serde(default)]
    options: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct FeedbackForm {
    values: HashMap<String, String>,
}

/// Opens the feedback form and remembers the topic.
async fn feedback_command(
    ctx: Arc<HandlerContext>,
    origin: Origin,
    session: Session,
    Payload(command): Payload<FeedbackCommand>,
) -> Result<Response, SessionError> {
    let topic = command
        .options
        .get("topic")
        .and_then(Value::as_str)
        .unwrap_or("general")
        .to_string();

    session.merge([
        ("topic", json!(topic)),
        ("asked_by", json!(origin.user.as_str())),
    ])?;

    Ok(Response::form(
        ctx.chained_key("feedback_form"),
        format!("Feedback on {topic}"),
        json!([{ "custom_id": "comment", "label": "Your comment", "style": 2 }]),
    ))
}

/// Thanks the user, using what the command stored.
async fn feedback_submitted(session: Session, Payload(form): Payload<FeedbackForm>) -> String {
    let topic = session.get_as::<String>("topic").unwrap_or_default();
    let asked_by = session.get_as::<String>("asked_by").unwrap_or_default();
    let comment = form.values.get("comment").map_or("", String::as_str);

    session.clear();
    format!("Thanks <@{asked_by}>, noted for {topic}: \"{comment}\"")
}

// ============================================================================
// Simulated platform
// ============================================================================

async fn simulate(gateway: MemoryGateway, outbound: RecordingOutbound) -> Result<()> {
    gateway.wait_for_connections(1).await;

    gateway.push(json!({
        "id": "1001",
        "type": 2,
        "token": "token-1001",
        "guild_id": "42",
        "member": { "user": { "id": "7" } },
        "data": {
            "name": "feedback",
            "options": [{ "name": "topic", "value": "docs" }]
        }
    }));

    let calls = outbound.wait_for(1).await;
    let form_id = calls[0].body()["data"]["custom_id"]
        .as_str()
        .context("the command did not open a form")?
        .to_string();
    info!(form = %form_id, "Platform showed the form");

    gateway.push(json!({
        "id": "1002",
        "type": 5,
        "token": "token-1002",
        "guild_id": "42",
        "member": { "user": { "id": "7" } },
        "data": {
            "custom_id": form_id,
            "components": [
                { "components": [{ "custom_id": "comment", "value": "More examples please" }] }
            ]
        }
    }));

    for call in outbound.wait_for(2).await {
        match call {
            OutboundCall::Callback { interaction_id, body, .. } => {
                info!(interaction = %interaction_id, reply = %body, "Platform received callback");
            }
            OutboundCall::Followup { body, .. } => {
                info!(reply = %body, "Platform received follow-up");
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let gateway = MemoryGateway::new();
    let outbound = RecordingOutbound::new();

    let strategy = GatewayStrategy::new(Arc::new(gateway.clone()), Arc::new(outbound.clone()))
        .with_options(GatewayOptions {
            initial_delay: Duration::from_millis(200),
            ..Default::default()
        });

    let runtime = SluiceRuntime::builder()
        .constraint_profile(ConstraintProfile::PERMISSIVE)
        .strategy(Arc::new(strategy))
        .build()?;

    runtime.register_all([
        on_command("feedback").handler(feedback_command),
        on_form_submit("feedback_form").handler(feedback_submitted),
    ])?;

    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let platform = tokio::spawn(async move {
        let result = simulate(gateway, outbound).await;
        let _ = done_tx.send(());
        result
    });

    runtime
        .run_until(async {
            let _ = done_rx.await;
        })
        .await?;

    platform.await??;
    Ok(())
}
