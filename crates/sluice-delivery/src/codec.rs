//! Translation between raw interaction payloads and the canonical model.

use serde_json::{Map, Value, json};
use tokio::time::Instant;
use tracing::trace;

use sluice_core::{
    DispatchOutcome, Interaction, InteractionKind, NormalizeError,
    OriginScope, RawResponse, ReplyStatus, Response, WireCodec, split_lineage,
};

use crate::model::{
    EPHEMERAL_FLAG, RawCallback, RawData, RawInteraction, RawOption, callback_type,
    interaction_type,
};

/// Messages shown when a dispatch produced no handler response.
#[derive(Debug, Clone)]
pub struct FallbackMessages {
    /// Shown when the handler failed.
    pub handler_failed: String,
    /// Shown when host limits prevented a response.
    pub constraint_violated: String,
}

impl Default for FallbackMessages {
    fn default() -> Self {
        Self {
            handler_failed: "Something went wrong while handling this interaction.".to_string(),
            constraint_violated: "This took too long to process. Please try again.".to_string(),
        }
    }
}

/// JSON wire codec shared by both delivery strategies.
#[derive(Debug, Clone, Default)]
pub struct InteractionCodec {
    fallback: FallbackMessages,
}

impl InteractionCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(fallback: FallbackMessages) -> Self {
        Self { fallback }
    }

    /// Returns `true` for the host's liveness probe.
    pub fn is_ping(raw: &Value) -> bool {
        raw.get("type").and_then(Value::as_u64) == Some(interaction_type::PING)
    }

    /// Reply to a liveness probe.
    pub fn pong() -> RawResponse {
        RawResponse::ok(RawCallback::new(callback_type::PONG).to_value())
    }

    /// Provisional reply sent when the real one will follow out of band.
    pub fn deferred(interaction: &Interaction) -> Value {
        let kind = match interaction.kind() {
            InteractionKind::Component => callback_type::DEFERRED_UPDATE_MESSAGE,
            _ => callback_type::DEFERRED_CHANNEL_MESSAGE,
        };
        RawCallback::new(kind).to_value()
    }

    /// Message body used to replace a deferred reply.
    pub fn followup_body(&self, outcome: &DispatchOutcome) -> Value {
        match outcome {
            DispatchOutcome::Handled(Response::Message(body)) => message_data(
                &body.content,
                body.ephemeral,
                &body.components,
            ),
            DispatchOutcome::Handled(_) | DispatchOutcome::NoMatch => json!({ "content": "" }),
            DispatchOutcome::HandlerFailed(_) => {
                message_data(&self.fallback.handler_failed, true, &Value::Null)
            }
            DispatchOutcome::ConstraintViolated(_) => {
                message_data(&self.fallback.constraint_violated, true, &Value::Null)
            }
        }
    }

    /// Follow-up body sent when the router itself failed.
    pub fn failure_followup(&self) -> Value {
        message_data(&self.fallback.handler_failed, true, &Value::Null)
    }

    /// Callback sent when the router itself failed.
    pub fn failure_callback(&self, interaction: &Interaction) -> Value {
        self.fallback(interaction, &self.fallback.handler_failed).to_value()
    }

    fn callback(&self, interaction: &Interaction, response: &Response) -> RawCallback {
        match response {
            Response::Message(body) => RawCallback::with_data(
                callback_type::CHANNEL_MESSAGE,
                message_data(&body.content, body.ephemeral, &body.components),
            ),
            Response::Form(form) => RawCallback::with_data(
                callback_type::MODAL,
                json!({
                    "custom_id": form.custom_id,
                    "title": form.title,
                    "components": form.fields,
                }),
            ),
            Response::Choices(choices) => RawCallback::with_data(
                callback_type::AUTOCOMPLETE_RESULT,
                json!({ "choices": choices }),
            ),
            Response::Deferred => RawCallback::new(callback_type::DEFERRED_CHANNEL_MESSAGE),
            Response::Acknowledge => match interaction.kind() {
                InteractionKind::Autocomplete => RawCallback::with_data(
                    callback_type::AUTOCOMPLETE_RESULT,
                    json!({ "choices": [] }),
                ),
                InteractionKind::Command => {
                    RawCallback::new(callback_type::DEFERRED_CHANNEL_MESSAGE)
                }
                _ => RawCallback::new(callback_type::DEFERRED_UPDATE_MESSAGE),
            },
        }
    }

    fn fallback(&self, interaction: &Interaction, message: &str) -> RawCallback {
        if interaction.kind() == InteractionKind::Autocomplete {
            return RawCallback::with_data(
                callback_type::AUTOCOMPLETE_RESULT,
                json!({ "choices": [] }),
            );
        }
        RawCallback::with_data(
            callback_type::CHANNEL_MESSAGE,
            message_data(message, true, &Value::Null),
        )
    }
}

impl WireCodec for InteractionCodec {
    type Raw = Value;
    type Reply = RawResponse;

    fn normalize(&self, raw: Value, received_at: Instant) -> Result<Interaction, NormalizeError> {
        let raw: RawInteraction =
            serde_json::from_value(raw).map_err(|e| NormalizeError::Malformed(e.to_string()))?;

        let id = raw.id.clone().ok_or(NormalizeError::MissingField("id"))?;
        let type_id = raw.kind.ok_or(NormalizeError::MissingField("type"))?;
        let user = raw
            .user_id()
            .ok_or(NormalizeError::MissingField("user"))?
            .to_string();
        let data = raw.data.clone().unwrap_or_default();

        let (kind, raw_key, payload) = match type_id {
            interaction_type::APPLICATION_COMMAND => {
                let name = data.name.clone().ok_or(NormalizeError::MissingField("data.name"))?;
                let payload = json!({ "name": name, "options": options_map(&data.options) });
                (InteractionKind::Command, name, payload)
            }
            interaction_type::AUTOCOMPLETE => {
                let name = data.name.clone().ok_or(NormalizeError::MissingField("data.name"))?;
                let payload = json!({
                    "name": name,
                    "options": options_map(&data.options),
                    "focused": focused_option(&data.options),
                });
                (InteractionKind::Autocomplete, name, payload)
            }
            interaction_type::MESSAGE_COMPONENT => {
                let custom_id = custom_id(&data)?;
                let payload = json!({
                    "custom_id": custom_id,
                    "component_type": data.component_type,
                    "values": data.values,
                });
                (InteractionKind::Component, custom_id, payload)
            }
            interaction_type::MODAL_SUBMIT => {
                let custom_id = custom_id(&data)?;
                let values: Map<String, Value> = data
                    .components
                    .iter()
                    .flat_map(|row| row.components.iter())
                    .map(|field| (field.custom_id.clone(), field.value.clone()))
                    .collect();
                let payload = json!({ "custom_id": custom_id, "values": values });
                (InteractionKind::FormSubmit, custom_id, payload)
            }
            other => return Err(NormalizeError::UnsupportedKind(other)),
        };

        // Lineage: explicit field, then routing-key suffix, then the message
        // the component is attached to.
        let (routing_key, suffix_parent) = split_lineage(&raw_key);
        let parent = raw
            .parent_interaction_id
            .clone()
            .map(Into::into)
            .or(suffix_parent)
            .or_else(|| {
                raw.message
                    .as_ref()
                    .and_then(|m| m.interaction_metadata.as_ref())
                    .map(|meta| meta.id.as_str().into())
            });

        let mut builder = Interaction::builder(id, kind, routing_key, user)
            .payload(payload)
            .origin_scope(OriginScope {
                guild_id: raw.guild_id.clone(),
                channel_id: raw.channel_id.clone(),
            })
            .received_at(received_at);
        if let Some(parent) = parent {
            builder = builder.parent(parent);
        }
        if let Some(token) = raw.token {
            builder = builder.callback_token(token);
        }

        let interaction = builder.build();
        trace!(
            interaction_id = %interaction.id(),
            kind = %interaction.kind(),
            routing_key = %interaction.routing_key(),
            parent = ?interaction.parent_interaction_id(),
            "Normalized interaction"
        );
        Ok(interaction)
    }

    fn denormalize(&self, interaction: &Interaction, outcome: &DispatchOutcome) -> RawResponse {
        let callback = match outcome {
            DispatchOutcome::Handled(response) => self.callback(interaction, response),
            DispatchOutcome::NoMatch => {
                return RawResponse::error(
                    ReplyStatus::NotFound,
                    format!(
                        "no {} handler for '{}'",
                        interaction.kind(),
                        interaction.routing_key()
                    ),
                );
            }
            DispatchOutcome::HandlerFailed(_) => {
                self.fallback(interaction, &self.fallback.handler_failed)
            }
            DispatchOutcome::ConstraintViolated(_) => {
                self.fallback(interaction, &self.fallback.constraint_violated)
            }
        };
        RawResponse::ok(callback.to_value())
    }
}

fn custom_id(data: &RawData) -> Result<String, NormalizeError> {
    data.custom_id
        .clone()
        .ok_or(NormalizeError::MissingField("data.custom_id"))
}

fn message_data(content: &str, ephemeral: bool, components: &Value) -> Value {
    let mut data = Map::new();
    data.insert("content".to_string(), Value::from(content));
    if ephemeral {
        data.insert("flags".to_string(), Value::from(EPHEMERAL_FLAG));
    }
    if !components.is_null() {
        data.insert("components".to_string(), components.clone());
    }
    Value::Object(data)
}

/// Flattens (possibly nested subcommand) options into `name -> value`.
fn options_map(options: &[RawOption]) -> Map<String, Value> {
    let mut map = Map::new();
    for option in options {
        if option.options.is_empty() {
            map.insert(option.name.clone(), option.value.clone());
        } else {
            map.extend(options_map(&option.options));
        }
    }
    map
}

fn focused_option(options: &[RawOption]) -> Option<String> {
    options.iter().find_map(|option| {
        if option.focused {
            Some(option.name.clone())
        } else {
            focused_option(&option.options)
        }
    })
}

#[cfg(test)]
mod tests {
    use sluice_core::{ConstraintViolation, HandlerError, InteractionId, UserId};

    use super::*;

    fn normalize(raw: Value) -> Result<Interaction, NormalizeError> {
        InteractionCodec::new().normalize(raw, Instant::now())
    }

    #[tokio::test]
    async fn command_is_normalized() {
        let interaction = normalize(json!({
            "id": "100",
            "type": 2,
            "token": "tok",
            "guild_id": "g1",
            "channel_id": "c1",
            "member": { "user": { "id": "u1" } },
            "data": {
                "name": "ping",
                "options": [{ "name": "loud", "value": true }]
            }
        }))
        .unwrap();

        assert_eq!(interaction.id(), &InteractionId::from("100"));
        assert_eq!(interaction.kind(), InteractionKind::Command);
        assert_eq!(interaction.routing_key(), "ping");
        assert_eq!(interaction.origin_user(), &UserId::from("u1"));
        assert_eq!(interaction.callback_token(), Some("tok"));
        assert_eq!(interaction.payload()["options"]["loud"], json!(true));
        assert_eq!(
            interaction.origin_scope().and_then(|s| s.guild_id.as_deref()),
            Some("g1")
        );
        assert!(interaction.parent_interaction_id().is_none());
    }

    #[tokio::test]
    async fn form_submit_flattens_fields_and_strips_lineage() {
        let interaction = normalize(json!({
            "id": "200",
            "type": 5,
            "user": { "id": "u1" },
            "data": {
                "custom_id": "feedback::100",
                "components": [
                    { "components": [{ "custom_id": "title", "value": "Hi" }] },
                    { "components": [{ "custom_id": "body", "value": "Long text" }] }
                ]
            }
        }))
        .unwrap();

        assert_eq!(interaction.kind(), InteractionKind::FormSubmit);
        assert_eq!(interaction.routing_key(), "feedback");
        assert_eq!(
            interaction.parent_interaction_id(),
            Some(&InteractionId::from("100"))
        );
        assert_eq!(interaction.payload()["values"]["body"], json!("Long text"));
    }

    #[tokio::test]
    async fn explicit_parent_wins_over_message_metadata() {
        let interaction = normalize(json!({
            "id": "300",
            "type": 3,
            "user": { "id": "u1" },
            "parent_interaction_id": "1",
            "message": { "interaction_metadata": { "id": "2" } },
            "data": { "custom_id": "confirm-delete", "component_type": 2 }
        }))
        .unwrap();
        assert_eq!(interaction.parent_interaction_id(), Some(&InteractionId::from("1")));

        let interaction = normalize(json!({
            "id": "301",
            "type": 3,
            "user": { "id": "u1" },
            "message": { "interaction_metadata": { "id": "2" } },
            "data": { "custom_id": "confirm-delete", "component_type": 2 }
        }))
        .unwrap();
        assert_eq!(interaction.parent_interaction_id(), Some(&InteractionId::from("2")));
    }

    #[tokio::test]
    async fn autocomplete_reports_focused_option() {
        let interaction = normalize(json!({
            "id": "400",
            "type": 4,
            "user": { "id": "u1" },
            "data": {
                "name": "tag",
                "options": [{
                    "name": "find",
                    "options": [{ "name": "query", "value": "ru", "focused": true }]
                }]
            }
        }))
        .unwrap();
        assert_eq!(interaction.payload()["focused"], json!("query"));
        assert_eq!(interaction.payload()["options"]["query"], json!("ru"));
    }

    #[tokio::test]
    async fn malformed_payloads_are_rejected() {
        assert_eq!(
            normalize(json!({ "type": 2, "user": { "id": "u" } })).unwrap_err(),
            NormalizeError::MissingField("id")
        );
        assert_eq!(
            normalize(json!({ "id": "1", "type": 2, "data": { "name": "x" } })).unwrap_err(),
            NormalizeError::MissingField("user")
        );
        assert_eq!(
            normalize(json!({ "id": "1", "type": 42, "user": { "id": "u" } })).unwrap_err(),
            NormalizeError::UnsupportedKind(42)
        );
        assert!(matches!(
            normalize(json!("not an object")),
            Err(NormalizeError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn outcomes_are_denormalized() {
        let codec = InteractionCodec::new();
        let command = Interaction::builder("1", InteractionKind::Command, "ping", "u").build();

        let reply = codec.denormalize(
            &command,
            &DispatchOutcome::Handled(Response::ephemeral("pong")),
        );
        assert_eq!(reply.status, ReplyStatus::Ok);
        assert_eq!(
            reply.body,
            json!({ "type": 4, "data": { "content": "pong", "flags": 64 } })
        );

        let reply = codec.denormalize(
            &command,
            &DispatchOutcome::Handled(Response::form("feedback", "Feedback", json!([]))),
        );
        assert_eq!(reply.body["type"], json!(9));
        assert_eq!(reply.body["data"]["custom_id"], json!("feedback"));

        let reply = codec.denormalize(&command, &DispatchOutcome::NoMatch);
        assert_eq!(reply.status, ReplyStatus::NotFound);

        let reply = codec.denormalize(
            &command,
            &DispatchOutcome::HandlerFailed(HandlerError::Shutdown),
        );
        assert_eq!(reply.status, ReplyStatus::Ok);
        assert_eq!(reply.body["data"]["flags"], json!(64));
    }

    #[tokio::test]
    async fn autocomplete_failures_answer_with_no_choices() {
        let codec = InteractionCodec::new();
        let interaction =
            Interaction::builder("1", InteractionKind::Autocomplete, "tag", "u").build();
        let reply = codec.denormalize(
            &interaction,
            &DispatchOutcome::ConstraintViolated(ConstraintViolation::AckDeadlineMissed),
        );
        assert_eq!(reply.body, json!({ "type": 8, "data": { "choices": [] } }));
        assert_eq!(
            codec.failure_callback(&interaction),
            json!({ "type": 8, "data": { "choices": [] } })
        );
    }

    #[tokio::test]
    async fn router_failures_use_the_handler_failed_message() {
        let codec = InteractionCodec::with_fallback(FallbackMessages {
            handler_failed: "broken".to_string(),
            constraint_violated: "slow".to_string(),
        });
        let command = Interaction::builder("1", InteractionKind::Command, "ping", "u").build();

        assert_eq!(
            codec.failure_followup(),
            json!({ "content": "broken", "flags": 64 })
        );
        assert_eq!(
            codec.failure_callback(&command),
            json!({ "type": 4, "data": { "content": "broken", "flags": 64 } })
        );
    }
}
