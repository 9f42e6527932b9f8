//! Raw wire shapes of the outer bot-platform protocol.
//!
//! Only the fields the core needs are modelled; everything else in the
//! payload is ignored on the way in.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Interaction type discriminators.
pub mod interaction_type {
    pub const PING: u64 = 1;
    pub const APPLICATION_COMMAND: u64 = 2;
    pub const MESSAGE_COMPONENT: u64 = 3;
    pub const AUTOCOMPLETE: u64 = 4;
    pub const MODAL_SUBMIT: u64 = 5;
}

/// Callback type discriminators.
pub mod callback_type {
    pub const PONG: u64 = 1;
    pub const CHANNEL_MESSAGE: u64 = 4;
    pub const DEFERRED_CHANNEL_MESSAGE: u64 = 5;
    pub const DEFERRED_UPDATE_MESSAGE: u64 = 6;
    pub const AUTOCOMPLETE_RESULT: u64 = 8;
    pub const MODAL: u64 = 9;
}

/// Message flag: only the invoking user sees the message.
pub const EPHEMERAL_FLAG: u64 = 1 << 6;

#[derive(Debug, Clone, Deserialize)]
pub struct RawInteraction {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<u64>,
    pub token: Option<String>,
    #[serde(default)]
    pub data: Option<RawData>,
    pub guild_id: Option<String>,
    pub channel_id: Option<String>,
    pub member: Option<RawMember>,
    pub user: Option<RawUser>,
    pub message: Option<RawMessage>,
    /// Explicit lineage, set by hosts that track it themselves.
    pub parent_interaction_id: Option<String>,
}

impl RawInteraction {
    /// Guild invocations carry the user under `member`, DMs under `user`.
    pub fn user_id(&self) -> Option<&str> {
        self.member
            .as_ref()
            .and_then(|m| m.user.as_ref())
            .or(self.user.as_ref())
            .map(|u| u.id.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawData {
    pub name: Option<String>,
    pub custom_id: Option<String>,
    pub component_type: Option<u64>,
    #[serde(default)]
    pub values: Vec<Value>,
    #[serde(default)]
    pub options: Vec<RawOption>,
    #[serde(default)]
    pub components: Vec<RawRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawOption {
    pub name: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub focused: bool,
    /// Subcommand options nest.
    #[serde(default)]
    pub options: Vec<RawOption>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRow {
    #[serde(default)]
    pub components: Vec<RawField>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawField {
    pub custom_id: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMember {
    pub user: Option<RawUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawUser {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    pub interaction_metadata: Option<RawInteractionMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawInteractionMetadata {
    pub id: String,
}

/// Body of an interaction callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawCallback {
    #[serde(rename = "type")]
    pub kind: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RawCallback {
    pub fn new(kind: u64) -> Self {
        Self { kind, data: None }
    }

    pub fn with_data(kind: u64, data: Value) -> Self {
        Self {
            kind,
            data: Some(data),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
