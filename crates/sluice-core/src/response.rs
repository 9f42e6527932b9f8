//! Canonical responses produced by handlers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    /// Text content.
    pub content: String,
    /// Only visible to the invoking user.
    #[serde(default)]
    pub ephemeral: bool,
    /// Pre-shaped component rows, passed through untouched.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub components: Value,
}

/// A form (modal) to open in reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormBody {
    /// Routing key the submission will carry.
    pub custom_id: String,
    /// Form title.
    pub title: String,
    /// Pre-shaped input rows, passed through untouched.
    pub fields: Value,
}

/// One autocomplete suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    /// Label shown to the user.
    pub name: String,
    /// Value submitted when chosen.
    pub value: Value,
}

impl Choice {
    /// Creates a suggestion.
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// What a handler answers with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Response {
    /// Reply with a message.
    Message(MessageBody),
    /// Open a form.
    Form(FormBody),
    /// Autocomplete suggestions.
    Choices(Vec<Choice>),
    /// Provisional reply; the real one follows out of band.
    Deferred,
    /// Acknowledge without visible output.
    Acknowledge,
}

impl Response {
    /// A plain public message.
    pub fn message(content: impl Into<String>) -> Self {
        Self::Message(MessageBody {
            content: content.into(),
            ..Default::default()
        })
    }

    /// A message only the invoking user can see.
    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self::Message(MessageBody {
            content: content.into(),
            ephemeral: true,
            components: Value::Null,
        })
    }

    /// Opens a form whose submission routes to `custom_id`.
    pub fn form(custom_id: impl Into<String>, title: impl Into<String>, fields: Value) -> Self {
        Self::Form(FormBody {
            custom_id: custom_id.into(),
            title: title.into(),
            fields,
        })
    }

    /// Autocomplete suggestions.
    pub fn choices(choices: impl IntoIterator<Item = Choice>) -> Self {
        Self::Choices(choices.into_iter().collect())
    }

    /// Returns the message text, if this is a message.
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Message(body) => Some(&body.content),
            _ => None,
        }
    }
}

impl From<String> for Response {
    fn from(content: String) -> Self {
        Self::message(content)
    }
}

impl From<&str> for Response {
    fn from(content: &str) -> Self {
        Self::message(content)
    }
}
