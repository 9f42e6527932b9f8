//! The canonical interaction model.
//!
//! An [`Interaction`] is built once by a delivery strategy from raw
//! transport data and is never mutated afterwards. All fields are private;
//! construction goes through [`InteractionBuilder`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

/// Time the outer protocol allows between receipt and the first response.
///
/// Fixed by the protocol, not configurable.
pub const ACK_WINDOW: Duration = Duration::from_secs(3);

/// Separator between a routing key and the id of the interaction it
/// continues, e.g. `"feedback-form::1192830128"`.
pub const LINEAGE_SEPARATOR: &str = "::";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an id from any string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Platform-unique interaction identifier.
    InteractionId
);

string_id!(
    /// Identifier of the user that originated an interaction.
    UserId
);

/// The four kinds of interaction the core routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    /// A slash command invocation.
    Command,
    /// A button or select-menu press.
    Component,
    /// A submitted form (modal).
    FormSubmit,
    /// An autocomplete request for a command option.
    Autocomplete,
}

impl InteractionKind {
    /// Returns the kind name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Component => "component",
            Self::FormSubmit => "form_submit",
            Self::Autocomplete => "autocomplete",
        }
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an interaction happened, when it happened inside a guild/channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginScope {
    /// Guild the interaction came from.
    pub guild_id: Option<String>,
    /// Channel the interaction came from.
    pub channel_id: Option<String>,
}

impl OriginScope {
    /// Returns `true` if neither guild nor channel is known.
    pub fn is_empty(&self) -> bool {
        self.guild_id.is_none() && self.channel_id.is_none()
    }
}

/// A normalized inbound event requiring a response.
#[derive(Debug, Clone)]
pub struct Interaction {
    id: InteractionId,
    kind: InteractionKind,
    routing_key: String,
    payload: Value,
    origin_user: UserId,
    origin_scope: Option<OriginScope>,
    received_at: Instant,
    ack_deadline: Instant,
    parent_interaction_id: Option<InteractionId>,
    callback_token: Option<String>,
}

impl Interaction {
    /// Starts building an interaction received now.
    pub fn builder(
        id: impl Into<InteractionId>,
        kind: InteractionKind,
        routing_key: impl Into<String>,
        origin_user: impl Into<UserId>,
    ) -> InteractionBuilder {
        InteractionBuilder {
            id: id.into(),
            kind,
            routing_key: routing_key.into(),
            payload: Value::Null,
            origin_user: origin_user.into(),
            origin_scope: None,
            received_at: None,
            parent_interaction_id: None,
            callback_token: None,
        }
    }

    /// Platform-unique id.
    pub fn id(&self) -> &InteractionId {
        &self.id
    }

    /// Interaction kind.
    pub fn kind(&self) -> InteractionKind {
        self.kind
    }

    /// Routing key (command name or component/form identifier).
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Kind-specific structured payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Originating user.
    pub fn origin_user(&self) -> &UserId {
        &self.origin_user
    }

    /// Originating guild/channel, if any.
    pub fn origin_scope(&self) -> Option<&OriginScope> {
        self.origin_scope.as_ref()
    }

    /// When the delivery strategy received the raw event.
    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    /// Absolute time by which a response must be produced.
    pub fn ack_deadline(&self) -> Instant {
        self.ack_deadline
    }

    /// The interaction this one continues, if any.
    pub fn parent_interaction_id(&self) -> Option<&InteractionId> {
        self.parent_interaction_id.as_ref()
    }

    /// Token used to address out-of-band replies to this interaction.
    pub fn callback_token(&self) -> Option<&str> {
        self.callback_token.as_deref()
    }
}

/// Builder for [`Interaction`].
#[derive(Debug)]
pub struct InteractionBuilder {
    id: InteractionId,
    kind: InteractionKind,
    routing_key: String,
    payload: Value,
    origin_user: UserId,
    origin_scope: Option<OriginScope>,
    received_at: Option<Instant>,
    parent_interaction_id: Option<InteractionId>,
    callback_token: Option<String>,
}

impl InteractionBuilder {
    /// Sets the kind-specific payload.
    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Sets the originating guild/channel. Empty scopes are dropped.
    pub fn origin_scope(mut self, scope: OriginScope) -> Self {
        self.origin_scope = (!scope.is_empty()).then_some(scope);
        self
    }

    /// Overrides the receipt time (defaults to now).
    pub fn received_at(mut self, at: Instant) -> Self {
        self.received_at = Some(at);
        self
    }

    /// Marks this interaction as a follow-up step of `parent`.
    pub fn parent(mut self, parent: impl Into<InteractionId>) -> Self {
        self.parent_interaction_id = Some(parent.into());
        self
    }

    /// Sets the callback token.
    pub fn callback_token(mut self, token: impl Into<String>) -> Self {
        self.callback_token = Some(token.into());
        self
    }

    /// Finishes the interaction; the ack deadline is derived from the
    /// receipt time and [`ACK_WINDOW`].
    pub fn build(self) -> Interaction {
        let received_at = self.received_at.unwrap_or_else(Instant::now);
        Interaction {
            id: self.id,
            kind: self.kind,
            routing_key: self.routing_key,
            payload: self.payload,
            origin_user: self.origin_user,
            origin_scope: self.origin_scope,
            received_at,
            ack_deadline: received_at + ACK_WINDOW,
            parent_interaction_id: self.parent_interaction_id,
            callback_token: self.callback_token,
        }
    }
}

/// Splits `"<key>::<parent>"` into the bare routing key and the parent id.
///
/// Keys without the separator, or with an empty half, are returned whole.
pub fn split_lineage(raw_key: &str) -> (&str, Option<InteractionId>) {
    match raw_key.rsplit_once(LINEAGE_SEPARATOR) {
        Some((key, parent)) if !key.is_empty() && !parent.is_empty() => {
            (key, Some(InteractionId::from(parent)))
        }
        _ => (raw_key, None),
    }
}
