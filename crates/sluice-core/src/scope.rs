//! Subscription scopes requested from the push channel at connect time.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::interaction::InteractionKind;

/// Routing keys with this prefix are expected in direct messages.
const DM_PREFIX: &str = "dm:";

/// A subscription scope (gateway intent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Guilds,
    GuildMembers,
    GuildMessages,
    DirectMessages,
    MessageContent,
}

impl Scope {
    /// Bit of this scope in the connect-time intents bitfield.
    pub fn intent_bit(&self) -> u64 {
        match self {
            Self::Guilds => 1 << 0,
            Self::GuildMembers => 1 << 1,
            Self::GuildMessages => 1 << 9,
            Self::DirectMessages => 1 << 12,
            Self::MessageContent => 1 << 15,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Guilds => "guilds",
            Self::GuildMembers => "guild_members",
            Self::GuildMessages => "guild_messages",
            Self::DirectMessages => "direct_messages",
            Self::MessageContent => "message_content",
        };
        f.write_str(name)
    }
}

/// An ordered set of scopes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeSet(BTreeSet<Scope>);

impl ScopeSet {
    /// The empty set.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, scope: Scope) -> bool {
        self.0.insert(scope)
    }

    pub fn contains(&self, scope: Scope) -> bool {
        self.0.contains(&scope)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Scope> + '_ {
        self.0.iter().copied()
    }

    /// Adds every scope of `other`.
    pub fn extend_from(&mut self, other: &ScopeSet) {
        self.0.extend(other.0.iter().copied());
    }

    /// Folds the set into an intents bitfield.
    pub fn intents(&self) -> u64 {
        self.0.iter().fold(0, |bits, scope| bits | scope.intent_bit())
    }
}

impl FromIterator<Scope> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = Scope>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Scope> for ScopeSet {
    fn extend<I: IntoIterator<Item = Scope>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl<const N: usize> From<[Scope; N]> for ScopeSet {
    fn from(scopes: [Scope; N]) -> Self {
        scopes.into_iter().collect()
    }
}

/// Infers the scopes a handler needs from its kind and routing key.
///
/// Pure: the same inputs always give the same set.
pub fn infer_scopes(kind: InteractionKind, routing_key: &str) -> ScopeSet {
    let mut scopes = match kind {
        InteractionKind::Command | InteractionKind::FormSubmit | InteractionKind::Autocomplete => {
            ScopeSet::from([Scope::Guilds])
        }
        InteractionKind::Component => ScopeSet::from([Scope::Guilds, Scope::GuildMessages]),
    };
    if routing_key.starts_with(DM_PREFIX) {
        scopes.insert(Scope::DirectMessages);
    }
    scopes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_scopes_per_kind() {
        assert_eq!(
            infer_scopes(InteractionKind::Command, "ping"),
            ScopeSet::from([Scope::Guilds])
        );
        assert_eq!(
            infer_scopes(InteractionKind::Component, "confirm"),
            ScopeSet::from([Scope::Guilds, Scope::GuildMessages])
        );
    }

    #[test]
    fn dm_prefix_adds_direct_messages() {
        let scopes = infer_scopes(InteractionKind::FormSubmit, "dm:feedback");
        assert!(scopes.contains(Scope::DirectMessages));
        assert!(scopes.contains(Scope::Guilds));
    }

    #[test]
    fn intents_bitfield() {
        let scopes = ScopeSet::from([Scope::Guilds, Scope::GuildMessages]);
        assert_eq!(scopes.intents(), 1 | (1 << 9));
        assert_eq!(ScopeSet::new().intents(), 0);
    }
}
