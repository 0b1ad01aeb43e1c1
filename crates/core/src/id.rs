//! Strongly-typed identifiers carried in message envelopes.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a single published message (one per envelope).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

/// Identifier shared by every message of one causal chain
/// (a command, the events it produced, the commands those triggered, ...).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Fresh UUIDv7, so ids sort by creation time.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::from_str(s)
                    .map(Self)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {e}", $name)))
            }
        }
    };
}

impl_uuid_newtype!(MessageId, "MessageId");
impl_uuid_newtype!(CorrelationId, "CorrelationId");

impl CorrelationId {
    /// Start a new causal chain rooted at `message_id`.
    ///
    /// The first message of a chain uses its own id as correlation id, so
    /// the root can be found from any descendant.
    pub fn root(message_id: MessageId) -> Self {
        Self(message_id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_its_own_display_form() {
        let id = MessageId::new();
        let parsed: MessageId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn rejects_garbage() {
        let err = "not-a-uuid".parse::<CorrelationId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidId(msg) if msg.starts_with("CorrelationId")));
    }

    #[test]
    fn root_correlation_shares_the_message_uuid() {
        let id = MessageId::new();
        assert_eq!(CorrelationId::root(id).as_uuid(), id.as_uuid());
    }

    #[test]
    fn serializes_transparently() {
        let id = MessageId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }

    #[test]
    fn message_ids_are_time_ordered() {
        let a = MessageId::new();
        let b = MessageId::new();
        assert!(a <= b);
    }
}
