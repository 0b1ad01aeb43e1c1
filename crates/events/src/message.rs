//! Typed messages: commands and events.
//!
//! A message type is identified on the wire by its [`Message::MESSAGE_TYPE`]
//! name. That name is the dispatch key used by the registry and the channel
//! naming policy, so it must stay stable across releases: rename the Rust type
//! freely, never the constant.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A serializable, immutable payload with a globally unique type name.
pub trait Message: Serialize + DeserializeOwned + Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable type name (e.g. `"booking.RoomBooked"`).
    const MESSAGE_TYPE: &'static str;
}

/// A message directed at exactly one handler (intent to change state).
///
/// Commands are delivered point-to-point: one command channel per command
/// type, consumed by a single logical consumer group.
pub trait Command: Message {}

/// A message describing a fact that already happened.
///
/// Events are broadcast: every registered event handler gets its own durable
/// copy. Publishing an event nobody listens to is valid.
pub trait Event: Message {}

/// The two disjoint message kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    Command,
    Event,
}

impl core::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MessageKind::Command => f.write_str("command"),
            MessageKind::Event => f.write_str("event"),
        }
    }
}
