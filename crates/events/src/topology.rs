//! Channel and subscription naming.
//!
//! Commands always get one channel per command type with a single consumer
//! group named after the type. Events follow an [`EventTopicPolicy`]:
//!
//! - `Shared`: every event type goes to one topic; each event handler has its
//!   own group on it and skips envelopes of types it does not handle.
//! - `PerType`: one topic per event type; each handler subscribes only to the
//!   topic of its type.
//!
//! Subscription names for events are the handler names, so two handlers never
//! share a group and each receives its own copy of every event.

use serde::{Deserialize, Serialize};

/// Default topic used by [`EventTopicPolicy::Shared`].
pub const DEFAULT_EVENT_TOPIC: &str = "events";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum EventTopicPolicy {
    Shared { topic: String },
    PerType,
}

impl Default for EventTopicPolicy {
    fn default() -> Self {
        EventTopicPolicy::Shared {
            topic: DEFAULT_EVENT_TOPIC.to_string(),
        }
    }
}

/// Naming rules shared by publishers and the dispatcher.
///
/// Both sides must be built from the same policy, otherwise events land on
/// channels nobody consumes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Topology {
    events: EventTopicPolicy,
}

impl Topology {
    pub fn new(events: EventTopicPolicy) -> Self {
        Self { events }
    }

    pub fn event_policy(&self) -> &EventTopicPolicy {
        &self.events
    }

    /// Whether event handlers share one topic (and must filter by type).
    pub fn is_shared(&self) -> bool {
        matches!(self.events, EventTopicPolicy::Shared { .. })
    }

    pub fn command_channel(&self, message_type: &str) -> String {
        message_type.to_string()
    }

    /// Commands are point-to-point: one group per command type.
    pub fn command_subscription(&self, message_type: &str) -> String {
        message_type.to_string()
    }

    pub fn event_channel(&self, message_type: &str) -> String {
        match &self.events {
            EventTopicPolicy::Shared { topic } => topic.clone(),
            EventTopicPolicy::PerType => message_type.to_string(),
        }
    }

    pub fn event_subscription(&self, handler_name: &str) -> String {
        handler_name.to_string()
    }
}
