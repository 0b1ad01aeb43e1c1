//! Subscription plan: which loops the dispatcher runs.

use std::collections::BTreeMap;

use courier_events::{HandlerRegistration, HandlerRegistry, MessageKind, Topology};

/// One consumption loop: a durable subscription and the handlers behind it.
#[derive(Debug, Clone)]
pub struct SubscriptionPlan {
    pub channel: String,
    pub subscription: String,
    pub kind: MessageKind,
    /// Type tag → handler bound to this subscription.
    routes: BTreeMap<&'static str, HandlerRegistration>,
    /// Whether the channel carries types this subscription does not handle.
    filtered: bool,
}

impl SubscriptionPlan {
    pub fn route(&self, message_type: &str) -> Option<&HandlerRegistration> {
        self.routes.get(message_type)
    }

    pub fn message_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.routes.keys().copied()
    }

    /// Unknown types are skipped (acked) rather than dead-lettered.
    pub fn is_filtered(&self) -> bool {
        self.filtered
    }
}

/// Derive every subscription from the registry and the naming rules.
///
/// - one plan per command type (channel = group = type name)
/// - per-type events: one plan per (type, handler)
/// - shared events: one plan per handler name, covering all its types
pub fn build(registry: &HandlerRegistry, topology: &Topology) -> Vec<SubscriptionPlan> {
    let mut plans = Vec::new();

    for registration in registry.command_registrations() {
        let message_type = registration.message_type();
        plans.push(SubscriptionPlan {
            channel: topology.command_channel(message_type),
            subscription: topology.command_subscription(message_type),
            kind: MessageKind::Command,
            routes: BTreeMap::from([(message_type, registration.clone())]),
            filtered: false,
        });
    }

    if topology.is_shared() {
        let mut by_handler: BTreeMap<&str, BTreeMap<&'static str, HandlerRegistration>> =
            BTreeMap::new();
        for registration in registry.event_registrations() {
            by_handler
                .entry(registration.name())
                .or_default()
                .insert(registration.message_type(), registration.clone());
        }

        for (name, routes) in by_handler {
            // Any registered type works here; the shared channel ignores it.
            let Some(first) = routes.keys().next().copied() else {
                continue;
            };
            plans.push(SubscriptionPlan {
                channel: topology.event_channel(first),
                subscription: topology.event_subscription(name),
                kind: MessageKind::Event,
                routes,
                filtered: true,
            });
        }
    } else {
        for registration in registry.event_registrations() {
            let message_type = registration.message_type();
            plans.push(SubscriptionPlan {
                channel: topology.event_channel(message_type),
                subscription: topology.event_subscription(registration.name()),
                kind: MessageKind::Event,
                routes: BTreeMap::from([(message_type, registration.clone())]),
                filtered: false,
            });
        }
    }

    plans
}
