//! Per-subscription counters.
//!
//! A loop moves between `Consuming` and `Processing`; how each delivery was
//! settled is not a loop state but an [`Outcome`], counted per kind and kept
//! as `last_outcome`. Every received delivery ends in exactly one outcome:
//!
//! ```text
//! received = acked + retried + dead_lettered + discarded
//! ```
//!
//! (a failed ack leaves the delivery without an outcome; the broker
//! redelivers it.)

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use courier_events::MessageKind;

/// Lifecycle of one consumption loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Consuming,
    Processing,
    Stopped,
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Handled and acknowledged.
    Acked,
    /// Failed and handed back for redelivery.
    Retried,
    /// Parked: undecodable, unroutable, or out of deliveries.
    DeadLettered,
    /// Acknowledged without running a handler (shared topic, foreign type).
    Discarded,
}

/// Per-subscription runtime statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStats {
    pub channel: String,
    pub subscription: String,
    #[serde(serialize_with = "serialize_kind")]
    pub kind: MessageKind,
    pub state: LoopState,
    pub received: u64,
    pub acked: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    /// Skipped on a shared topic (type not handled by this subscription).
    pub discarded: u64,
    pub panics: u64,
    pub timeouts: u64,
    pub last_outcome: Option<Outcome>,
}

fn serialize_kind<S: serde::Serializer>(kind: &MessageKind, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(kind)
}

impl SubscriptionStats {
    fn new(channel: &str, subscription: &str, kind: MessageKind) -> Self {
        Self {
            channel: channel.to_string(),
            subscription: subscription.to_string(),
            kind,
            state: LoopState::Idle,
            received: 0,
            acked: 0,
            retried: 0,
            dead_lettered: 0,
            discarded: 0,
            panics: 0,
            timeouts: 0,
            last_outcome: None,
        }
    }
}

/// Shared cell written by one loop, read by the handle.
#[derive(Debug, Clone)]
pub(crate) struct StatsCell(Arc<Mutex<SubscriptionStats>>);

impl StatsCell {
    pub(crate) fn new(channel: &str, subscription: &str, kind: MessageKind) -> Self {
        Self(Arc::new(Mutex::new(SubscriptionStats::new(
            channel,
            subscription,
            kind,
        ))))
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut SubscriptionStats)) {
        let mut stats = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut stats);
    }

    pub(crate) fn record(&self, outcome: Outcome) {
        self.update(|s| {
            match outcome {
                Outcome::Acked => s.acked += 1,
                Outcome::Retried => s.retried += 1,
                Outcome::DeadLettered => s.dead_lettered += 1,
                Outcome::Discarded => s.discarded += 1,
            }
            s.last_outcome = Some(outcome);
        });
    }

    pub(crate) fn set_state(&self, state: LoopState) {
        self.update(|s| s.state = state);
    }

    pub(crate) fn snapshot(&self) -> SubscriptionStats {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_outcome_has_its_own_counter() {
        let cell = StatsCell::new("events", "audit", MessageKind::Event);
        for outcome in [
            Outcome::Acked,
            Outcome::Discarded,
            Outcome::Retried,
            Outcome::Acked,
            Outcome::DeadLettered,
        ] {
            cell.update(|s| s.received += 1);
            cell.record(outcome);
        }

        let stats = cell.snapshot();
        assert_eq!(
            (stats.acked, stats.retried, stats.dead_lettered, stats.discarded),
            (2, 1, 1, 1)
        );
        assert_eq!(
            stats.received,
            stats.acked + stats.retried + stats.dead_lettered + stats.discarded
        );
        assert_eq!(stats.last_outcome, Some(Outcome::DeadLettered));
    }
}
