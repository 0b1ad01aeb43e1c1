//! In-memory broker for tests/dev.
//!
//! - Per channel: an append-only log of published envelopes.
//! - Per `(channel, subscription)`: a durable group that starts at the
//!   beginning of the retained log, so envelopes published before the first
//!   subscribe are not lost.
//! - Competing consumers on one group split its envelopes.
//! - `nack` re-queues in log order with `attempt + 1`; closing or dropping a
//!   subscription hands its unsettled deliveries back to the group.
//!
//! Nothing is persisted; restarting the process loses every channel.
//!
//! [`InMemoryBroker::new`] keeps the whole history for inspection, which
//! suits tests. Long-running processes should use
//! [`InMemoryBroker::with_history`]: the log, the acknowledged ids and the
//! dead letters then keep only the most recent entries. Unsettled envelopes
//! are never dropped; each group holds its own copy until it settles them.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use courier_core::MessageId;

use crate::broker::{Acknowledger, Broker, BrokerError, DeadLetter, Delivery, Subscription};
use crate::envelope::Envelope;

#[derive(Debug, Clone)]
struct Pending {
    seq: u64,
    envelope: Envelope,
    attempt: u32,
}

#[derive(Debug)]
struct InFlight {
    consumer: u64,
    pending: Pending,
}

#[derive(Debug, Default)]
struct Group {
    ready: VecDeque<Pending>,
    in_flight: HashMap<u64, InFlight>,
    acknowledged: VecDeque<MessageId>,
    dead_letters: VecDeque<DeadLetter>,
    delivered: u64,
    notify: Arc<Notify>,
}

impl Group {
    /// Put `pending` back in log order.
    fn requeue(&mut self, pending: Pending) {
        let at = self.ready.partition_point(|p| p.seq < pending.seq);
        self.ready.insert(at, pending);
    }

    fn take(&mut self, tag: u64) -> Option<Pending> {
        self.in_flight.remove(&tag).map(|f| f.pending)
    }
}

#[derive(Debug, Default)]
struct ChannelLog {
    log: VecDeque<Envelope>,
    /// Sequence number of `log[0]`.
    base: u64,
    groups: BTreeMap<String, Group>,
}

#[derive(Debug, Default)]
struct State {
    channels: HashMap<String, ChannelLog>,
    /// Entries kept per log / inspection list; `None` keeps everything.
    history: Option<usize>,
    closed: bool,
}

/// Drop the oldest entries beyond `limit`; returns how many went.
fn trim<T>(entries: &mut VecDeque<T>, limit: Option<usize>) -> usize {
    let Some(limit) = limit else {
        return 0;
    };
    let excess = entries.len().saturating_sub(limit);
    entries.drain(..excess);
    excess
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    next_tag: AtomicU64,
    next_consumer: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // Every mutation completes before the guard drops, so a poisoned
        // lock still guards consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_group<T>(
        &self,
        channel: &str,
        subscription: &str,
        f: impl FnOnce(&mut Group, Option<usize>) -> T,
    ) -> Option<T> {
        let mut state = self.lock();
        let history = state.history;
        state
            .channels
            .get_mut(channel)
            .and_then(|c| c.groups.get_mut(subscription))
            .map(|group| f(group, history))
    }
}

/// Process-local [`Broker`] with inspection helpers.
///
/// Cloning is cheap; clones share the same channels.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    /// A broker that keeps every envelope and settlement for inspection.
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker whose logs and inspection lists keep at most `limit`
    /// entries each (at least one).
    ///
    /// Groups created later only see the retained part of a log.
    pub fn with_history(limit: usize) -> Self {
        let broker = Self::default();
        broker.shared.lock().history = Some(limit.max(1));
        broker
    }

    /// Refuse new publishes and end every open subscription.
    pub fn shutdown(&self) {
        let mut state = self.shared.lock();
        state.closed = true;
        for channel in state.channels.values() {
            for group in channel.groups.values() {
                group.notify.notify_waiters();
            }
        }
    }

    /// Retained envelopes published to `channel`, in publish order.
    pub fn published(&self, channel: &str) -> Vec<Envelope> {
        self.shared
            .lock()
            .channels
            .get(channel)
            .map(|c| c.log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Names of the channels that have seen a publish or a subscribe.
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<_> = self.shared.lock().channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Envelopes not yet settled by the group (waiting or in flight).
    pub fn pending(&self, channel: &str, subscription: &str) -> usize {
        self.shared
            .with_group(channel, subscription, |g, _| g.ready.len() + g.in_flight.len())
            .unwrap_or(0)
    }

    /// Ids acknowledged by the group, in acknowledgment order.
    pub fn acknowledged(&self, channel: &str, subscription: &str) -> Vec<MessageId> {
        self.shared
            .with_group(channel, subscription, |g, _| g.acknowledged.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn dead_letters(&self, channel: &str, subscription: &str) -> Vec<DeadLetter> {
        self.shared
            .with_group(channel, subscription, |g, _| g.dead_letters.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of deliveries handed out by the group, redeliveries included.
    pub fn delivered(&self, channel: &str, subscription: &str) -> u64 {
        self.shared
            .with_group(channel, subscription, |g, _| g.delivered)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, channel: &str, envelope: Envelope) -> Result<(), BrokerError> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(BrokerError::Closed);
        }

        let history = state.history;
        let log = state.channels.entry(channel.to_string()).or_default();
        let seq = log.base + log.log.len() as u64;
        log.log.push_back(envelope.clone());
        log.base += trim(&mut log.log, history) as u64;
        for group in log.groups.values_mut() {
            group.ready.push_back(Pending {
                seq,
                envelope: envelope.clone(),
                attempt: 1,
            });
            group.notify.notify_waiters();
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
        subscription: &str,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(BrokerError::Closed);
        }

        let log = state.channels.entry(channel.to_string()).or_default();
        let base = log.base;
        let backlog: VecDeque<Pending> = log
            .log
            .iter()
            .enumerate()
            .map(|(offset, envelope)| Pending {
                seq: base + offset as u64,
                envelope: envelope.clone(),
                attempt: 1,
            })
            .collect();
        let group = log
            .groups
            .entry(subscription.to_string())
            .or_insert_with(|| Group {
                ready: backlog,
                ..Group::default()
            });
        let notify = Arc::clone(&group.notify);

        Ok(Box::new(InMemorySubscription {
            shared: Arc::clone(&self.shared),
            channel: channel.to_string(),
            subscription: subscription.to_string(),
            consumer: self.shared.next_consumer.fetch_add(1, Ordering::Relaxed),
            notify,
            closed: false,
        }))
    }
}

struct InMemorySubscription {
    shared: Arc<Shared>,
    channel: String,
    subscription: String,
    consumer: u64,
    notify: Arc<Notify>,
    closed: bool,
}

impl InMemorySubscription {
    fn try_take(&self) -> Result<Option<Delivery>, ()> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(());
        }
        let Some(group) = state
            .channels
            .get_mut(&self.channel)
            .and_then(|c| c.groups.get_mut(&self.subscription))
        else {
            return Err(());
        };
        let Some(pending) = group.ready.pop_front() else {
            return Ok(None);
        };

        let tag = self.shared.next_tag.fetch_add(1, Ordering::Relaxed);
        let delivery = Delivery::new(
            pending.envelope.clone(),
            pending.attempt,
            Arc::new(InMemoryAcker {
                shared: Arc::clone(&self.shared),
                channel: self.channel.clone(),
                subscription: self.subscription.clone(),
                tag,
                settled: AtomicBool::new(false),
            }),
        );
        group.delivered += 1;
        group.in_flight.insert(
            tag,
            InFlight {
                consumer: self.consumer,
                pending,
            },
        );
        Ok(Some(delivery))
    }

    /// Hand unsettled deliveries of this consumer back to the group.
    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let consumer = self.consumer;
        self.shared.with_group(&self.channel, &self.subscription, |group, _| {
            let tags: Vec<u64> = group
                .in_flight
                .iter()
                .filter(|(_, f)| f.consumer == consumer)
                .map(|(tag, _)| *tag)
                .collect();
            if tags.is_empty() {
                return;
            }
            for tag in tags {
                if let Some(pending) = group.take(tag) {
                    group.requeue(pending);
                }
            }
            group.notify.notify_waiters();
        });
    }
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next(&mut self) -> Option<Delivery> {
        if self.closed {
            return None;
        }
        let notify = Arc::clone(&self.notify);
        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            // Register before checking so a publish in between is not missed.
            notified.as_mut().enable();

            match self.try_take() {
                Ok(Some(delivery)) => return Some(delivery),
                Ok(None) => notified.await,
                Err(()) => return None,
            }
        }
    }

    async fn close(&mut self) {
        self.release();
    }
}

impl Drop for InMemorySubscription {
    fn drop(&mut self) {
        self.release();
    }
}

struct InMemoryAcker {
    shared: Arc<Shared>,
    channel: String,
    subscription: String,
    tag: u64,
    settled: AtomicBool,
}

impl InMemoryAcker {
    /// First settlement wins; later calls are no-ops.
    fn settle(&self, f: impl FnOnce(&mut Group, Pending)) {
        if self.settled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.with_group(&self.channel, &self.subscription, |group, history| {
            // Missing tag: the delivery was already handed back on close.
            if let Some(pending) = group.take(self.tag) {
                f(group, pending);
            }
            trim(&mut group.acknowledged, history);
            trim(&mut group.dead_letters, history);
        });
    }
}

#[async_trait]
impl Acknowledger for InMemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.settle(|group, pending| group.acknowledged.push_back(pending.envelope.message_id()));
        Ok(())
    }

    async fn nack(&self, _reason: &str) -> Result<(), BrokerError> {
        self.settle(|group, mut pending| {
            pending.attempt += 1;
            group.requeue(pending);
            group.notify.notify_waiters();
        });
        Ok(())
    }

    async fn dead_letter(&self, reason: &str) -> Result<(), BrokerError> {
        let (channel, subscription) = (self.channel.clone(), self.subscription.clone());
        self.settle(|group, pending| {
            group.dead_letters.push_back(DeadLetter {
                channel,
                subscription,
                attempts: pending.attempt,
                envelope: pending.envelope,
                reason: reason.to_string(),
            })
        });
        Ok(())
    }
}
