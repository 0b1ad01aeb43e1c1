//! Broker boundary (mechanics only).
//!
//! Everything above this module speaks in [`Envelope`]s, channels and
//! subscription names. A broker implementation provides:
//!
//! - **Channels**: named, append-only streams. Publishing appends.
//! - **Durable subscriptions**: a `(channel, subscription)` pair is a consumer
//!   group. Every group sees every envelope published to the channel, from the
//!   group's creation point on. Envelopes published before anyone subscribed
//!   are retained and delivered once the group exists.
//! - **Competing consumers**: several [`Subscription`] handles on the same
//!   group split its envelopes; each delivery goes to one of them.
//! - **Settlement**: a delivery is `ack`ed (done), `nack`ed (redeliver later,
//!   possibly to another consumer) or dead-lettered (parked for inspection).
//!   Unsettled deliveries are redelivered when their consumer goes away.
//!
//! ## Delivery Guarantees
//!
//! At-least-once. The same envelope may be seen more than once by a group, so
//! handlers must be idempotent. No cross-channel ordering is promised.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::envelope::Envelope;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker cannot be reached right now (transient).
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The broker refused the envelope.
    #[error("publish to `{channel}` failed: {reason}")]
    Publish { channel: String, reason: String },

    /// The consumer group could not be created or joined.
    #[error("subscribe to `{channel}` as `{subscription}` failed: {reason}")]
    Subscribe {
        channel: String,
        subscription: String,
        reason: String,
    },

    /// A settlement call failed.
    #[error("settlement failed: {0}")]
    Settle(String),

    /// The broker has been shut down.
    #[error("broker closed")]
    Closed,
}

/// Transport for envelopes.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Append `envelope` to `channel`. Returns once the broker accepted it.
    async fn publish(&self, channel: &str, envelope: Envelope) -> Result<(), BrokerError>;

    /// Join (creating if needed) the durable group `subscription` on `channel`.
    async fn subscribe(
        &self,
        channel: &str,
        subscription: &str,
    ) -> Result<Box<dyn Subscription>, BrokerError>;
}

#[async_trait]
impl<B> Broker for Arc<B>
where
    B: Broker + ?Sized,
{
    async fn publish(&self, channel: &str, envelope: Envelope) -> Result<(), BrokerError> {
        (**self).publish(channel, envelope).await
    }

    async fn subscribe(
        &self,
        channel: &str,
        subscription: &str,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        (**self).subscribe(channel, subscription).await
    }
}

/// One consumer attached to a durable group.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery. `None` means the subscription is finished
    /// (closed locally or by the broker).
    async fn next(&mut self) -> Option<Delivery>;

    /// Stop receiving. Deliveries not yet settled become eligible for
    /// redelivery to other consumers of the group.
    async fn close(&mut self);
}

/// Broker-side settlement of a single delivery.
///
/// Implementations must be idempotent: only the first settlement of a delivery
/// has an effect, later calls are no-ops returning `Ok(())`.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;
    async fn nack(&self, reason: &str) -> Result<(), BrokerError>;
    async fn dead_letter(&self, reason: &str) -> Result<(), BrokerError>;
}

/// An envelope handed to a consumer, plus the means to settle it.
pub struct Delivery {
    envelope: Envelope,
    attempt: u32,
    acker: Arc<dyn Acknowledger>,
}

impl Delivery {
    /// `attempt` is 1 for the first delivery to the group, 2 for the first
    /// redelivery, and so on.
    pub fn new(envelope: Envelope, attempt: u32, acker: Arc<dyn Acknowledger>) -> Self {
        Self {
            envelope,
            attempt,
            acker,
        }
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub async fn ack(&self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    pub async fn nack(&self, reason: &str) -> Result<(), BrokerError> {
        self.acker.nack(reason).await
    }

    pub async fn dead_letter(&self, reason: &str) -> Result<(), BrokerError> {
        self.acker.dead_letter(reason).await
    }
}

impl core::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Delivery")
            .field("message_id", &self.envelope.message_id())
            .field("message_type", &self.envelope.message_type())
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// An envelope parked after being given up on.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub channel: String,
    pub subscription: String,
    pub envelope: Envelope,
    pub attempts: u32,
    pub reason: String,
}
