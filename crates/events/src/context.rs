//! Per-delivery handler context.

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use courier_core::{CorrelationId, MessageId};

use crate::bus::{CommandBus, EventBus, PublishError, SendError};
use crate::codec::Lineage;
use crate::message::{Command, Event};

/// What a handler knows about the message it is processing.
///
/// Messages sent or published through the context inherit the correlation id
/// of the message being handled and record it as their causation id.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    message_id: MessageId,
    correlation_id: CorrelationId,
    message_type: String,
    subscription: String,
    attempt: u32,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    commands: CommandBus,
    events: EventBus,
}

impl HandlerContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        message_id: MessageId,
        correlation_id: CorrelationId,
        message_type: impl Into<String>,
        subscription: impl Into<String>,
        attempt: u32,
        cancel: CancellationToken,
        deadline: Option<Instant>,
        commands: CommandBus,
        events: EventBus,
    ) -> Self {
        Self {
            message_id,
            correlation_id,
            message_type: message_type.into(),
            subscription: subscription.into(),
            attempt,
            cancel,
            deadline,
            commands,
            events,
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    /// 1-based delivery attempt for this subscription.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Set when the dispatcher is shutting down. Long handlers may bail out
    /// early; returning an error gets the message redelivered later.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Point after which the dispatcher abandons the invocation, if a
    /// handler timeout is configured.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn lineage(&self) -> Lineage {
        Lineage::CausedBy {
            correlation_id: self.correlation_id,
            causation_id: self.message_id,
        }
    }

    /// Send a follow-up command in the same causal chain.
    pub async fn send<C: Command>(&self, command: C) -> Result<MessageId, SendError> {
        self.commands.send_with(command, self.lineage()).await
    }

    /// Publish an event in the same causal chain.
    pub async fn publish<E: Event>(&self, event: E) -> Result<MessageId, PublishError> {
        self.events.publish_with(event, self.lineage()).await
    }
}
