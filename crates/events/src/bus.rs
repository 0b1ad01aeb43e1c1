//! Command and event buses (publishing side).
//!
//! Both buses are cheap to clone and safe to share across tasks. They encode
//! the message, pick the channel from the [`Topology`] and hand the envelope
//! to the broker. Neither waits for handling: a successful return means the
//! broker accepted the envelope, nothing more.

use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use courier_core::MessageId;

use crate::broker::{Broker, BrokerError};
use crate::codec::{Codec, CodecError, Lineage};
use crate::message::{Command, Event, MessageKind};
use crate::registry::HandlerRegistry;
use crate::topology::Topology;

#[derive(Debug, Error)]
pub enum SendError {
    /// Commands without a handler are rejected locally, before reaching the broker.
    #[error("no command handler registered for {message_type}")]
    NoHandlerRegistered { message_type: &'static str },

    #[error(transparent)]
    Encode(#[from] CodecError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Encode(#[from] CodecError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Point-to-point command publisher.
#[derive(Clone)]
pub struct CommandBus {
    broker: Arc<dyn Broker>,
    registry: Arc<HandlerRegistry>,
    topology: Arc<Topology>,
    codec: Codec,
}

impl CommandBus {
    pub fn new(
        broker: Arc<dyn Broker>,
        registry: Arc<HandlerRegistry>,
        topology: Arc<Topology>,
    ) -> Self {
        Self {
            broker,
            registry,
            topology,
            codec: Codec::new(),
        }
    }

    /// Send a command that starts a new causal chain.
    pub async fn send<C: Command>(&self, command: C) -> Result<MessageId, SendError> {
        self.send_with(command, Lineage::Root).await
    }

    #[instrument(
        name = "command_bus.send",
        skip_all,
        fields(message_type = C::MESSAGE_TYPE, message_id = tracing::field::Empty)
    )]
    pub async fn send_with<C: Command>(
        &self,
        command: C,
        lineage: Lineage,
    ) -> Result<MessageId, SendError> {
        if !self.registry.has_command_handler(C::MESSAGE_TYPE) {
            tracing::warn!("command rejected: no handler registered");
            return Err(SendError::NoHandlerRegistered {
                message_type: C::MESSAGE_TYPE,
            });
        }

        let envelope = self.codec.encode(&command, lineage)?;
        let message_id = envelope.message_id();
        tracing::Span::current().record("message_id", tracing::field::display(message_id));

        let channel = self.topology.command_channel(C::MESSAGE_TYPE);
        self.broker.publish(&channel, envelope).await?;

        tracing::debug!(%channel, kind = %MessageKind::Command, "command sent");
        Ok(message_id)
    }
}

impl core::fmt::Debug for CommandBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CommandBus")
            .field("topology", &self.topology)
            .finish_non_exhaustive()
    }
}

/// Broadcast event publisher.
///
/// Publishing an event type with zero registered handlers succeeds; the
/// envelope is simply retained on its channel.
#[derive(Clone)]
pub struct EventBus {
    broker: Arc<dyn Broker>,
    topology: Arc<Topology>,
    codec: Codec,
}

impl EventBus {
    pub fn new(broker: Arc<dyn Broker>, topology: Arc<Topology>) -> Self {
        Self {
            broker,
            topology,
            codec: Codec::new(),
        }
    }

    /// Publish an event that starts a new causal chain.
    pub async fn publish<E: Event>(&self, event: E) -> Result<MessageId, PublishError> {
        self.publish_with(event, Lineage::Root).await
    }

    #[instrument(
        name = "event_bus.publish",
        skip_all,
        fields(message_type = E::MESSAGE_TYPE, message_id = tracing::field::Empty)
    )]
    pub async fn publish_with<E: Event>(
        &self,
        event: E,
        lineage: Lineage,
    ) -> Result<MessageId, PublishError> {
        let envelope = self.codec.encode(&event, lineage)?;
        let message_id = envelope.message_id();
        tracing::Span::current().record("message_id", tracing::field::display(message_id));

        let channel = self.topology.event_channel(E::MESSAGE_TYPE);
        self.broker.publish(&channel, envelope).await?;

        tracing::debug!(%channel, kind = %MessageKind::Event, "event published");
        Ok(message_id)
    }
}

impl core::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventBus")
            .field("topology", &self.topology)
            .finish_non_exhaustive()
    }
}
