//! `courier-events`: message dispatch mechanics.
//!
//! This crate holds everything needed to route typed commands and events
//! through a broker, without owning any runtime:
//!
//! - [`Message`], [`Command`], [`Event`]: typed payloads with stable names
//! - [`Envelope`] and [`Codec`]: the wire form and its JSON encoding
//! - [`CommandHandler`] / [`EventHandler`] and the per-delivery [`HandlerContext`]
//! - [`HandlerRegistry`]: the immutable type-name → handler table
//! - [`Topology`]: channel and subscription naming
//! - [`Broker`]: the transport boundary, with an [`InMemoryBroker`] for tests/dev
//! - [`CommandBus`] / [`EventBus`]: the publishing side
//!
//! The consumption loops live in `courier-infra`.

pub mod broker;
pub mod bus;
pub mod codec;
pub mod context;
pub mod envelope;
pub mod handler;
pub mod in_memory_broker;
pub mod message;
pub mod registry;
pub mod topology;

#[cfg(test)]
mod testing;

pub use broker::{Acknowledger, Broker, BrokerError, DeadLetter, Delivery, Subscription};
pub use bus::{CommandBus, EventBus, PublishError, SendError};
pub use codec::{Codec, CodecError, Lineage};
pub use context::HandlerContext;
pub use envelope::Envelope;
pub use handler::{CommandHandler, EventHandler};
pub use in_memory_broker::InMemoryBroker;
pub use message::{Command, Event, Message, MessageKind};
pub use registry::{HandlerRegistration, HandlerRegistry, Invocation, Invoker, RegistryBuilder, RegistryError};
pub use topology::{EventTopicPolicy, Topology};
