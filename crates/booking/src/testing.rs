//! Test fixtures: handler contexts wired to an in-memory broker.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;

use courier_core::{CorrelationId, MessageId};
use courier_events::{
    Codec, Command, CommandBus, CommandHandler, Envelope, Event, EventBus, HandlerContext,
    HandlerRegistry, InMemoryBroker, Message, Topology,
};

use crate::messages::{BookRoom, OrderBeer};

pub fn book_room(room_id: &str, guest: &str) -> BookRoom {
    let start_date = Utc::now();
    BookRoom {
        room_id: room_id.to_string(),
        guest_name: guest.to_string(),
        start_date,
        end_date: start_date + Duration::days(2),
    }
}

/// Accepts commands so the bus lets them through.
struct Sink;

#[async_trait]
impl CommandHandler<BookRoom> for Sink {
    fn name(&self) -> &str {
        "Sink"
    }

    async fn handle(&self, _ctx: &HandlerContext, _command: BookRoom) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl CommandHandler<OrderBeer> for Sink {
    fn name(&self) -> &str {
        "Sink"
    }

    async fn handle(&self, _ctx: &HandlerContext, _command: OrderBeer) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct Fixture {
    broker: InMemoryBroker,
    topology: Arc<Topology>,
    commands: CommandBus,
    events: EventBus,
}

impl Fixture {
    pub fn new() -> Self {
        let broker = InMemoryBroker::new();
        let topology = Arc::new(Topology::default());

        let mut builder = HandlerRegistry::builder();
        builder
            .register_command_handler::<BookRoom, _>(Sink)
            .unwrap()
            .register_command_handler::<OrderBeer, _>(Sink)
            .unwrap();

        let shared = Arc::new(broker.clone());
        Self {
            commands: CommandBus::new(shared.clone(), builder.build(), topology.clone()),
            events: EventBus::new(shared, topology.clone()),
            broker,
            topology,
        }
    }

    /// A context as if a fresh root `M` had just been delivered.
    pub fn context<M: Message>(&self) -> HandlerContext {
        let message_id = MessageId::new();
        HandlerContext::new(
            message_id,
            CorrelationId::root(message_id),
            M::MESSAGE_TYPE,
            "test",
            1,
            CancellationToken::new(),
            None,
            self.commands.clone(),
            self.events.clone(),
        )
    }

    pub fn sent_envelopes<C: Command>(&self) -> Vec<Envelope> {
        self.broker
            .published(&self.topology.command_channel(C::MESSAGE_TYPE))
            .into_iter()
            .filter(|e| e.message_type() == C::MESSAGE_TYPE)
            .collect()
    }

    pub fn sent_commands<C: Command>(&self) -> Vec<C> {
        self.sent_envelopes::<C>()
            .iter()
            .map(|e| Codec::new().decode(e).unwrap())
            .collect()
    }

    pub fn published_events<E: Event>(&self) -> Vec<E> {
        self.broker
            .published(&self.topology.event_channel(E::MESSAGE_TYPE))
            .iter()
            .filter(|e| e.message_type() == E::MESSAGE_TYPE)
            .map(|e| Codec::new().decode(e).unwrap())
            .collect()
    }
}
