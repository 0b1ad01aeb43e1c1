//! Shared fixtures for this crate's unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::bus::{CommandBus, EventBus};
use crate::context::HandlerContext;
use crate::envelope::Envelope;
use crate::handler::{CommandHandler, EventHandler};
use crate::in_memory_broker::InMemoryBroker;
use crate::message::{Command, Event, Message};
use crate::registry::HandlerRegistry;
use crate::topology::Topology;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub seq: u32,
}

impl Message for Ping {
    const MESSAGE_TYPE: &'static str = "test.Ping";
}
impl Command for Ping {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pinged {
    pub seq: u32,
}

impl Message for Pinged {
    const MESSAGE_TYPE: &'static str = "test.Pinged";
}
impl Event for Pinged {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    pub seq: u32,
}

impl Message for Pong {
    const MESSAGE_TYPE: &'static str = "test.Pong";
}
impl Event for Pong {}

/// Records the sequence number of everything it handles.
#[derive(Debug)]
pub struct Counting {
    name: String,
    seen: Mutex<Vec<u32>>,
}

impl Counting {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<u32> {
        self.seen.lock().unwrap().clone()
    }

    fn record(&self, seq: u32) {
        self.seen.lock().unwrap().push(seq);
    }
}

#[async_trait]
impl CommandHandler<Ping> for Counting {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, _ctx: &HandlerContext, command: Ping) -> anyhow::Result<()> {
        self.record(command.seq);
        Ok(())
    }
}

#[async_trait]
impl EventHandler<Pinged> for Counting {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, _ctx: &HandlerContext, event: Pinged) -> anyhow::Result<()> {
        self.record(event.seq);
        Ok(())
    }
}

#[async_trait]
impl EventHandler<Pong> for Counting {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, _ctx: &HandlerContext, event: Pong) -> anyhow::Result<()> {
        self.record(event.seq);
        Ok(())
    }
}

/// Buses wired to a throwaway broker with an empty registry.
pub fn buses() -> (CommandBus, EventBus) {
    let broker = Arc::new(InMemoryBroker::new());
    let topology = Arc::new(Topology::default());
    (
        CommandBus::new(broker.clone(), HandlerRegistry::builder().build(), topology.clone()),
        EventBus::new(broker, topology),
    )
}

pub fn context_for(envelope: &Envelope) -> HandlerContext {
    let (commands, events) = buses();
    HandlerContext::new(
        envelope.message_id(),
        envelope.correlation_id(),
        envelope.message_type(),
        "test",
        1,
        CancellationToken::new(),
        None,
        commands,
        events,
    )
}
