//! Handler traits.
//!
//! Handlers are plain async functions over a decoded message. They never see
//! envelopes or the broker: the dispatcher decodes, builds a
//! [`HandlerContext`], invokes, and settles the delivery based on the result.
//!
//! - `Ok(())` acknowledges the delivery.
//! - `Err(_)` (or a panic) asks for redelivery, up to the configured limit.
//!
//! Handlers run under at-least-once delivery and must be idempotent.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::HandlerContext;
use crate::message::{Command, Event};

/// Handles exactly one command type. At most one per type per process.
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync + 'static {
    /// Stable, human-readable name (used in logs and stats).
    fn name(&self) -> &str;

    async fn handle(&self, ctx: &HandlerContext, command: C) -> anyhow::Result<()>;
}

/// Reacts to one event type. Any number may be registered per type.
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync + 'static {
    /// Stable name; also the durable subscription name, so renaming a handler
    /// starts a fresh consumer group.
    fn name(&self) -> &str;

    async fn handle(&self, ctx: &HandlerContext, event: E) -> anyhow::Result<()>;
}

#[async_trait]
impl<C, H> CommandHandler<C> for Arc<H>
where
    C: Command,
    H: CommandHandler<C>,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn handle(&self, ctx: &HandlerContext, command: C) -> anyhow::Result<()> {
        (**self).handle(ctx, command).await
    }
}

#[async_trait]
impl<E, H> EventHandler<E> for Arc<H>
where
    E: Event,
    H: EventHandler<E>,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn handle(&self, ctx: &HandlerContext, event: E) -> anyhow::Result<()> {
        (**self).handle(ctx, event).await
    }
}
