//! Dispatcher: the consumption side of the message loop.
//!
//! For every subscription in the plan the dispatcher runs an independent
//! loop that pulls deliveries, resolves the handler from the envelope's type
//! tag, runs it behind a fault boundary and settles the delivery:
//!
//! ```text
//! Idle → Consuming → Processing → (ack | nack | dead-letter) → Consuming
//! ```
//!
//! - Decode failures are dead-lettered on the first attempt.
//! - On a shared event topic, types the subscription does not handle are
//!   acknowledged and discarded without decoding the payload.
//! - Handler errors, panics and timeouts are all "failure": the delivery is
//!   nacked, or dead-lettered once `max_deliveries` is reached.
//!
//! Loops share nothing mutable besides the broker. A slow handler only holds
//! back its own subscription.

mod plan;
mod stats;
mod worker;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use courier_events::{Broker, BrokerError, CommandBus, EventBus, HandlerRegistry, Subscription, Topology};

use crate::config::DispatchConfig;

pub use plan::SubscriptionPlan;
pub use stats::{LoopState, Outcome, SubscriptionStats};
pub use worker::InvocationError;

use stats::StatsCell;
use worker::{LoopSettings, Worker};

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("failed to subscribe to `{channel}` as `{subscription}`: {source}")]
    Subscribe {
        channel: String,
        subscription: String,
        #[source]
        source: BrokerError,
    },
}

/// Wires the registry, the naming rules and the broker together.
pub struct Dispatcher {
    broker: Arc<dyn Broker>,
    registry: Arc<HandlerRegistry>,
    topology: Arc<Topology>,
    settings: Arc<LoopSettings>,
}

impl Dispatcher {
    pub fn new(broker: Arc<dyn Broker>, registry: Arc<HandlerRegistry>, config: &DispatchConfig) -> Self {
        Self {
            broker,
            registry,
            topology: Arc::new(Topology::new(config.event_topics.clone())),
            settings: Arc::new(LoopSettings {
                name: config.name.clone(),
                handler_timeout: config.handler_timeout,
                max_deliveries: config.max_deliveries.filter(|m| *m > 0),
            }),
        }
    }

    /// Command bus publishing on the channels this dispatcher consumes.
    pub fn command_bus(&self) -> CommandBus {
        CommandBus::new(
            Arc::clone(&self.broker),
            Arc::clone(&self.registry),
            Arc::clone(&self.topology),
        )
    }

    pub fn event_bus(&self) -> EventBus {
        EventBus::new(Arc::clone(&self.broker), Arc::clone(&self.topology))
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn plan(&self) -> Vec<SubscriptionPlan> {
        plan::build(&self.registry, &self.topology)
    }

    /// Subscribe everything, then spawn one loop per subscription.
    ///
    /// If any subscribe fails, the subscriptions already acquired are closed
    /// and no loop is started.
    pub async fn start(self) -> Result<DispatcherHandle, StartError> {
        let plans = self.plan();
        if plans.is_empty() {
            warn!(dispatcher = %self.settings.name, "no handlers registered, nothing to consume");
        }

        let mut acquired: Vec<(SubscriptionPlan, Box<dyn Subscription>)> = Vec::with_capacity(plans.len());
        for plan in plans {
            match self.broker.subscribe(&plan.channel, &plan.subscription).await {
                Ok(subscription) => acquired.push((plan, subscription)),
                Err(source) => {
                    for (_, mut subscription) in acquired {
                        subscription.close().await;
                    }
                    return Err(StartError::Subscribe {
                        channel: plan.channel,
                        subscription: plan.subscription,
                        source,
                    });
                }
            }
        }

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let commands = self.command_bus();
        let events = self.event_bus();
        let mut stats = Vec::with_capacity(acquired.len());

        for (plan, subscription) in acquired {
            let cell = StatsCell::new(&plan.channel, &plan.subscription, plan.kind);
            stats.push(cell.clone());

            let worker = Worker {
                plan,
                settings: Arc::clone(&self.settings),
                commands: commands.clone(),
                events: events.clone(),
                stats: cell,
            };
            tracker.spawn(worker.run(subscription, cancel.child_token()));
        }
        tracker.close();

        info!(
            dispatcher = %self.settings.name,
            subscriptions = stats.len(),
            "dispatcher started"
        );

        Ok(DispatcherHandle {
            name: self.settings.name.clone(),
            cancel,
            tracker,
            stats,
        })
    }
}

/// Handle to control a running dispatcher.
#[derive(Debug)]
pub struct DispatcherHandle {
    name: String,
    cancel: CancellationToken,
    tracker: TaskTracker,
    stats: Vec<StatsCell>,
}

impl DispatcherHandle {
    /// Stop every loop and wait for them.
    ///
    /// Loops stop pulling new deliveries, let the in-flight handler finish,
    /// settle it and close their subscription before this returns.
    pub async fn shutdown(self) {
        info!(dispatcher = %self.name, "dispatcher shutting down");
        self.cancel.cancel();
        self.tracker.wait().await;
        info!(dispatcher = %self.name, "dispatcher stopped");
    }

    /// Token cancelled when shutdown starts.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Snapshot of every loop's statistics, in plan order.
    pub fn stats(&self) -> Vec<SubscriptionStats> {
        self.stats.iter().map(StatsCell::snapshot).collect()
    }

    pub fn stats_for(&self, channel: &str, subscription: &str) -> Option<SubscriptionStats> {
        self.stats
            .iter()
            .map(StatsCell::snapshot)
            .find(|s| s.channel == channel && s.subscription == subscription)
    }
}
