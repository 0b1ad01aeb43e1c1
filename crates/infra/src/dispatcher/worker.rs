//! One consumption loop per subscription.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, error, info, info_span, warn};

use courier_events::{
    CommandBus, Delivery, EventBus, HandlerContext, Invocation, MessageKind, RegistryError,
    Subscription,
};

use super::plan::SubscriptionPlan;
use super::stats::{LoopState, Outcome, StatsCell};

/// Why an invocation did not succeed.
///
/// Handler errors, panics and timeouts are one failure class: the delivery is
/// not acknowledged.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("handler failed: {0:#}")]
    Handler(anyhow::Error),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("handler timed out after {0:?}")]
    TimedOut(Duration),
}

/// Read-only settings shared by every loop.
#[derive(Debug, Clone)]
pub(crate) struct LoopSettings {
    pub name: String,
    pub handler_timeout: Option<Duration>,
    pub max_deliveries: Option<u32>,
}

pub(crate) struct Worker {
    pub plan: SubscriptionPlan,
    pub settings: Arc<LoopSettings>,
    pub commands: CommandBus,
    pub events: EventBus,
    pub stats: StatsCell,
}

impl Worker {
    pub(crate) async fn run(self, subscription: Box<dyn Subscription>, cancel: CancellationToken) {
        let span = info_span!(
            "subscription",
            dispatcher = %self.settings.name,
            channel = %self.plan.channel,
            subscription = %self.plan.subscription,
            kind = %self.plan.kind,
        );
        self.consume(subscription, cancel).instrument(span).await
    }

    async fn consume(self, mut subscription: Box<dyn Subscription>, cancel: CancellationToken) {
        info!("consumption loop started");
        self.stats.set_state(LoopState::Consuming);

        loop {
            // Shutdown wins over pending traffic.
            let delivery = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = subscription.next() => match next {
                    Some(delivery) => delivery,
                    None => {
                        warn!("subscription closed by broker");
                        break;
                    }
                },
            };

            self.stats.set_state(LoopState::Processing);
            let span = debug_span!(
                "delivery",
                message_type = %delivery.envelope().message_type(),
                message_id = %delivery.envelope().message_id(),
                correlation_id = %delivery.envelope().correlation_id(),
                attempt = delivery.attempt(),
            );
            // Never interrupted by shutdown: the in-flight message is drained.
            self.process(delivery, &cancel).instrument(span).await;
            self.stats.set_state(LoopState::Consuming);
        }

        subscription.close().await;
        self.stats.set_state(LoopState::Stopped);
        info!("consumption loop stopped");
    }

    async fn process(&self, delivery: Delivery, cancel: &CancellationToken) {
        self.stats.update(|s| s.received += 1);
        let envelope = delivery.envelope();

        let Some(registration) = self.plan.route(envelope.message_type()) else {
            if self.plan.is_filtered() {
                debug!("not handled by this subscription, discarding");
                if self.ack(&delivery).await {
                    self.stats.record(Outcome::Discarded);
                }
                return;
            }

            let reason = if self.plan.kind == MessageKind::Command {
                let err = RegistryError::NotFound {
                    kind: MessageKind::Command,
                    message_type: envelope.message_type().to_string(),
                };
                error!(error = %err, "command arrived on a channel without its handler");
                err.to_string()
            } else {
                format!("unexpected message type {}", envelope.message_type())
            };
            self.dead_letter(&delivery, &reason).await;
            return;
        };

        let deadline = self
            .settings
            .handler_timeout
            .map(|limit| tokio::time::Instant::now() + limit);
        let ctx = HandlerContext::new(
            envelope.message_id(),
            envelope.correlation_id(),
            envelope.message_type(),
            self.plan.subscription.clone(),
            delivery.attempt(),
            cancel.clone(),
            deadline,
            self.commands.clone(),
            self.events.clone(),
        );

        // Malformed payloads never reach the handler and are never retried.
        let invocation = match registration.invoker().prepare(ctx, envelope) {
            Ok(invocation) => invocation,
            Err(err) => {
                warn!(error = %err, "undecodable message");
                self.dead_letter(&delivery, &err.to_string()).await;
                return;
            }
        };

        match self.invoke(invocation).await {
            Ok(()) => {
                debug!(handler = registration.name(), "handled");
                if self.ack(&delivery).await {
                    self.stats.record(Outcome::Acked);
                }
            }
            Err(err) => {
                match &err {
                    InvocationError::Panicked(message) => {
                        self.stats.update(|s| s.panics += 1);
                        error!(
                            handler = registration.name(),
                            channel = %self.plan.channel,
                            subscription = %self.plan.subscription,
                            message_type = %envelope.message_type(),
                            message_id = %envelope.message_id(),
                            correlation_id = %envelope.correlation_id(),
                            attempt = delivery.attempt(),
                            panic = %message,
                            "recovered from handler panic"
                        );
                    }
                    InvocationError::TimedOut(_) => {
                        self.stats.update(|s| s.timeouts += 1);
                        warn!(handler = registration.name(), error = %err, "handler timed out");
                    }
                    InvocationError::Handler(_) => {
                        warn!(handler = registration.name(), error = %err, "handler failed");
                    }
                }
                self.fail(&delivery, &err).await;
            }
        }
    }

    /// Run the invocation behind the fault boundary.
    async fn invoke(&self, invocation: Invocation) -> Result<(), InvocationError> {
        let guarded = AssertUnwindSafe(invocation).catch_unwind();
        let outcome = match self.settings.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(InvocationError::TimedOut(limit)),
            },
            None => guarded.await,
        };

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(InvocationError::Handler(err)),
            Err(panic) => Err(InvocationError::Panicked(panic_message(panic.as_ref()))),
        }
    }

    /// Redeliver, or park the message once it used up its deliveries.
    async fn fail(&self, delivery: &Delivery, err: &InvocationError) {
        let exhausted = self
            .settings
            .max_deliveries
            .is_some_and(|max| delivery.attempt() >= max);

        if exhausted {
            self.dead_letter(delivery, &err.to_string()).await;
            return;
        }

        self.stats.record(Outcome::Retried);
        if let Err(e) = delivery.nack(&err.to_string()).await {
            error!(error = %e, "nack failed");
        }
    }

    /// `true` once the broker accepted the ack.
    async fn ack(&self, delivery: &Delivery) -> bool {
        match delivery.ack().await {
            Ok(()) => {
                debug!("acknowledged");
                true
            }
            Err(e) => {
                error!(error = %e, "ack failed");
                false
            }
        }
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) {
        self.stats.record(Outcome::DeadLettered);
        warn!(attempt = delivery.attempt(), reason, "dead-lettering message");
        if let Err(e) = delivery.dead_letter(reason).await {
            error!(error = %e, "dead-letter failed");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
