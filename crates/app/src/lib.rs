//! Process wiring for the booking demo.
//!
//! `main` loads configuration, calls [`start`] and runs the traffic generator
//! until Ctrl-C. Tests call [`start_with_broker`] against an in-memory broker.

pub mod config;
pub mod traffic;

use std::sync::Arc;

use courier_booking::{BookingsFinancialReport, Sampler};
use courier_events::{Broker, BrokerError, CommandBus, EventBus, HandlerRegistry, RegistryError};
use courier_infra::{ConfigError, DispatchConfig, Dispatcher, DispatcherHandle, StartError};
use courier_observability::ObservabilityError;

pub use config::AppConfig;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Observability(#[from] ObservabilityError),

    #[error("broker: {0}")]
    Broker(#[from] BrokerError),

    #[error("handler registration: {0}")]
    Registry(#[from] RegistryError),

    #[error("dispatcher: {0}")]
    Start(#[from] StartError),
}

/// A running dispatcher with the booking handlers registered.
pub struct App {
    handle: DispatcherHandle,
    commands: CommandBus,
    events: EventBus,
    report: Arc<BookingsFinancialReport>,
}

impl App {
    pub fn command_bus(&self) -> CommandBus {
        self.commands.clone()
    }

    pub fn event_bus(&self) -> EventBus {
        self.events.clone()
    }

    pub fn report(&self) -> &BookingsFinancialReport {
        &self.report
    }

    pub fn dispatcher(&self) -> &DispatcherHandle {
        &self.handle
    }

    pub async fn shutdown(self) {
        self.handle.shutdown().await;
    }
}

/// Connect to the configured broker and start dispatching.
pub async fn start(config: &DispatchConfig, sampler: Arc<dyn Sampler>) -> Result<App, AppError> {
    let broker = courier_infra::broker::connect(config)?;
    start_with_broker(broker, config, sampler).await
}

pub async fn start_with_broker(
    broker: Arc<dyn Broker>,
    config: &DispatchConfig,
    sampler: Arc<dyn Sampler>,
) -> Result<App, AppError> {
    let mut builder = HandlerRegistry::builder();
    let report = courier_booking::register(&mut builder, sampler)?;

    let dispatcher = Dispatcher::new(broker, builder.build(), config);
    let commands = dispatcher.command_bus();
    let events = dispatcher.event_bus();
    let handle = dispatcher.start().await?;

    Ok(App {
        handle,
        commands,
        events,
        report,
    })
}
