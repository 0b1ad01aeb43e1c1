//! `courier-infra`: runtime around the dispatch mechanics.
//!
//! - [`dispatcher`]: per-subscription consumption loops, fault boundary,
//!   poison policy, graceful shutdown
//! - [`config`]: `DispatchConfig` loading
//! - [`broker`]: broker selection, plus the Redis Streams adapter behind the
//!   `redis` feature

pub mod broker;
pub mod config;
pub mod dispatcher;

pub use config::{BrokerConfig, ConfigError, DispatchConfig};
pub use dispatcher::{
    Dispatcher, DispatcherHandle, InvocationError, LoopState, Outcome, StartError,
    SubscriptionPlan, SubscriptionStats,
};
