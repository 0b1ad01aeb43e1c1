//! Broker selection.

use std::sync::Arc;

use courier_events::{Broker, BrokerError, InMemoryBroker};

use crate::config::{BrokerConfig, DispatchConfig};

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsBroker;

/// Envelopes (and settled ids) the in-memory broker keeps per channel and
/// group once they are no longer pending.
pub const IN_MEMORY_HISTORY: usize = 1024;

/// Build the broker named by the configuration.
pub fn connect(config: &DispatchConfig) -> Result<Arc<dyn Broker>, BrokerError> {
    match &config.broker {
        BrokerConfig::InMemory => Ok(Arc::new(InMemoryBroker::with_history(IN_MEMORY_HISTORY))),
        BrokerConfig::Redis { url } => connect_redis(url, &config.name),
    }
}

#[cfg(feature = "redis")]
fn connect_redis(url: &str, name: &str) -> Result<Arc<dyn Broker>, BrokerError> {
    Ok(Arc::new(RedisStreamsBroker::open(url, name)?))
}

#[cfg(not(feature = "redis"))]
fn connect_redis(url: &str, _name: &str) -> Result<Arc<dyn Broker>, BrokerError> {
    Err(BrokerError::Unavailable(format!(
        "{url}: built without the `redis` feature"
    )))
}
