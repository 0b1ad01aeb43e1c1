//! Dispatch configuration.
//!
//! Read once at startup (usually from the environment) and never changed
//! while the dispatcher runs.

use std::time::Duration;

use courier_events::EventTopicPolicy;
use courier_events::topology::DEFAULT_EVENT_TOPIC;

pub const ENV_BROKER_URL: &str = "COURIER_BROKER_URL";
pub const ENV_EVENT_TOPIC_POLICY: &str = "COURIER_EVENT_TOPIC_POLICY";
pub const ENV_EVENT_TOPIC: &str = "COURIER_EVENT_TOPIC";
pub const ENV_HANDLER_TIMEOUT_MS: &str = "COURIER_HANDLER_TIMEOUT_MS";
pub const ENV_MAX_DELIVERIES: &str = "COURIER_MAX_DELIVERIES";
pub const ENV_NAME: &str = "COURIER_NAME";

/// Poison threshold used when nothing is configured.
pub const DEFAULT_MAX_DELIVERIES: u32 = 5;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: `{value}` ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("unsupported broker url `{0}` (expected memory:// or redis://)")]
    UnsupportedBrokerUrl(String),
}

/// Which broker to connect to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BrokerConfig {
    /// Process-local broker. Pending envelopes live until settled; settled
    /// history is capped at [`IN_MEMORY_HISTORY`](crate::broker::IN_MEMORY_HISTORY)
    /// entries per channel and group.
    #[default]
    InMemory,
    Redis { url: String },
}

impl BrokerConfig {
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let url = url.trim();
        if url.starts_with("memory:") {
            Ok(BrokerConfig::InMemory)
        } else if url.starts_with("redis://") || url.starts_with("rediss://") {
            Ok(BrokerConfig::Redis {
                url: url.to_string(),
            })
        } else {
            Err(ConfigError::UnsupportedBrokerUrl(url.to_string()))
        }
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Name for logging (and Redis consumer names).
    pub name: String,
    pub broker: BrokerConfig,
    pub event_topics: EventTopicPolicy,
    /// Per-invocation limit. `None` lets handlers run as long as they need.
    pub handler_timeout: Option<Duration>,
    /// Deliveries after which a failing message is dead-lettered.
    /// `None` leaves redelivery entirely to the broker.
    pub max_deliveries: Option<u32>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            name: "courier".to_string(),
            broker: BrokerConfig::InMemory,
            event_topics: EventTopicPolicy::default(),
            handler_timeout: None,
            max_deliveries: Some(DEFAULT_MAX_DELIVERIES),
        }
    }
}

impl DispatchConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_broker(mut self, broker: BrokerConfig) -> Self {
        self.broker = broker;
        self
    }

    pub fn with_event_topics(mut self, policy: EventTopicPolicy) -> Self {
        self.event_topics = policy;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    pub fn with_max_deliveries(mut self, max: Option<u32>) -> Self {
        self.max_deliveries = max.filter(|m| *m > 0);
        self
    }

    /// Load from `COURIER_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(name) = lookup(ENV_NAME).filter(|v| !v.trim().is_empty()) {
            config.name = name.trim().to_string();
        }

        if let Some(url) = lookup(ENV_BROKER_URL) {
            config.broker = BrokerConfig::parse(&url)?;
        }

        let topic = lookup(ENV_EVENT_TOPIC).unwrap_or_else(|| DEFAULT_EVENT_TOPIC.to_string());
        if topic.trim().is_empty() {
            return Err(invalid(ENV_EVENT_TOPIC, &topic, "must not be empty"));
        }
        config.event_topics = match lookup(ENV_EVENT_TOPIC_POLICY).as_deref().map(str::trim) {
            None | Some("shared") => EventTopicPolicy::Shared {
                topic: topic.trim().to_string(),
            },
            Some("per-type") | Some("per_type") => EventTopicPolicy::PerType,
            Some(other) => {
                return Err(invalid(
                    ENV_EVENT_TOPIC_POLICY,
                    other,
                    "expected `shared` or `per-type`",
                ));
            }
        };

        if let Some(raw) = lookup(ENV_HANDLER_TIMEOUT_MS) {
            let ms = parse_u64(ENV_HANDLER_TIMEOUT_MS, &raw)?;
            config.handler_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }

        if let Some(raw) = lookup(ENV_MAX_DELIVERIES) {
            let max = parse_u64(ENV_MAX_DELIVERIES, &raw)?;
            let max = u32::try_from(max).map_err(|e| invalid(ENV_MAX_DELIVERIES, &raw, e))?;
            config.max_deliveries = (max > 0).then_some(max);
        }

        Ok(config)
    }
}

fn invalid(key: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_u64(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse::<u64>().map_err(|e| invalid(key, raw, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<DispatchConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DispatchConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = load(&[]).unwrap();
        assert_eq!(config, DispatchConfig::default());
        assert_eq!(config.max_deliveries, Some(5));
        assert_eq!(
            config.event_topics,
            EventTopicPolicy::Shared {
                topic: "events".into()
            }
        );
    }

    #[test]
    fn reads_every_variable() {
        let config = load(&[
            (ENV_NAME, "hotel"),
            (ENV_BROKER_URL, "redis://localhost:6379"),
            (ENV_EVENT_TOPIC_POLICY, "per-type"),
            (ENV_HANDLER_TIMEOUT_MS, "1500"),
            (ENV_MAX_DELIVERIES, "3"),
        ])
        .unwrap();

        assert_eq!(config.name, "hotel");
        assert_eq!(
            config.broker,
            BrokerConfig::Redis {
                url: "redis://localhost:6379".into()
            }
        );
        assert_eq!(config.event_topics, EventTopicPolicy::PerType);
        assert_eq!(config.handler_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.max_deliveries, Some(3));
    }

    #[test]
    fn zero_disables_limits() {
        let config = load(&[(ENV_HANDLER_TIMEOUT_MS, "0"), (ENV_MAX_DELIVERIES, "0")]).unwrap();
        assert_eq!(config.handler_timeout, None);
        assert_eq!(config.max_deliveries, None);
    }

    #[test]
    fn shared_topic_name_is_configurable() {
        let config = load(&[(ENV_EVENT_TOPIC, "hotel-events")]).unwrap();
        assert_eq!(
            config.event_topics,
            EventTopicPolicy::Shared {
                topic: "hotel-events".into()
            }
        );
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            load(&[(ENV_EVENT_TOPIC_POLICY, "sometimes")]),
            Err(ConfigError::Invalid { key: ENV_EVENT_TOPIC_POLICY, .. })
        ));
        assert!(matches!(
            load(&[(ENV_MAX_DELIVERIES, "-1")]),
            Err(ConfigError::Invalid { key: ENV_MAX_DELIVERIES, .. })
        ));
        assert_eq!(
            load(&[(ENV_BROKER_URL, "kafka://broker:9092")]),
            Err(ConfigError::UnsupportedBrokerUrl("kafka://broker:9092".into()))
        );
    }
}
