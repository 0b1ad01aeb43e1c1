//! Process configuration: dispatch settings plus the traffic generator.

use std::time::Duration;

use courier_infra::{ConfigError, DispatchConfig};
use courier_observability::LogConfig;

pub const ENV_TRAFFIC_INTERVAL_MS: &str = "COURIER_TRAFFIC_INTERVAL_MS";

const DEFAULT_TRAFFIC_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub log: LogConfig,
    pub dispatch: DispatchConfig,
    /// `None` disables the traffic generator.
    pub traffic_interval: Option<Duration>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            dispatch: DispatchConfig::default(),
            traffic_interval: Some(DEFAULT_TRAFFIC_INTERVAL),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, crate::AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, crate::AppError> {
        let log = LogConfig::from_lookup(&lookup)?;
        let dispatch = DispatchConfig::from_lookup(&lookup)?;

        let traffic_interval = match lookup(ENV_TRAFFIC_INTERVAL_MS) {
            None => Some(DEFAULT_TRAFFIC_INTERVAL),
            Some(raw) => {
                let ms = raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                    key: ENV_TRAFFIC_INTERVAL_MS,
                    value: raw.clone(),
                    reason: e.to_string(),
                })?;
                (ms > 0).then(|| Duration::from_millis(ms))
            }
        };

        Ok(Self {
            log,
            dispatch,
            traffic_interval,
        })
    }
}
