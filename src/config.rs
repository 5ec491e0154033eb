use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_FETCH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Connection and reader settings for one topic partition.
///
/// Zero-valued retry and interval fields mean "use the default"; see
/// [`Config::normalized`]. Broker, topic and partition are checked only when
/// a connection is attempted.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub broker: String,
    pub topic: String,
    #[serde(default)]
    pub partition: i32,
    /// Also read from `KAFKA_RETRIES`.
    #[serde(default, alias = "retries")]
    pub max_retries: u32,
    /// Also read from `KAFKA_RETRY_DELAY`, in milliseconds.
    #[serde(default, alias = "retry_delay")]
    pub retry_delay_ms: u64,
    /// Also read from `KAFKA_HEALTH_FREQ`, in seconds.
    #[serde(default, alias = "health_freq")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_group_id")]
    pub group_id: String,
    #[serde(default = "default_fetch_min_bytes")]
    pub fetch_min_bytes: u32,
    #[serde(default = "default_fetch_max_bytes")]
    pub fetch_max_bytes: u32,
    #[serde(default)]
    pub fetch_retry_delay_ms: u64,
}

impl Config {
    pub fn new(broker: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            topic: topic.into(),
            partition: 0,
            max_retries: 0,
            retry_delay_ms: 0,
            health_check_interval_secs: 0,
            group_id: default_group_id(),
            fetch_min_bytes: default_fetch_min_bytes(),
            fetch_max_bytes: default_fetch_max_bytes(),
            fetch_retry_delay_ms: 0,
        }
    }

    /// Loads settings from an optional TOML file, overridden by `KAFKA_*`
    /// environment variables (`KAFKA_BROKER`, `KAFKA_TOPIC`, `KAFKA_PARTITION`, ...).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("KAFKA")
                    .prefix_separator("_")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Replaces zero-valued optional fields with their defaults.
    pub fn normalized(mut self) -> Self {
        if self.max_retries == 0 {
            self.max_retries = DEFAULT_MAX_RETRIES;
        }
        if self.retry_delay_ms == 0 {
            self.retry_delay_ms = DEFAULT_RETRY_DELAY.as_millis() as u64;
        }
        if self.health_check_interval_secs == 0 {
            self.health_check_interval_secs = DEFAULT_HEALTH_CHECK_INTERVAL.as_secs();
        }
        if self.fetch_retry_delay_ms == 0 {
            self.fetch_retry_delay_ms = DEFAULT_FETCH_RETRY_DELAY.as_millis() as u64;
        }
        if self.group_id.is_empty() {
            self.group_id = default_group_id();
        }
        self
    }

    /// Checks the fields a connection attempt depends on.
    pub fn validate(&self) -> Result<()> {
        if self.broker.trim().is_empty() {
            return Err(Error::Config("broker address is empty".to_string()));
        }
        if self.topic.trim().is_empty() {
            return Err(Error::Config("topic name is empty".to_string()));
        }
        if self.partition < 0 {
            return Err(Error::Config(format!(
                "partition must be non-negative, got {}",
                self.partition
            )));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn fetch_retry_delay(&self) -> Duration {
        Duration::from_millis(self.fetch_retry_delay_ms)
    }
}

fn default_group_id() -> String {
    "user-cdc-watcher-group".to_string()
}

fn default_fetch_min_bytes() -> u32 {
    10_000 // 10KB
}

fn default_fetch_max_bytes() -> u32 {
    10_000_000 // 10MB
}
