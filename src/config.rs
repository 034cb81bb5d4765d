//! Pipeline configuration.
//!
//! Every field has a default. [`PipelineConfig::load`] layers an optional file
//! and then `ORDER_PIPELINE__*` environment variables on top, e.g.
//! `ORDER_PIPELINE__WORKER__COUNT=8` or `ORDER_PIPELINE__WORKER__REPLAY_POLICY=republish`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const ENV_PREFIX: &str = "ORDER_PIPELINE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub store: StoreConfig,
    pub queue: QueueConfig,
    pub retry: RetryConfig,
    pub worker: WorkerConfig,
    pub notifier: NotifierConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub buffer_size: usize,
    pub request_timeout_ms: u64,
    /// Orders fetched per round trip while streaming a query.
    pub page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            buffer_size: 256,
            request_timeout_ms: 1_000,
            page_size: 100,
        }
    }
}

impl StoreConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub buffer_size: usize,
    pub request_timeout_ms: u64,
    /// How long a delivered task stays invisible before it is handed out again.
    pub visibility_timeout_ms: u64,
    /// Delay before a nacked task becomes deliverable.
    pub nack_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            buffer_size: 256,
            request_timeout_ms: 1_000,
            visibility_timeout_ms: 30_000,
            nack_delay_ms: 1_000,
        }
    }
}

impl QueueConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }

    pub fn nack_delay(&self) -> Duration {
        Duration::from_millis(self.nack_delay_ms)
    }
}

/// Bounded exponential backoff applied at the store and queue boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
            multiplier: 2.0,
        }
    }
}

/// What a worker does when a confirmation task turns out to be a replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayPolicy {
    /// The first confirmation already notified subscribers.
    #[default]
    Skip,
    /// Notify again, flagged as a replay.
    Republish,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub count: usize,
    pub replay_policy: ReplayPolicy,
    /// Upper bound on handling one task; the task is nacked when exceeded. Unbounded when unset.
    pub processing_timeout_ms: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            replay_policy: ReplayPolicy::Skip,
            processing_timeout_ms: None,
        }
    }
}

impl WorkerConfig {
    pub fn processing_timeout(&self) -> Option<Duration> {
        self.processing_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Events retained per subscriber before a slow subscriber starts losing them.
    pub buffer_size: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self { buffer_size: 1_024 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    /// A pending order older than this is reported as stuck.
    pub stale_after_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 60_000,
            stale_after_ms: 300_000,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

impl PipelineConfig {
    /// Defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(::config::File::from(path));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: PipelineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Small timeouts and a single worker, for tests.
    pub fn test() -> Self {
        Self {
            store: StoreConfig {
                request_timeout_ms: 200,
                page_size: 2,
                ..StoreConfig::default()
            },
            queue: QueueConfig {
                request_timeout_ms: 200,
                visibility_timeout_ms: 500,
                nack_delay_ms: 20,
                ..QueueConfig::default()
            },
            retry: RetryConfig {
                max_attempts: 3,
                initial_backoff_ms: 5,
                max_backoff_ms: 20,
                multiplier: 2.0,
            },
            worker: WorkerConfig {
                count: 1,
                ..WorkerConfig::default()
            },
            notifier: NotifierConfig::default(),
            monitor: MonitorConfig {
                enabled: false,
                ..MonitorConfig::default()
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.store.buffer_size == 0 || self.queue.buffer_size == 0 || self.notifier.buffer_size == 0 {
            return invalid("buffer sizes must be greater than zero");
        }
        if self.store.page_size == 0 {
            return invalid("store.page_size must be greater than zero");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return invalid("retry.multiplier must be at least 1.0");
        }
        if self.worker.count == 0 {
            return invalid("worker.count must be at least 1");
        }
        if self.monitor.enabled && self.monitor.interval_ms == 0 {
            return invalid("monitor.interval_ms must be greater than zero");
        }
        Ok(())
    }
}
