//! Consumer configuration.
//!
//! [`ConsumerOptions`] is owned by a [`Consumer`](crate::consumer::Consumer)
//! for its lifetime. Options can be built in code or loaded from layered
//! sources (file, then environment) through [`ConsumerOptions::load`].

use crate::error::ConfigurationError;
use crate::message::QueueName;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix used by [`ConsumerOptions::load`]
pub const ENV_PREFIX: &str = "PGMQ_CONSUMER";

const DEFAULT_POOL_SIZE: u32 = 1;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const EMPTY_POLL_MULTIPLIER: u32 = 10;
const DEFAULT_DEADLINE_SECONDS: u32 = 1;

/// How messages are taken from the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumeType {
    /// Fetch and remove in one step; no delete afterwards
    Pop,
    /// Lease for `visibility_time` seconds; delete after successful handling
    Read,
}

/// What happens to a handler failure that is not a dead-letter or timeout case
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerFailurePolicy {
    /// Emit the failure as an `error` or `abort-error` event
    #[default]
    Report,
    /// Log the failure and leave the message for redelivery silently
    Absorb,
}

/// Immutable consumer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerOptions {
    pub queue_name: QueueName,

    pub consume_type: ConsumeType,

    /// Lease duration in seconds; required for [`ConsumeType::Read`]
    #[serde(default)]
    pub visibility_time: Option<u32>,

    /// Maximum messages fetched and processed per cycle
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Run continuously; when false exactly one cycle runs
    #[serde(default = "default_enabled_polling")]
    pub enabled_polling: bool,

    #[serde(default)]
    pub dead_letter_queue_name: Option<QueueName>,

    #[serde(default)]
    pub max_retries_before_dead_letter: Option<u32>,

    #[serde(default)]
    pub handler_failure_policy: HandlerFailurePolicy,
}

fn default_pool_size() -> u32 {
    DEFAULT_POOL_SIZE
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_enabled_polling() -> bool {
    true
}

impl ConsumerOptions {
    /// Create options with defaults for everything but the queue and mode
    pub fn new(queue_name: QueueName, consume_type: ConsumeType) -> Self {
        Self {
            queue_name,
            consume_type,
            visibility_time: None,
            pool_size: DEFAULT_POOL_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            enabled_polling: true,
            dead_letter_queue_name: None,
            max_retries_before_dead_letter: None,
            handler_failure_policy: HandlerFailurePolicy::default(),
        }
    }

    pub fn with_visibility_time(mut self, seconds: u32) -> Self {
        self.visibility_time = Some(seconds);
        self
    }

    pub fn with_pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_poll_interval_ms(mut self, interval_ms: u64) -> Self {
        self.poll_interval_ms = interval_ms;
        self
    }

    pub fn with_enabled_polling(mut self, enabled: bool) -> Self {
        self.enabled_polling = enabled;
        self
    }

    /// Route messages read more than `max_retries` times to `queue_name`
    pub fn with_dead_letter_queue(mut self, queue_name: QueueName, max_retries: u32) -> Self {
        self.dead_letter_queue_name = Some(queue_name);
        self.max_retries_before_dead_letter = Some(max_retries);
        self
    }

    pub fn with_handler_failure_policy(mut self, policy: HandlerFailurePolicy) -> Self {
        self.handler_failure_policy = policy;
        self
    }

    /// Validate settings that must hold before any cycle runs.
    ///
    /// A missing `visibility_time` for [`ConsumeType::Read`] is deliberately
    /// not checked here; it is reported per cycle instead.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.dead_letter_queue_name.is_some() && self.max_retries_before_dead_letter.is_none() {
            return Err(ConfigurationError::MissingRetryThreshold);
        }

        if self.pool_size == 0 {
            return Err(ConfigurationError::Invalid {
                field: "pool_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if let Some(dead_letter) = &self.dead_letter_queue_name {
            if *dead_letter == self.queue_name {
                return Err(ConfigurationError::Invalid {
                    field: "dead_letter_queue_name".to_string(),
                    message: "must differ from queue_name".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Lease duration, treating zero as unset
    pub fn visibility_time(&self) -> Option<u32> {
        self.visibility_time.filter(|seconds| *seconds > 0)
    }

    /// Dead-letter target and retry threshold, when both are configured
    pub fn dead_letter(&self) -> Option<(&QueueName, u32)> {
        match (
            &self.dead_letter_queue_name,
            self.max_retries_before_dead_letter,
        ) {
            (Some(queue_name), Some(max_retries)) => Some((queue_name, max_retries)),
            _ => None,
        }
    }

    /// Delay before the next cycle; zero falls back to the default
    pub fn poll_interval(&self) -> Duration {
        let millis = match self.poll_interval_ms {
            0 => DEFAULT_POLL_INTERVAL_MS,
            millis => millis,
        };
        Duration::from_millis(millis)
    }

    /// Delay before the next cycle after an empty fetch
    pub fn empty_poll_interval(&self) -> Duration {
        self.poll_interval() * EMPTY_POLL_MULTIPLIER
    }

    /// Time allowed for one dispatched batch before its token is cancelled
    pub fn dispatch_deadline(&self) -> Duration {
        let seconds = self.visibility_time().unwrap_or(DEFAULT_DEADLINE_SECONDS);
        Duration::from_secs(u64::from(seconds))
    }

    /// Load options from an optional file followed by environment variables.
    ///
    /// Sources (later sources override earlier ones):
    ///  1. `path`, when given; format is picked from the file extension
    ///  2. Environment variables prefixed `PGMQ_CONSUMER__`, with `__` as the
    ///     nesting separator, e.g. `PGMQ_CONSUMER__POOL_SIZE=8`
    ///
    /// The loaded options are validated before being returned.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        Self::from_config(builder.build()?)
    }

    /// Deserialize and validate options from an already-built configuration
    pub fn from_config(config: config::Config) -> Result<Self, ConfigurationError> {
        let options: Self = config.try_deserialize()?;
        options.validate()?;
        Ok(options)
    }
}

#[cfg(test)]
#[path = "options_tests.rs"]
mod tests;
