//! Error types for the consumer engine and queue drivers.

use crate::message::MessageId;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the consumer engine.
///
/// Every failure observed during a poll cycle is turned into one of these and
/// delivered through the consumer's event surface rather than returned to the
/// caller of `start()`.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Queue driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Dispatch deadline of {deadline:?} elapsed before the batch settled")]
    DeadlineElapsed { deadline: Duration },

    #[error("Handler failed for message {message_id}: {source}")]
    Handler {
        message_id: MessageId,
        #[source]
        source: anyhow::Error,
    },

    #[error("Message task failed: {message}")]
    TaskFailed { message: String },
}

impl ConsumerError {
    /// Check if the error originates from a cancellation or timeout.
    ///
    /// Abort-originated errors are reported as `abort-error` events so callers
    /// can tell lease expiry apart from genuine failures.
    pub fn is_abort(&self) -> bool {
        match self {
            Self::DeadlineElapsed { .. } => true,
            Self::Driver(error) => error.is_abort(),
            Self::Handler { source, .. } => source.chain().any(|cause| {
                cause.is::<Aborted>()
                    || cause
                        .downcast_ref::<DriverError>()
                        .is_some_and(DriverError::is_abort)
            }),
            Self::Configuration(_) => false,
            Self::TaskFailed { .. } => false,
        }
    }

    /// Check if a retry on a later cycle may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Driver(error) => error.is_transient(),
            Self::DeadlineElapsed { .. } => true,
            Self::Configuration(_) | Self::Handler { .. } | Self::TaskFailed { .. } => false,
        }
    }

    /// Check if the error came from user handler code
    pub fn is_handler_failure(&self) -> bool {
        matches!(self, Self::Handler { .. } | Self::TaskFailed { .. })
    }
}

/// Marker error for work that stopped because its cancellation token fired.
///
/// Handlers return this (usually via `anyhow::Error::from(Aborted)`) after
/// observing `CancellationToken::cancelled()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Operation aborted by cancellation signal")]
pub struct Aborted;

/// Errors reported by a [`QueueDriver`](crate::driver::QueueDriver).
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Message {message_id} not found in queue {queue_name}")]
    MessageNotFound {
        queue_name: String,
        message_id: MessageId,
    },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Operation aborted by cancellation signal")]
    Aborted,

    #[error("Provider error ({provider}): {code} - {message}")]
    Provider {
        provider: String,
        code: String,
        message: String,
    },
}

impl DriverError {
    /// Check if error is transient and the operation may succeed later
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueNotFound { .. } => false,
            Self::MessageNotFound { .. } => false,
            Self::ConnectionFailed { .. } => true,
            Self::Aborted => true,
            Self::Provider { .. } => true,
        }
    }

    /// Check if error was caused by the cancellation signal
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("visibility_time is required when consume_type is read")]
    MissingVisibilityTime,

    #[error("max_retries_before_dead_letter is required when dead_letter_queue_name is set")]
    MissingRetryThreshold,

    #[error("Invalid value for {field}: {message}")]
    Invalid { field: String, message: String },

    #[error("Configuration loading failed: {message}")]
    Load { message: String },
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(error: config::ConfigError) -> Self {
        Self::Load {
            message: error.to_string(),
        }
    }
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
