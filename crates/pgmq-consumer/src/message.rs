//! Message types shared between the consumer engine and queue drivers.

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Structured message body; opaque to the engine.
pub type Payload = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Maximum queue name length accepted by the SQL queue extension.
const MAX_QUEUE_NAME_LENGTH: usize = 47;

/// Validated queue name.
///
/// Queue names end up as table identifiers in the backing database, so they
/// are restricted to ASCII alphanumerics and underscores and may not start
/// with a digit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.is_empty() {
            return Err(ValidationError::Required {
                field: "queue_name".to_string(),
            });
        }

        if name.len() > MAX_QUEUE_NAME_LENGTH {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: format!("must be at most {} characters", MAX_QUEUE_NAME_LENGTH),
            });
        }

        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric characters and underscores allowed".to_string(),
            });
        }

        if name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "must not start with a digit".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for QueueName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(value: QueueName) -> Self {
        value.0
    }
}

/// Backend-assigned message identifier, unique per queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(i64);

impl MessageId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MessageId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Timestamp shifted forward by the given duration (saturating)
    pub fn add_duration(&self, duration: Duration) -> Self {
        let delta = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        Self(self.0.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = s.parse::<DateTime<Utc>>()?;
        Ok(Self::from_datetime(dt))
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A queue entry fetched by a driver.
///
/// Field names on the wire follow the row shape returned by the queue
/// extension's `read` and `pop` functions, so drivers can deserialize rows
/// directly into this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "msg_id")]
    pub id: MessageId,

    /// Number of deliveries without a delete
    #[serde(rename = "read_ct")]
    pub read_count: u32,

    pub enqueued_at: Timestamp,

    /// Current lease expiry; the message is redelivered after this point
    #[serde(rename = "vt")]
    pub visible_at: Timestamp,

    #[serde(rename = "message")]
    pub payload: Payload,
}

impl Message {
    /// Create a freshly enqueued message that is visible immediately
    pub fn new(id: MessageId, payload: Payload) -> Self {
        let now = Timestamp::now();
        Self {
            id,
            read_count: 0,
            enqueued_at: now,
            visible_at: now,
            payload,
        }
    }

    /// Set the delivery count
    pub fn with_read_count(mut self, read_count: u32) -> Self {
        self.read_count = read_count;
        self
    }

    /// Check if message has been delivered more often than the retry budget.
    ///
    /// The comparison is strict: a message read exactly `max_retries` times
    /// is still within budget.
    pub fn has_exceeded_retries(&self, max_retries: u32) -> bool {
        self.read_count > max_retries
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
