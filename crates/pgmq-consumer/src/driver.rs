//! Queue driver capability consumed by the engine.
//!
//! A driver adapts one queue backend (SQL queue functions reached through a
//! database client, a remote RPC service, ...) to the four operations the
//! consumer needs. Drivers report failures through `Result` and never panic
//! across this boundary; reconnects and transport retries are the driver's
//! own business.

use crate::error::DriverError;
use crate::message::{Message, MessageId, Payload, QueueName};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Interface implemented by specific queue backends.
///
/// One driver instance is shared by every concurrent message task of a cycle
/// and across cycles, so implementations must be safe for concurrent use.
#[async_trait]
pub trait QueueDriver: Send + Sync {
    /// Enqueue a new message.
    ///
    /// The engine uses this only to forward messages to a dead-letter queue;
    /// `cancel` is the dispatch token of the current cycle.
    async fn send(
        &self,
        queue_name: &QueueName,
        payload: Payload,
        cancel: CancellationToken,
    ) -> Result<(), DriverError>;

    /// Lease up to `max_count` messages, hiding them from other consumers for
    /// `visibility_time` seconds
    async fn get(
        &self,
        queue_name: &QueueName,
        visibility_time: u32,
        max_count: u32,
    ) -> Result<Vec<Message>, DriverError>;

    /// Atomically fetch and remove up to the backend's batch size
    async fn pop(&self, queue_name: &QueueName) -> Result<Vec<Message>, DriverError>;

    /// Permanently remove a message
    async fn delete(&self, queue_name: &QueueName, message_id: MessageId)
        -> Result<(), DriverError>;
}
