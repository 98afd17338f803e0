//! In-memory queue driver for testing and development.
//!
//! This module provides a fully functional in-memory queue that:
//! - Leases messages for a visibility window and counts deliveries
//! - Removes messages on `pop` and `delete`
//! - Auto-creates queues on first use (configurable)
//! - Provides thread-safe concurrent access
//! - Supports fault injection for exercising consumer error paths
//!
//! Lease expiry follows the wall clock. Tests running on a paused tokio clock
//! use [`InMemoryDriver::expire_leases`] to make leased messages visible
//! again.

use crate::driver::QueueDriver;
use crate::error::DriverError;
use crate::message::{Message, MessageId, Payload, QueueName, Timestamp};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

const PROVIDER_NAME: &str = "in-memory";

/// In-memory driver configuration
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    /// Messages returned by one `pop` call
    pub pop_batch_size: u32,
    /// Create queues on first access instead of reporting `QueueNotFound`
    pub auto_create_queues: bool,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            pop_batch_size: 1,
            auto_create_queues: true,
        }
    }
}

/// Driver operation, used to target injected failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverOperation {
    Send,
    Get,
    Pop,
    Delete,
}

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Thread-safe storage for all queues
struct QueueStorage {
    queues: HashMap<QueueName, InMemoryQueue>,
    injected_failures: HashMap<DriverOperation, VecDeque<DriverError>>,
    config: InMemoryConfig,
}

impl QueueStorage {
    fn new(config: InMemoryConfig) -> Self {
        Self {
            queues: HashMap::new(),
            injected_failures: HashMap::new(),
            config,
        }
    }

    /// Get a queue, creating it when auto-creation is enabled
    fn queue_mut(&mut self, queue_name: &QueueName) -> Result<&mut InMemoryQueue, DriverError> {
        if self.config.auto_create_queues {
            return Ok(self.queues.entry(queue_name.clone()).or_default());
        }

        self.queues
            .get_mut(queue_name)
            .ok_or_else(|| DriverError::QueueNotFound {
                queue_name: queue_name.to_string(),
            })
    }

    /// Take the next injected failure for an operation, if any
    fn take_failure(&mut self, operation: DriverOperation) -> Result<(), DriverError> {
        match self
            .injected_failures
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Internal state for a single queue
#[derive(Default)]
struct InMemoryQueue {
    /// Messages ordered by id
    messages: BTreeMap<MessageId, Message>,
    last_id: i64,
}

impl InMemoryQueue {
    fn enqueue(&mut self, payload: Payload) -> MessageId {
        self.last_id += 1;
        let id = MessageId::new(self.last_id);
        self.messages.insert(id, Message::new(id, payload));
        id
    }

    fn visible_ids(&self, now: Timestamp, limit: usize) -> Vec<MessageId> {
        self.messages
            .values()
            .filter(|message| message.visible_at <= now)
            .map(|message| message.id)
            .take(limit)
            .collect()
    }
}

// ============================================================================
// InMemoryDriver
// ============================================================================

/// In-memory queue driver
#[derive(Clone)]
pub struct InMemoryDriver {
    storage: Arc<RwLock<QueueStorage>>,
}

impl InMemoryDriver {
    /// Create new in-memory driver with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            storage: Arc::new(RwLock::new(QueueStorage::new(config))),
        }
    }

    fn lock(&self) -> Result<RwLockWriteGuard<'_, QueueStorage>, DriverError> {
        self.storage.write().map_err(|_| DriverError::Provider {
            provider: PROVIDER_NAME.to_string(),
            code: "lock_poisoned".to_string(),
            message: "queue storage lock poisoned by a panicking writer".to_string(),
        })
    }

    /// Create an empty queue; existing queues are left untouched
    pub fn create_queue(&self, queue_name: &QueueName) -> Result<(), DriverError> {
        let mut storage = self.lock()?;
        storage.queues.entry(queue_name.clone()).or_default();
        Ok(())
    }

    /// Enqueue a message without going through the async driver interface
    pub fn enqueue(&self, queue_name: &QueueName, payload: Payload) -> Result<MessageId, DriverError> {
        let mut storage = self.lock()?;
        Ok(storage.queue_mut(queue_name)?.enqueue(payload))
    }

    /// Make the next call of `operation` fail with `error`.
    ///
    /// Injected failures queue up per operation and are consumed in order.
    pub fn fail_next(&self, operation: DriverOperation, error: DriverError) -> Result<(), DriverError> {
        let mut storage = self.lock()?;
        storage
            .injected_failures
            .entry(operation)
            .or_default()
            .push_back(error);
        Ok(())
    }

    /// Release every lease in the queue so its messages become visible now
    pub fn expire_leases(&self, queue_name: &QueueName) -> Result<(), DriverError> {
        let mut storage = self.lock()?;
        let now = Timestamp::now();
        for message in storage.queue_mut(queue_name)?.messages.values_mut() {
            message.visible_at = now;
        }
        Ok(())
    }

    /// Number of messages currently stored in the queue (leased or not)
    pub fn queue_len(&self, queue_name: &QueueName) -> usize {
        self.storage
            .read()
            .map(|storage| {
                storage
                    .queues
                    .get(queue_name)
                    .map_or(0, |queue| queue.messages.len())
            })
            .unwrap_or(0)
    }

    /// Snapshot of the messages stored in the queue, ordered by id
    pub fn messages(&self, queue_name: &QueueName) -> Vec<Message> {
        self.storage
            .read()
            .map(|storage| {
                storage
                    .queues
                    .get(queue_name)
                    .map(|queue| queue.messages.values().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

impl Default for InMemoryDriver {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl QueueDriver for InMemoryDriver {
    async fn send(
        &self,
        queue_name: &QueueName,
        payload: Payload,
        cancel: CancellationToken,
    ) -> Result<(), DriverError> {
        if cancel.is_cancelled() {
            return Err(DriverError::Aborted);
        }

        let mut storage = self.lock()?;
        storage.take_failure(DriverOperation::Send)?;
        storage.queue_mut(queue_name)?.enqueue(payload);
        Ok(())
    }

    async fn get(
        &self,
        queue_name: &QueueName,
        visibility_time: u32,
        max_count: u32,
    ) -> Result<Vec<Message>, DriverError> {
        let mut storage = self.lock()?;
        storage.take_failure(DriverOperation::Get)?;

        let queue = storage.queue_mut(queue_name)?;
        let now = Timestamp::now();
        let lease_until = now.add_duration(Duration::from_secs(u64::from(visibility_time)));

        let ids = queue.visible_ids(now, max_count as usize);
        let mut leased = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(message) = queue.messages.get_mut(&id) {
                message.read_count = message.read_count.saturating_add(1);
                message.visible_at = lease_until;
                leased.push(message.clone());
            }
        }

        Ok(leased)
    }

    async fn pop(&self, queue_name: &QueueName) -> Result<Vec<Message>, DriverError> {
        let mut storage = self.lock()?;
        storage.take_failure(DriverOperation::Pop)?;

        let batch_size = storage.config.pop_batch_size as usize;
        let queue = storage.queue_mut(queue_name)?;
        let ids = queue.visible_ids(Timestamp::now(), batch_size);

        Ok(ids
            .into_iter()
            .filter_map(|id| queue.messages.remove(&id))
            .collect())
    }

    async fn delete(
        &self,
        queue_name: &QueueName,
        message_id: MessageId,
    ) -> Result<(), DriverError> {
        let mut storage = self.lock()?;
        storage.take_failure(DriverOperation::Delete)?;

        match storage.queue_mut(queue_name)?.messages.remove(&message_id) {
            Some(_) => Ok(()),
            None => Err(DriverError::MessageNotFound {
                queue_name: queue_name.to_string(),
                message_id,
            }),
        }
    }
}
