//! Common test utilities for pgmq-consumer integration tests
//!
//! This module provides:
//! - A recording driver wrapping the in-memory driver
//! - A scripted message handler
//! - An event log fed by consumer listeners
//! - Helpers for building queues, payloads and consumers

use async_trait::async_trait;
use pgmq_consumer::{
    Consumer, ConsumerEvent, ConsumerOptions, DriverError, EventKind, InMemoryDriver, Message,
    MessageHandler, MessageId, Payload, QueueDriver, QueueName,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Recording Driver
// ============================================================================

/// Driver call observed by [`RecordingDriver`]
#[derive(Debug, Clone, PartialEq)]
#[allow(dead_code)]
pub enum DriverCall {
    Send { queue_name: String, payload: Payload },
    Get { queue_name: String, visibility_time: u32, max_count: u32 },
    Pop { queue_name: String },
    Delete { queue_name: String, message_id: MessageId },
}

/// In-memory driver that records every call made by the consumer
#[derive(Clone, Default)]
pub struct RecordingDriver {
    inner: InMemoryDriver,
    calls: Arc<Mutex<Vec<DriverCall>>>,
}

impl RecordingDriver {
    #[allow(dead_code)]
    pub fn new(inner: InMemoryDriver) -> Self {
        Self {
            inner,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn inner(&self) -> &InMemoryDriver {
        &self.inner
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn sends(&self) -> Vec<(String, Payload)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                DriverCall::Send {
                    queue_name,
                    payload,
                } => Some((queue_name, payload)),
                _ => None,
            })
            .collect()
    }

    #[allow(dead_code)]
    pub fn deletes(&self) -> Vec<MessageId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                DriverCall::Delete { message_id, .. } => Some(message_id),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: DriverCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl QueueDriver for RecordingDriver {
    async fn send(
        &self,
        queue_name: &QueueName,
        payload: Payload,
        cancel: CancellationToken,
    ) -> Result<(), DriverError> {
        self.record(DriverCall::Send {
            queue_name: queue_name.to_string(),
            payload: payload.clone(),
        });
        self.inner.send(queue_name, payload, cancel).await
    }

    async fn get(
        &self,
        queue_name: &QueueName,
        visibility_time: u32,
        max_count: u32,
    ) -> Result<Vec<Message>, DriverError> {
        self.record(DriverCall::Get {
            queue_name: queue_name.to_string(),
            visibility_time,
            max_count,
        });
        self.inner.get(queue_name, visibility_time, max_count).await
    }

    async fn pop(&self, queue_name: &QueueName) -> Result<Vec<Message>, DriverError> {
        self.record(DriverCall::Pop {
            queue_name: queue_name.to_string(),
        });
        self.inner.pop(queue_name).await
    }

    async fn delete(
        &self,
        queue_name: &QueueName,
        message_id: MessageId,
    ) -> Result<(), DriverError> {
        self.record(DriverCall::Delete {
            queue_name: queue_name.to_string(),
            message_id,
        });
        self.inner.delete(queue_name, message_id).await
    }
}

// ============================================================================
// Scripted Handler
// ============================================================================

/// What the handler does with a message
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(dead_code)]
pub enum Behavior {
    Succeed,
    Fail,
    /// Wait for the cancellation token, then give up
    AwaitCancel,
    /// Complete successfully after a delay, ignoring cancellation
    Slow(Duration),
}

/// Handler that records payloads and behaves as scripted
#[derive(Clone)]
pub struct ScriptedHandler {
    behavior: Behavior,
    payloads: Arc<Mutex<Vec<Payload>>>,
}

impl ScriptedHandler {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            payloads: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn call_count(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }

    #[allow(dead_code)]
    pub fn payloads(&self) -> Vec<Payload> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for ScriptedHandler {
    async fn handle(&self, payload: Payload, cancel: CancellationToken) -> anyhow::Result<()> {
        self.payloads.lock().unwrap().push(payload);

        match self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail => Err(anyhow::anyhow!("scripted failure")),
            Behavior::AwaitCancel => {
                cancel.cancelled().await;
                Err(pgmq_consumer::Aborted.into())
            }
            Behavior::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

// ============================================================================
// Event Log
// ============================================================================

/// Collects every event a consumer emits through its listeners
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<ConsumerEvent>>>,
}

impl EventLog {
    /// Register listeners for every event kind on `consumer`
    pub fn attach(consumer: &Consumer) -> Self {
        let log = Self::default();
        for kind in [
            EventKind::Finish,
            EventKind::SendToDlq,
            EventKind::AbortError,
            EventKind::Error,
        ] {
            let events = Arc::clone(&log.events);
            consumer.on(kind, move |event| events.lock().unwrap().push(event.clone()));
        }
        log
    }

    pub fn events(&self) -> Vec<ConsumerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events()
            .iter()
            .filter(|event| event.kind() == kind)
            .count()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap().is_empty()
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn queue(name: &str) -> QueueName {
    QueueName::new(name.to_string()).expect("valid queue name")
}

pub fn payload(value: serde_json::Value) -> Payload {
    value.as_object().cloned().expect("payload must be a JSON object")
}

/// Lease every visible message `times` times without acknowledging it
#[allow(dead_code)]
pub async fn deliver_unacknowledged(driver: &InMemoryDriver, queue_name: &QueueName, times: u32) {
    for _ in 0..times {
        driver.get(queue_name, 30, u32::MAX).await.expect("lease succeeds");
        driver.expire_leases(queue_name).expect("leases expire");
    }
}

/// Build a consumer around a recording driver and scripted handler
pub fn build_consumer(
    options: ConsumerOptions,
    handler: &ScriptedHandler,
    driver: &RecordingDriver,
) -> Consumer {
    let handler: Arc<dyn MessageHandler> = Arc::new(handler.clone());
    let driver: Arc<dyn QueueDriver> = Arc::new(driver.clone());
    Consumer::new(options, handler, driver).expect("valid consumer options")
}
