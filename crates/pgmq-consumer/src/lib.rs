//! # pgmq-consumer
//!
//! Polling consumer engine for database-backed message queues with lease
//! semantics, such as the `pgmq` Postgres extension.
//!
//! This library provides:
//! - A polling loop with bounded per-cycle concurrency
//! - Lease-based (`read`) and destructive (`pop`) consumption
//! - Cooperative cancellation when a batch outlives its visibility window
//! - Dead-letter routing for messages that exhausted their retry budget
//! - An event surface for finished, dead-lettered and failed work
//!
//! ## Module Organization
//!
//! - [consumer] - The polling engine and the handler trait
//! - [driver] - The queue backend capability consumed by the engine
//! - [drivers] - Driver implementations (in-memory)
//! - [error] - Error types for the engine and drivers
//! - [events] - Consumer events and the emitter
//! - [message] - Queue names, ids and messages
//! - [options] - Consumer configuration and loading
//!
//! ## Example
//!
//! ```rust
//! use pgmq_consumer::{
//!     ConsumeType, Consumer, ConsumerOptions, EventKind, InMemoryDriver, MessageHandler,
//!     Payload, QueueName,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let queue_name = QueueName::new("emails".to_string())?;
//! let driver = InMemoryDriver::default();
//! driver.enqueue(&queue_name, Payload::new())?;
//!
//! let options = ConsumerOptions::new(queue_name, ConsumeType::Read)
//!     .with_visibility_time(30)
//!     .with_enabled_polling(false);
//! let handler: Arc<dyn MessageHandler> =
//!     Arc::new(|_payload: Payload, _cancel: CancellationToken| async {
//!         Ok::<_, anyhow::Error>(())
//!     });
//!
//! let consumer = Consumer::new(options, handler, Arc::new(driver))?;
//! consumer.on(EventKind::Finish, |event| println!("finished: {:?}", event.message()));
//! consumer.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod consumer;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod events;
pub mod message;
pub mod options;

mod timer;

// Re-export commonly used types at crate root for convenience
pub use consumer::{Consumer, MessageHandler};
pub use driver::QueueDriver;
pub use drivers::{DriverOperation, InMemoryConfig, InMemoryDriver};
pub use error::{Aborted, ConfigurationError, ConsumerError, DriverError, ValidationError};
pub use events::{ConsumerEvent, EventEmitter, EventKind};
pub use message::{Message, MessageId, Payload, QueueName, Timestamp};
pub use options::{ConsumeType, ConsumerOptions, HandlerFailurePolicy};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
