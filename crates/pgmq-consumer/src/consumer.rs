//! Polling consumer engine.
//!
//! A [`Consumer`] repeatedly fetches a batch of messages through its
//! [`QueueDriver`], dispatches every message to the [`MessageHandler`]
//! concurrently, acknowledges successes and routes exhausted messages to a
//! dead-letter queue. Outcomes are published through the consumer's
//! [`EventEmitter`].
//!
//! # Cycle
//!
//! 1. Fetch with `get` (lease for `visibility_time` seconds) or `pop`.
//! 2. An empty fetch schedules the next cycle after ten poll intervals.
//! 3. Every message runs in its own task. All tasks of a batch share one
//!    cancellation token, cancelled when the dispatch deadline elapses.
//! 4. The cycle waits for every task to settle, then schedules the next
//!    cycle after one poll interval.
//!
//! Cycles never overlap. Failures never stop continuous polling; they are
//! emitted as `error` or `abort-error` events.

use crate::driver::QueueDriver;
use crate::error::{ConfigurationError, ConsumerError};
use crate::events::{ConsumerEvent, EventEmitter, EventKind};
use crate::message::{Message, Payload, QueueName};
use crate::options::{ConsumeType, ConsumerOptions, HandlerFailurePolicy};
use crate::timer::PollTimer;
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;

// ============================================================================
// Handler
// ============================================================================

/// User code invoked once per delivered message.
///
/// The token is cancelled when the batch deadline elapses; long-running
/// handlers should watch it and return early, typically with
/// [`Aborted`](crate::error::Aborted). Returning `Ok` acknowledges the
/// message.
///
/// Implemented for async closures:
///
/// ```rust
/// use pgmq_consumer::{MessageHandler, Payload};
/// use tokio_util::sync::CancellationToken;
///
/// fn accepts<H: MessageHandler>(_handler: H) {}
///
/// accepts(|payload: Payload, _cancel: CancellationToken| async move {
///     println!("received {} fields", payload.len());
///     Ok::<_, anyhow::Error>(())
/// });
/// ```
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: Payload, cancel: CancellationToken) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Payload, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, payload: Payload, cancel: CancellationToken) -> anyhow::Result<()> {
        (self)(payload, cancel).await
    }
}

// ============================================================================
// Consumer
// ============================================================================

/// Queue consumer bound to one queue, one handler and one driver
pub struct Consumer {
    engine: Arc<Engine>,
    timer: Mutex<PollTimer>,
    shutdown: CancellationToken,
    // Held for the whole of `start()` so polling loops never overlap
    running: tokio::sync::Mutex<()>,
}

impl Consumer {
    /// Create a consumer.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Configuration`] when the options are
    /// inconsistent, e.g. a dead-letter queue without a retry threshold.
    pub fn new(
        options: ConsumerOptions,
        handler: Arc<dyn MessageHandler>,
        driver: Arc<dyn QueueDriver>,
    ) -> Result<Self, ConsumerError> {
        options.validate()?;

        Ok(Self {
            engine: Arc::new(Engine {
                options,
                handler,
                driver,
                events: EventEmitter::new(),
            }),
            timer: Mutex::new(PollTimer::new()),
            shutdown: CancellationToken::new(),
            running: tokio::sync::Mutex::new(()),
        })
    }

    pub fn options(&self) -> &ConsumerOptions {
        &self.engine.options
    }

    pub fn events(&self) -> &EventEmitter {
        &self.engine.events
    }

    /// Register a listener for one kind of event
    pub fn on<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&ConsumerEvent) + Send + Sync + 'static,
    {
        self.engine.events.on(kind, listener);
    }

    /// Receive every event emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ConsumerEvent> {
        self.engine.events.subscribe()
    }

    /// Token that ends continuous polling when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop polling.
    ///
    /// The pending next-poll is cancelled. A cycle already in flight runs to
    /// completion and `start()` returns afterwards.
    pub fn stop(&self) {
        info!(queue_name = %self.engine.options.queue_name, "Stopping consumer");
        self.shutdown.cancel();
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    /// Run the polling loop.
    ///
    /// With `enabled_polling` the loop runs until [`stop`](Self::stop) is
    /// called and always returns `Ok`. Otherwise exactly one cycle runs and
    /// the first error it emitted, if any, is returned.
    ///
    /// Concurrent calls are serialized: a second call waits until the running
    /// loop has returned before it starts polling.
    pub async fn start(&self) -> Result<(), Arc<ConsumerError>> {
        let _running = self.running.lock().await;
        let options = &self.engine.options;
        info!(
            queue_name = %options.queue_name,
            consume_type = ?options.consume_type,
            pool_size = options.pool_size,
            enabled_polling = options.enabled_polling,
            "Starting consumer"
        );

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let outcome = self.engine.run_cycle().await;

            if !options.enabled_polling {
                return match outcome.first_error {
                    Some(error) => Err(error),
                    None => Ok(()),
                };
            }

            let delay = outcome.next_delay(options);
            debug!(
                queue_name = %options.queue_name,
                delay_ms = delay.as_millis() as u64,
                "Scheduling next poll"
            );

            let next_poll = self
                .timer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .schedule(delay, &self.shutdown);

            if !next_poll.fired().await {
                break;
            }
        }

        info!(queue_name = %options.queue_name, "Consumer stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let poll_pending = self
            .timer
            .lock()
            .map(|timer| timer.is_pending())
            .unwrap_or(false);
        f.debug_struct("Consumer")
            .field("options", &self.engine.options)
            .field("events", &self.engine.events)
            .field("poll_pending", &poll_pending)
            .field("stopped", &self.shutdown.is_cancelled())
            .finish()
    }
}

// ============================================================================
// Cycle execution
// ============================================================================

/// Result of one poll cycle
#[derive(Debug, Default)]
struct CycleOutcome {
    fetched: usize,
    first_error: Option<Arc<ConsumerError>>,
}

impl CycleOutcome {
    fn failed(&mut self, error: Arc<ConsumerError>) {
        if self.first_error.is_none() {
            self.first_error = Some(error);
        }
    }

    fn next_delay(&self, options: &ConsumerOptions) -> Duration {
        if self.fetched == 0 && self.first_error.is_none() {
            options.empty_poll_interval()
        } else {
            options.poll_interval()
        }
    }
}

/// State shared by the coordinator and its message tasks
struct Engine {
    options: ConsumerOptions,
    handler: Arc<dyn MessageHandler>,
    driver: Arc<dyn QueueDriver>,
    events: EventEmitter,
}

impl Engine {
    fn queue_name(&self) -> &QueueName {
        &self.options.queue_name
    }

    /// Emit an error event and hand back the shared error
    fn report(&self, error: ConsumerError) -> Arc<ConsumerError> {
        let error = Arc::new(error);
        self.events.emit(ConsumerEvent::from_error(Arc::clone(&error)));
        error
    }

    async fn run_cycle(self: &Arc<Self>) -> CycleOutcome {
        let mut outcome = CycleOutcome::default();

        let messages = match self.fetch().await {
            Ok(messages) => messages,
            Err(error) => {
                error!(
                    queue_name = %self.queue_name(),
                    error = %error,
                    transient = error.is_transient(),
                    "Failed to fetch messages"
                );
                outcome.failed(self.report(error));
                return outcome;
            }
        };

        outcome.fetched = messages.len();
        if messages.is_empty() {
            debug!(queue_name = %self.queue_name(), "No messages available");
            return outcome;
        }

        info!(
            queue_name = %self.queue_name(),
            message_count = messages.len(),
            "Dispatching message batch"
        );
        self.dispatch(messages, &mut outcome).await;
        outcome
    }

    async fn fetch(&self) -> Result<Vec<Message>, ConsumerError> {
        match self.options.consume_type {
            ConsumeType::Read => {
                let visibility_time = self
                    .options
                    .visibility_time()
                    .ok_or(ConfigurationError::MissingVisibilityTime)?;
                let messages = self
                    .driver
                    .get(self.queue_name(), visibility_time, self.options.pool_size)
                    .await?;
                Ok(messages)
            }
            ConsumeType::Pop => Ok(self.driver.pop(self.queue_name()).await?),
        }
    }

    /// Run one task per message and wait until every task settled.
    ///
    /// At most `pool_size` tasks process a message at the same time, also
    /// when a pop returns a larger batch.
    async fn dispatch(self: &Arc<Self>, messages: Vec<Message>, outcome: &mut CycleOutcome) {
        let cancel = CancellationToken::new();
        let deadline = self.options.dispatch_deadline();
        let permits = Arc::new(Semaphore::new(self.options.pool_size as usize));

        let mut tasks = JoinSet::new();
        for message in messages {
            let engine = Arc::clone(self);
            let cancel = cancel.clone();
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.map_err(|error| {
                    ConsumerError::TaskFailed {
                        message: error.to_string(),
                    }
                })?;
                engine.process_message(message, cancel).await
            });
        }

        let deadline_timer = tokio::time::sleep(deadline);
        tokio::pin!(deadline_timer);
        let mut deadline_elapsed = false;

        loop {
            tokio::select! {
                joined = tasks.join_next() => {
                    let result = match joined {
                        None => break,
                        Some(Ok(result)) => result,
                        Some(Err(join_error)) => Err(ConsumerError::TaskFailed {
                            message: join_error.to_string(),
                        }),
                    };
                    if let Err(error) = result {
                        self.task_failed(error, deadline_elapsed, outcome);
                    }
                }
                () = &mut deadline_timer, if !deadline_elapsed => {
                    deadline_elapsed = true;
                    cancel.cancel();
                    warn!(
                        queue_name = %self.queue_name(),
                        deadline_ms = deadline.as_millis() as u64,
                        pending_tasks = tasks.len(),
                        "Dispatch deadline elapsed, cancelling batch"
                    );
                    outcome.failed(self.report(ConsumerError::DeadlineElapsed { deadline }));
                }
            }
        }
    }

    fn task_failed(&self, error: ConsumerError, deadline_elapsed: bool, outcome: &mut CycleOutcome) {
        // The deadline already produced this cycle's abort-error event
        if deadline_elapsed && error.is_abort() {
            debug!(
                queue_name = %self.queue_name(),
                error = %error,
                "Message task aborted after deadline"
            );
            return;
        }

        if error.is_handler_failure()
            && self.options.handler_failure_policy == HandlerFailurePolicy::Absorb
        {
            warn!(
                queue_name = %self.queue_name(),
                error = %error,
                "Handler failed, message left for redelivery"
            );
            return;
        }

        error!(
            queue_name = %self.queue_name(),
            error = %error,
            "Message task failed"
        );
        outcome.failed(self.report(error));
    }

    #[instrument(skip(self, message, cancel), fields(
        queue_name = %self.options.queue_name,
        message_id = %message.id,
        read_count = message.read_count
    ))]
    async fn process_message(
        &self,
        message: Message,
        cancel: CancellationToken,
    ) -> Result<(), ConsumerError> {
        if let Some((dead_letter_queue, max_retries)) = self.options.dead_letter() {
            if message.has_exceeded_retries(max_retries) {
                return self
                    .send_to_dead_letter(message, dead_letter_queue, cancel)
                    .await;
            }
        }

        self.handler
            .handle(message.payload.clone(), cancel.child_token())
            .await
            .map_err(|source| ConsumerError::Handler {
                message_id: message.id,
                source,
            })?;

        self.acknowledge(&message, &cancel).await?;

        debug!("Message processed");
        self.events.emit(ConsumerEvent::Finish(message));
        Ok(())
    }

    async fn send_to_dead_letter(
        &self,
        message: Message,
        dead_letter_queue: &QueueName,
        cancel: CancellationToken,
    ) -> Result<(), ConsumerError> {
        info!(
            dead_letter_queue = %dead_letter_queue,
            "Retry budget exhausted, moving message to dead-letter queue"
        );

        self.driver
            .send(dead_letter_queue, message.payload.clone(), cancel.clone())
            .await?;
        self.acknowledge(&message, &cancel).await?;

        self.events.emit(ConsumerEvent::SendToDlq(message));
        Ok(())
    }

    /// Delete a leased message unless the batch was cancelled.
    ///
    /// Popped messages are already gone and are never deleted.
    async fn acknowledge(
        &self,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<(), ConsumerError> {
        if self.options.consume_type == ConsumeType::Pop {
            return Ok(());
        }

        if cancel.is_cancelled() {
            warn!("Batch cancelled, skipping delete; message will be redelivered");
            return Ok(());
        }

        self.driver.delete(self.queue_name(), message.id).await?;
        Ok(())
    }
}
