//! Consumer event surface.
//!
//! Every outcome of a poll cycle is published as a [`ConsumerEvent`]. Callers
//! observe events either by registering synchronous listeners for one
//! [`EventKind`] or by subscribing to a broadcast stream of all events. The
//! emitter belongs to a single consumer instance.

use crate::error::ConsumerError;
use crate::message::Message;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;

const BROADCAST_CAPACITY: usize = 256;

/// Outcome published by the consumer
#[derive(Debug, Clone)]
pub enum ConsumerEvent {
    /// Handler succeeded and the message was acknowledged or already removed
    Finish(Message),
    /// Message exceeded its retry budget and was moved to the dead-letter queue
    SendToDlq(Message),
    /// A cancellation or timeout ended work in a cycle
    AbortError(Arc<ConsumerError>),
    /// Any other cycle failure
    Error(Arc<ConsumerError>),
}

impl ConsumerEvent {
    /// Wrap an error in the event variant matching its classification
    pub fn from_error(error: impl Into<Arc<ConsumerError>>) -> Self {
        let error = error.into();
        if error.is_abort() {
            Self::AbortError(error)
        } else {
            Self::Error(error)
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Finish(_) => EventKind::Finish,
            Self::SendToDlq(_) => EventKind::SendToDlq,
            Self::AbortError(_) => EventKind::AbortError,
            Self::Error(_) => EventKind::Error,
        }
    }

    /// Message carried by `finish` and `send-to-dlq` events
    pub fn message(&self) -> Option<&Message> {
        match self {
            Self::Finish(message) | Self::SendToDlq(message) => Some(message),
            Self::AbortError(_) | Self::Error(_) => None,
        }
    }

    /// Error carried by `abort-error` and `error` events
    pub fn error(&self) -> Option<&ConsumerError> {
        match self {
            Self::AbortError(error) | Self::Error(error) => Some(error),
            Self::Finish(_) | Self::SendToDlq(_) => None,
        }
    }
}

/// Event name used for listener registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Finish,
    SendToDlq,
    AbortError,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Finish => "finish",
            Self::SendToDlq => "send-to-dlq",
            Self::AbortError => "abort-error",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Listener = Arc<dyn Fn(&ConsumerEvent) + Send + Sync>;

// ============================================================================
// EventEmitter
// ============================================================================

/// Dispatches events to listeners and broadcast subscribers.
///
/// Listeners run synchronously on the emitting task, in registration order,
/// so they should return quickly.
pub struct EventEmitter {
    listeners: RwLock<Vec<(EventKind, Listener)>>,
    sender: broadcast::Sender<ConsumerEvent>,
}

impl EventEmitter {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            listeners: RwLock::new(Vec::new()),
            sender,
        }
    }

    /// Register a listener for one kind of event
    pub fn on<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&ConsumerEvent) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((kind, Arc::new(listener)));
    }

    /// Receive every event emitted after this call.
    ///
    /// Slow receivers lag and lose the oldest events; see
    /// [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe(&self) -> broadcast::Receiver<ConsumerEvent> {
        self.sender.subscribe()
    }

    /// Number of listeners registered for `kind`
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(registered, _)| *registered == kind)
            .count()
    }

    pub fn emit(&self, event: ConsumerEvent) {
        let kind = event.kind();

        // Clone the matching listeners so none run under the lock
        let matching: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(registered, _)| *registered == kind)
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in matching {
            listener(&event);
        }

        // No subscribers is not an error
        let _ = self.sender.send(event);
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self
            .listeners
            .read()
            .map(|listeners| listeners.len())
            .unwrap_or(0);
        f.debug_struct("EventEmitter")
            .field("listeners", &listeners)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
