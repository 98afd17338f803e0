//! Next-poll scheduling.
//!
//! A consumer owns exactly one [`PollTimer`]. Scheduling a poll cancels the
//! one still pending, so at most one next cycle is ever queued.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
#[path = "timer_tests.rs"]
mod tests;

/// Owner of the pending next-poll handle
#[derive(Debug, Default)]
pub(crate) struct PollTimer {
    pending: Option<CancellationToken>,
}

impl PollTimer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Schedule the next poll after `delay`, replacing any pending poll.
    ///
    /// The scheduled poll is also cancelled when `shutdown` fires.
    pub(crate) fn schedule(&mut self, delay: Duration, shutdown: &CancellationToken) -> ScheduledPoll {
        self.cancel();

        let cancel = shutdown.child_token();
        self.pending = Some(cancel.clone());

        ScheduledPoll {
            at: Instant::now() + delay,
            cancel,
        }
    }

    /// Cancel the pending poll, if any
    pub(crate) fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel();
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|pending| !pending.is_cancelled())
    }
}

/// One scheduled poll
#[derive(Debug)]
pub(crate) struct ScheduledPoll {
    at: Instant,
    cancel: CancellationToken,
}

impl ScheduledPoll {
    /// Wait for the poll time; `false` when the poll was cancelled first
    pub(crate) async fn fired(self) -> bool {
        tokio::select! {
            () = tokio::time::sleep_until(self.at) => !self.cancel.is_cancelled(),
            () = self.cancel.cancelled() => false,
        }
    }
}
