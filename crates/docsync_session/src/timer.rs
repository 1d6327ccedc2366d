//! Single-slot debounced timer.

use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// A timer with at most one pending firing.
///
/// Scheduling replaces any pending firing. When the timer fires it sends a
/// message carrying its token to the owner's inbox; the owner passes that
/// token back to [`fired`](Self::fired), which rejects firings that were
/// already queued when the timer was rescheduled or cancelled.
#[derive(Debug)]
pub struct DebouncedTimer<M> {
    sink: UnboundedSender<M>,
    pending: Option<JoinHandle<()>>,
    token: u64,
}

impl<M: Send + 'static> DebouncedTimer<M> {
    /// Creates an idle timer delivering to `sink`.
    pub fn new(sink: UnboundedSender<M>) -> Self {
        Self {
            sink,
            pending: None,
            token: 0,
        }
    }

    /// Schedules `message(token)` to be delivered after `delay`, replacing
    /// any pending firing.
    pub fn schedule<F>(&mut self, delay: Duration, message: F)
    where
        F: FnOnce(u64) -> M + Send + 'static,
    {
        self.cancel();
        let token = self.token;
        let sink = self.sink.clone();
        let deadline = tokio::time::Instant::now() + delay;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = sink.send(message(token));
        }));
    }

    /// Cancels the pending firing, if any.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
        self.token = self.token.wrapping_add(1);
    }

    /// Accepts a delivered firing. Returns false for a stale token.
    pub fn fired(&mut self, token: u64) -> bool {
        if token != self.token || self.pending.is_none() {
            return false;
        }
        self.pending = None;
        self.token = self.token.wrapping_add(1);
        true
    }

    /// True while a firing is pending or queued.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl<M> Drop for DebouncedTimer<M> {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}
