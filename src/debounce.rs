//! Trailing-edge debounce of rapid edits
//!
//! The last payload wins. A flush is due once `wait` has elapsed since the
//! most recent call.

use std::time::Duration;

use tokio::time::Instant;

/// Decide whether the pending payload should be committed at `now`.
///
/// Returns the payload when the flush is due, otherwise hands it back
/// untouched in the second slot of the tuple.
pub fn decide<T>(
    wait: Duration,
    now: Instant,
    last_call: Option<Instant>,
    pending: Option<T>,
) -> (bool, Option<T>) {
    match (last_call, pending) {
        (_, None) => (false, None),
        (None, Some(payload)) => (true, Some(payload)),
        (Some(last), Some(payload)) => (now.saturating_duration_since(last) >= wait, Some(payload)),
    }
}

#[derive(Debug)]
pub struct Debouncer<T> {
    wait: Duration,
    last_call: Option<Instant>,
    pending: Option<T>,
}

impl<T> Debouncer<T> {
    pub fn new(wait: Duration) -> Self {
        Self {
            wait,
            last_call: None,
            pending: None,
        }
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }

    /// Record a call, replacing any payload not yet flushed.
    pub fn call(&mut self, payload: T) {
        self.last_call = Some(Instant::now());
        self.pending = Some(payload);
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Take the payload if the quiet period has passed.
    pub fn poll(&mut self) -> Option<T> {
        let (flush, payload) = decide(self.wait, Instant::now(), self.last_call, self.pending.take());
        if flush {
            payload
        } else {
            self.pending = payload;
            None
        }
    }

    /// Instant at which the pending payload becomes due.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref()?;
        self.last_call.map(|last| last + self.wait)
    }

    /// Take the payload regardless of timing.
    pub fn take(&mut self) -> Option<T> {
        self.pending.take()
    }
}
