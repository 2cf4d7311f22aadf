// src/watch/debounce.rs

//! At-most-one pending deferred action.
//!
//! Each [`Debouncer::schedule`] cancels whatever is pending and arms a fresh
//! timer, so a burst of filesystem events within the window collapses into a
//! single firing of the most recent action.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

pub struct Debouncer {
    delay: Duration,
    pending: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Debouncer {
        Debouncer {
            delay,
            pending: None,
        }
    }

    /// Schedule `action` to run after the delay, replacing any pending one.
    pub fn schedule(&mut self, action: impl Future<Output = ()> + Send + 'static) {
        self.cancel();
        let delay = self.delay;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        }));
    }

    /// Drop the pending action, if any.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
