//! Keyed debounce timers
//!
//! `schedule(key, delay, f)` cancels any pending timer for `key` and arms a
//! new one. `schedule_if_idle` arms only when nothing is pending for `key`, so
//! bursts coalesce into the first timer. Deadlines use tokio's monotonic
//! clock. A timer removes itself before its callback runs; replacing or
//! cancelling a key never aborts a callback that has already started.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

struct Pending {
    id: u64,
    deadline: Instant,
    handle: JoinHandle<()>,
}

type Timers = Arc<Mutex<HashMap<String, Pending>>>;

#[derive(Clone, Default)]
pub struct Debouncer {
    timers: Timers,
    next_id: Arc<AtomicU64>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any pending timer for `key` and run `f` after `delay`
    pub fn schedule<F, Fut>(&self, key: &str, delay: Duration, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = timers.remove(key) {
            previous.handle.abort();
            debug!(key, "Debounce timer rescheduled");
        }
        let pending = self.spawn(key, delay, f);
        timers.insert(key.to_string(), pending);
    }

    /// Arm a timer only if none is pending for `key`
    ///
    /// Returns `true` when a new timer was armed.
    pub fn schedule_if_idle<F, Fut>(&self, key: &str, delay: Duration, f: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        if timers.contains_key(key) {
            return false;
        }
        let pending = self.spawn(key, delay, f);
        timers.insert(key.to_string(), pending);
        true
    }

    /// Cancel the pending timer for `key`; returns whether one was pending
    pub fn cancel(&self, key: &str) -> bool {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        match timers.remove(key) {
            Some(pending) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Time left before the timer for `key` fires
    pub fn remaining(&self, key: &str) -> Option<Duration> {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|p| p.deadline.saturating_duration_since(Instant::now()))
    }

    fn spawn<F, Fut>(&self, key: &str, delay: Duration, f: F) -> Pending
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let deadline = Instant::now() + delay;
        let timers = self.timers.clone();
        let owned_key = key.to_string();

        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            {
                let mut timers = timers.lock().unwrap_or_else(PoisonError::into_inner);
                // A replacement may have won the lock after we woke
                match timers.get(&owned_key) {
                    Some(pending) if pending.id == id => {
                        timers.remove(&owned_key);
                    }
                    _ => return,
                }
            }
            debug!(key = %owned_key, "Debounce timer fired");
            f().await;
        });

        Pending {
            id,
            deadline,
            handle,
        }
    }
}
