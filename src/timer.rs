//! One-shot timer handle owned by the round aggregate.
//!
//! Arming always cancels the previous task first, so at most one callback per
//! handle is pending. Every arm bumps a generation counter; a callback that
//! woke up after being superseded sees a stale generation and must do nothing.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
pub struct Timer {
    handle: Option<JoinHandle<()>>,
    armed_at: Option<Instant>,
    generation: u64,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `on_fire(generation)` to run after `delay`.
    ///
    /// The callback receives the generation it was armed with and should hand
    /// it back to [`Timer::fired`] once it holds the owning lock.
    pub fn arm<F, Fut>(&mut self, delay: Duration, on_fire: F) -> u64
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.generation += 1;
        let callback = on_fire(self.generation);
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback.await;
        }));
        self.armed_at = Some(Instant::now());
        self.generation
    }

    /// Abort the pending callback, if any
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.armed_at = None;
    }

    /// Called from inside a firing callback. Returns false if the timer was
    /// cancelled or re-armed since `generation` was handed out.
    ///
    /// On success the handle is detached without aborting it, so the running
    /// callback can safely re-arm this timer.
    pub fn fired(&mut self, generation: u64) -> bool {
        if self.handle.is_none() || self.generation != generation {
            return false;
        }
        self.handle = None;
        self.armed_at = None;
        true
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    /// Whole seconds since the timer was last armed
    pub fn elapsed_secs(&self) -> Option<u64> {
        self.armed_at.map(|at| at.elapsed().as_secs())
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}
