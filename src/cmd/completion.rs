//! Re-armable completion flag.
//!
//! `reset` before arming, `complete_all` from the hardware-event path,
//! `wait_timeout` from a caller. A completion that lands between `reset` and
//! `wait_timeout` is not lost.

use crate::lock;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Completion {
    done: Mutex<bool>,
    cv: Condvar,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        *lock(&self.done) = false;
    }

    /// Signal completion and wake every waiter
    pub fn complete_all(&self) {
        *lock(&self.done) = true;
        self.cv.notify_all();
    }

    /// Returns `true` if completed within `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = lock(&self.done);
        let (guard, _) = self
            .cv
            .wait_timeout_while(guard, timeout, |done| !*done)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}
