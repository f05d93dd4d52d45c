//! Command-mode panel refresh synchronization.
//!
//! Coordinates a frame producer with a self-refreshing panel that only
//! redraws when explicitly kicked off:
//! - Programs the ping-pong tear-check block from panel timing
//! - Arms hardware kickoffs and tracks completion (ping-pong done)
//! - Gates the shared display clock on read-pointer activity
//! - Hands interrupt-path work off to a deferred worker

pub mod cmd;
pub mod config;
pub mod controller;
pub mod hw;
pub mod scheduler;

pub use cmd::{CmdError, CmdSession, Delivery, SessionPool, SessionStats, VsyncHandler};
pub use config::{Capabilities, Config, Tunables};
pub use controller::{DisplayController, Side, LINE_COUNT_INVALID};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// Every lock in this crate guards plain state that stays consistent
/// between statements, so a poisoned lock is still safe to use.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
