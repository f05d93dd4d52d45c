//! Command-mode session engine.
//!
//! A session binds one display controller to a ping-pong unit and runs the
//! kickoff/completion state machine for it:
//! - [`tearcheck`]: derives and programs the tear-check block
//! - [`clock`]: debounced gating of the shared pipeline clock
//! - [`vsync`]: read-pointer and post-flush subscribers
//! - [`session`]: kickoff, completion, wait and read-pointer handling
//! - [`pool`]: fixed-size session pool with ordered start/stop
//!
//! Two execution contexts meet here. Interrupt callbacks run in the
//! hardware-event context and only ever take the session's short state lock.
//! Anything that may block (clock release, frame-done delivery) is queued to
//! the session's deferred worker.

mod clock;
pub(crate) mod completion;
pub(crate) mod deferred;
pub mod pool;
pub mod session;
pub mod tearcheck;
pub mod vsync;

#[cfg(test)]
pub(crate) mod testutil;

pub use pool::SessionPool;
pub use session::{CmdSession, SessionStats};
pub use tearcheck::TearcheckParams;
pub use vsync::{Delivery, VsyncHandler};

use crate::hw::HwError;
use std::time::Duration;
use thiserror::Error;

/// Command-mode errors
#[derive(Error, Debug)]
pub enum CmdError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No free command-mode session (pool of {capacity})")]
    ResourceExhausted { capacity: usize },

    #[error("{what} timed out after {timeout:?}")]
    Timeout {
        what: &'static str,
        timeout: Duration,
    },

    #[error("No active command-mode session")]
    NotFound,

    #[error("Hardware error: {0}")]
    Hw(#[from] HwError),

    #[error("Failed to spawn deferred worker: {0}")]
    Worker(#[from] std::io::Error),
}

impl CmdError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CmdError::Timeout { .. })
    }
}
