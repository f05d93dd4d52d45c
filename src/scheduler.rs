//! Frame producer loop.
//!
//! Kicks off a frame at a fixed interval and waits for it to complete.
//! Engine calls block, so each frame runs on the blocking pool. Timeouts are
//! counted and the loop moves on; the next kickoff is the retry.

use crate::cmd::CmdError;
use crate::controller::DisplayController;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Outcome counters of a scheduler run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameReport {
    pub presented: u64,
    pub timeouts: u64,
    pub errors: u64,
}

impl FrameReport {
    pub fn attempted(&self) -> u64 {
        self.presented + self.timeouts + self.errors
    }
}

/// Scheduler for periodic frame kickoffs
pub struct FrameScheduler {
    ctl: Arc<DisplayController>,
    interval: Duration,
    frame_limit: Option<u64>,
}

impl FrameScheduler {
    pub fn new(ctl: Arc<DisplayController>, interval: Duration) -> Self {
        Self {
            ctl,
            interval,
            frame_limit: None,
        }
    }

    /// Stop after `frames` frames instead of running until shutdown
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    /// Run the scheduler loop
    ///
    /// Presents a frame every interval until the frame limit is reached or
    /// the shutdown signal arrives.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> FrameReport {
        tracing::info!("Frame scheduler started: interval={:?}", self.interval);

        let mut report = FrameReport::default();
        loop {
            if self.frame_limit.is_some_and(|limit| report.attempted() >= limit) {
                tracing::info!("Frame limit reached");
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.present_frame(&mut report).await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Frame scheduler shutting down");
                    break;
                }
            }
        }

        report
    }

    /// Kick off one frame and wait for it
    async fn present_frame(&self, report: &mut FrameReport) {
        let ctl = Arc::clone(&self.ctl);
        let result = tokio::task::spawn_blocking(move || -> Result<(), CmdError> {
            ctl.kickoff()?;
            ctl.wait_for_completion(false)
        })
        .await;

        match result {
            Ok(Ok(())) => {
                report.presented += 1;
                tracing::debug!("Frame {} presented", report.attempted());
            }
            Ok(Err(e)) if e.is_timeout() => {
                report.timeouts += 1;
                tracing::warn!("Frame timed out: {}", e);
            }
            Ok(Err(e)) => {
                report.errors += 1;
                tracing::error!("Frame failed: {}", e);
            }
            Err(e) => {
                report.errors += 1;
                tracing::error!("Frame task failed: {}", e);
            }
        }
    }
}
