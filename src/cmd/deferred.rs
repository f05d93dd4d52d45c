//! Deferred work for a session.
//!
//! The hardware-event path cannot block, so it queues jobs on a bounded
//! channel with `try_send`. A dedicated worker thread drains the channel in
//! order and runs the blocking part (clock release, frame-done delivery).
//!
//! Each job kind has a pending flag, so a job already waiting in the queue is
//! not queued again. Clearing the clock-off flag cancels a queued clock-off.

use super::session::CmdSession;
use crate::lock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Weak};
use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, oneshot};

enum Job {
    FrameDone,
    ClockOff,
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Why a job could not be queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Queued,
    AlreadyPending,
    QueueFull,
    Closed,
}

pub struct DeferredQueue {
    tx: mpsc::Sender<Job>,
    rx: Mutex<Option<mpsc::Receiver<Job>>>,
    frame_done_pending: AtomicBool,
    clock_off_pending: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DeferredQueue {
    pub fn new(depth: usize) -> Self {
        let (tx, rx) = mpsc::channel(depth.max(1));
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            frame_done_pending: AtomicBool::new(false),
            clock_off_pending: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    /// Start the worker thread; jobs run against `session` while it lives
    pub fn spawn_worker(&self, name: String, session: Weak<CmdSession>) -> std::io::Result<()> {
        let Some(rx) = lock(&self.rx).take() else {
            return Ok(());
        };
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || run(rx, session))?;
        *lock(&self.worker) = Some(handle);
        Ok(())
    }

    /// Queue frame-done delivery. Non-blocking.
    pub fn schedule_frame_done(&self) -> ScheduleOutcome {
        self.schedule(&self.frame_done_pending, Job::FrameDone)
    }

    /// Queue a clock-off. Non-blocking.
    pub fn schedule_clock_off(&self) -> ScheduleOutcome {
        self.schedule(&self.clock_off_pending, Job::ClockOff)
    }

    fn schedule(&self, pending: &AtomicBool, job: Job) -> ScheduleOutcome {
        if pending.swap(true, Ordering::AcqRel) {
            return ScheduleOutcome::AlreadyPending;
        }
        match self.tx.try_send(job) {
            Ok(()) => ScheduleOutcome::Queued,
            Err(e) => {
                pending.store(false, Ordering::Release);
                match e {
                    mpsc::error::TrySendError::Full(_) => ScheduleOutcome::QueueFull,
                    mpsc::error::TrySendError::Closed(_) => ScheduleOutcome::Closed,
                }
            }
        }
    }

    /// Cancel a queued clock-off. Returns `true` if one was pending.
    pub fn cancel_clock_off(&self) -> bool {
        self.clock_off_pending.swap(false, Ordering::AcqRel)
    }

    /// Block until every job queued before this call has run.
    ///
    /// Must not be called from the worker itself.
    pub fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.blocking_send(Job::Flush(ack)).is_err() {
            return;
        }
        let _ = done.blocking_recv();
    }

    /// Run remaining jobs, then stop and join the worker
    pub fn shutdown(&self) {
        let Some(handle) = lock(&self.worker).take() else {
            return;
        };
        if self.tx.blocking_send(Job::Shutdown).is_err() {
            tracing::debug!("Deferred worker already gone");
        }
        if handle.join().is_err() {
            tracing::error!("Deferred worker panicked");
        }
    }
}

fn run(mut rx: mpsc::Receiver<Job>, session: Weak<CmdSession>) {
    tracing::debug!("Deferred worker started");

    while let Some(job) = rx.blocking_recv() {
        match job {
            Job::Shutdown => break,
            Job::Flush(ack) => {
                let _ = ack.send(());
            }
            Job::FrameDone => {
                let Some(session) = session.upgrade() else {
                    break;
                };
                // Clear first: a completion racing with the drain queues again
                session
                    .deferred()
                    .frame_done_pending
                    .store(false, Ordering::Release);
                session.frame_done_work();
            }
            Job::ClockOff => {
                let Some(session) = session.upgrade() else {
                    break;
                };
                if session
                    .deferred()
                    .clock_off_pending
                    .swap(false, Ordering::AcqRel)
                {
                    session.clock_off_work();
                } else {
                    tracing::debug!("Skipping cancelled clock-off");
                }
            }
        }
    }

    tracing::debug!("Deferred worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_job_is_not_queued_twice() {
        let queue = DeferredQueue::new(4);

        assert_eq!(queue.schedule_frame_done(), ScheduleOutcome::Queued);
        assert_eq!(queue.schedule_frame_done(), ScheduleOutcome::AlreadyPending);
        assert_eq!(queue.schedule_clock_off(), ScheduleOutcome::Queued);
        assert_eq!(queue.schedule_clock_off(), ScheduleOutcome::AlreadyPending);
    }

    #[test]
    fn cancel_clears_pending_clock_off() {
        let queue = DeferredQueue::new(4);
        assert!(!queue.cancel_clock_off());

        queue.schedule_clock_off();
        assert!(queue.cancel_clock_off());
        assert!(!queue.cancel_clock_off());
    }

    #[test]
    fn full_queue_reports_back_pressure() {
        let queue = DeferredQueue::new(1);

        assert_eq!(queue.schedule_frame_done(), ScheduleOutcome::Queued);
        assert_eq!(queue.schedule_clock_off(), ScheduleOutcome::QueueFull);
        // A rejected job must not stay marked as pending
        assert!(!queue.cancel_clock_off());
    }

    #[test]
    fn flush_and_shutdown_return_with_idle_worker() {
        let queue = DeferredQueue::new(4);
        queue
            .spawn_worker("deferred-test".to_string(), Weak::new())
            .unwrap();

        queue.flush();
        queue.shutdown();

        // Worker gone: flushing is a no-op rather than a hang
        queue.flush();
    }
}
