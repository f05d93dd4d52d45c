//! Vsync handler registry.
//!
//! Regular handlers run on every read-pointer event and keep the clock
//! countdown from expiring. Post-flush handlers run on ping-pong completion.
//!
//! Delivery works on a snapshot of the handler list taken under the short
//! lock, so add/remove never wait for a delivery loop. Each handler carries
//! its own enable lock, held while its callback runs: once
//! `remove_vsync_handler` returns the callback is neither running nor
//! invoked again. Callbacks run in the hardware-event context and must not
//! add or remove handlers.

use super::session::CmdSession;
use super::CmdError;
use crate::controller::DisplayController;
use crate::lock;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Which event a handler is delivered on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Every read-pointer event
    Regular,
    /// Every ping-pong completion
    PostFlush,
}

type VsyncCallback = Box<dyn Fn(&DisplayController, Instant) + Send + Sync>;

pub struct VsyncHandler {
    delivery: Delivery,
    enabled: Mutex<bool>,
    callback: VsyncCallback,
}

impl VsyncHandler {
    pub fn new<F>(delivery: Delivery, callback: F) -> Arc<Self>
    where
        F: Fn(&DisplayController, Instant) + Send + Sync + 'static,
    {
        Arc::new(Self {
            delivery,
            enabled: Mutex::new(false),
            callback: Box::new(callback),
        })
    }

    pub fn regular<F>(callback: F) -> Arc<Self>
    where
        F: Fn(&DisplayController, Instant) + Send + Sync + 'static,
    {
        Self::new(Delivery::Regular, callback)
    }

    pub fn post_flush<F>(callback: F) -> Arc<Self>
    where
        F: Fn(&DisplayController, Instant) + Send + Sync + 'static,
    {
        Self::new(Delivery::PostFlush, callback)
    }

    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    /// Registered with a session
    pub fn is_enabled(&self) -> bool {
        *lock(&self.enabled)
    }

    fn invoke(&self, delivery: Delivery, ctl: &DisplayController, timestamp: Instant) {
        let enabled = lock(&self.enabled);
        if *enabled && self.delivery == delivery {
            (self.callback)(ctl, timestamp);
        }
    }
}

impl std::fmt::Debug for VsyncHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VsyncHandler")
            .field("delivery", &self.delivery)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

pub(super) fn deliver(
    handlers: &[Arc<VsyncHandler>],
    delivery: Delivery,
    ctl: &DisplayController,
    timestamp: Instant,
) {
    for handler in handlers {
        handler.invoke(delivery, ctl, timestamp);
    }
}

impl CmdSession {
    /// Subscribe a handler. Adding an already enabled handler is a no-op.
    pub fn add_vsync_handler(&self, handler: &Arc<VsyncHandler>) -> Result<(), CmdError> {
        let ctl = self.controller()?;

        {
            let mut st = self.state();
            let mut enabled = lock(&handler.enabled);
            if !*enabled {
                *enabled = true;
                st.handlers.push(Arc::clone(handler));
                if handler.delivery == Delivery::Regular {
                    st.vsync_enabled = true;
                }
            }
        }

        if handler.delivery == Delivery::Regular {
            self.clock_on(&ctl);
        }

        Ok(())
    }

    /// Unsubscribe a handler.
    ///
    /// When the last regular handler leaves, the clock countdown restarts
    /// from a full window.
    pub fn remove_vsync_handler(&self, handler: &Arc<VsyncHandler>) -> Result<(), CmdError> {
        let _ctl = self.controller()?;

        let mut st = self.state();
        {
            let mut enabled = lock(&handler.enabled);
            if *enabled {
                *enabled = false;
                st.handlers.retain(|h| !Arc::ptr_eq(h, handler));
            }
        }

        let regular_left = st
            .handlers
            .iter()
            .any(|h| h.delivery == Delivery::Regular);
        if !regular_left {
            st.vsync_enabled = false;
            // Only while the read-pointer source is still subscribed
            if st.rdptr_ticks > 0 {
                st.rdptr_ticks = self.tunables.vsync_expire_ticks;
            }
        }

        Ok(())
    }

    /// Remove every handler, returning how many were registered
    pub(super) fn remove_all_handlers(&self) -> usize {
        let handlers = self.state().handlers.clone();
        for handler in &handlers {
            if let Err(e) = self.remove_vsync_handler(handler) {
                tracing::debug!("Handler removal skipped: {}", e);
            }
        }
        handlers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::testutil::rig;
    use crate::hw::{IrqKind, IrqSource};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;

    fn counting(delivery: Delivery) -> (Arc<VsyncHandler>, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let handler = VsyncHandler::new(delivery, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (handler, hits)
    }

    #[test]
    fn add_then_remove_restores_state() {
        let rig = rig();
        let before = rig.session.readptr_refresh_enabled();
        let (handler, _) = counting(Delivery::Regular);

        rig.session.add_vsync_handler(&handler).unwrap();
        assert!(rig.session.readptr_refresh_enabled());
        assert!(handler.is_enabled());
        assert_eq!(rig.session.handler_count(), 1);

        rig.session.remove_vsync_handler(&handler).unwrap();
        assert_eq!(rig.session.readptr_refresh_enabled(), before);
        assert!(!handler.is_enabled());
        assert_eq!(rig.session.handler_count(), 0);
        assert_eq!(rig.session.readptr_hold_ticks(), 4);
    }

    #[test]
    fn adding_twice_registers_once() {
        let rig = rig();
        let (handler, _) = counting(Delivery::PostFlush);

        rig.session.add_vsync_handler(&handler).unwrap();
        rig.session.add_vsync_handler(&handler).unwrap();

        assert_eq!(rig.session.handler_count(), 1);
        assert!(!rig.session.readptr_refresh_enabled());
        assert!(!rig.session.clock_enabled());
    }

    #[test]
    fn regular_handler_turns_clock_on_and_holds_countdown() {
        let rig = rig();
        let (handler, hits) = counting(Delivery::Regular);
        rig.session.add_vsync_handler(&handler).unwrap();

        assert!(rig.session.clock_enabled());
        for _ in 0..10 {
            assert_eq!(rig.hw.fire_kind(IrqKind::PingPongRdPtr), 1);
        }

        assert_eq!(hits.load(Ordering::SeqCst), 10);
        assert_eq!(rig.session.readptr_hold_ticks(), 4);
        assert_eq!(rig.ctl.vsync_count(), 10);
    }

    #[test]
    fn regular_handler_never_sees_completion() {
        let rig = rig();
        let (handler, hits) = counting(Delivery::Regular);
        rig.session.add_vsync_handler(&handler).unwrap();

        rig.session.kickoff().unwrap();
        assert!(rig.hw.fire(IrqSource::completion(rig.session.pp_num())));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn removing_one_of_two_regular_keeps_refresh() {
        let rig = rig();
        let (a, _) = counting(Delivery::Regular);
        let (b, _) = counting(Delivery::Regular);
        rig.session.add_vsync_handler(&a).unwrap();
        rig.session.add_vsync_handler(&b).unwrap();

        rig.session.remove_vsync_handler(&a).unwrap();
        assert!(rig.session.readptr_refresh_enabled());

        rig.session.remove_vsync_handler(&b).unwrap();
        assert!(!rig.session.readptr_refresh_enabled());
    }

    #[test]
    fn concurrent_add_remove_during_delivery() {
        let rig = rig();
        let (anchor, _) = counting(Delivery::Regular);
        rig.session.add_vsync_handler(&anchor).unwrap();

        let violations = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicBool::new(false));

        let firer = {
            let hw = Arc::clone(&rig.hw);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    hw.fire_kind(IrqKind::PingPongRdPtr);
                }
            })
        };

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let session = Arc::clone(&rig.session);
                let violations = Arc::clone(&violations);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let removed = Arc::new(AtomicBool::new(false));
                        let seen = Arc::clone(&removed);
                        let flagged = Arc::clone(&violations);
                        let handler = VsyncHandler::regular(move |_, _| {
                            if seen.load(Ordering::SeqCst) {
                                flagged.fetch_add(1, Ordering::SeqCst);
                            }
                        });
                        session.add_vsync_handler(&handler).unwrap();
                        session.remove_vsync_handler(&handler).unwrap();
                        removed.store(true, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        done.store(true, Ordering::SeqCst);
        firer.join().unwrap();

        assert_eq!(violations.load(Ordering::SeqCst), 0);
        assert_eq!(rig.session.handler_count(), 1);
        assert!(rig.session.readptr_refresh_enabled());
    }
}
