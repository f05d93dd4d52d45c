//! Session pool and lifecycle.
//!
//! Sessions come from a fixed number of slots. `start` leases a slot,
//! installs the session on the controller, wires the interrupt callbacks for
//! its ping-pong unit and programs tear-check. `stop` unwinds that and
//! returns the slot.

use super::session::CmdSession;
use super::{tearcheck, CmdError};
use crate::config::{Config, Tunables};
use crate::controller::{DisplayController, Side};
use crate::hw::{IrqCallback, PanelEvent};
use crate::lock;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, Weak};

#[derive(Default)]
struct Slot {
    ref_cnt: u8,
    session: Weak<CmdSession>,
}

/// Fixed-size pool of command-mode sessions
pub struct SessionPool {
    tunables: Tunables,
    slots: Mutex<Vec<Slot>>,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("capacity", &self.capacity())
            .field("in_use", &self.in_use())
            .finish()
    }
}

impl SessionPool {
    pub fn new(config: &Config) -> Arc<Self> {
        Self::with_tunables(config.tunables())
    }

    pub fn with_tunables(tunables: Tunables) -> Arc<Self> {
        let slots = (0..tunables.max_sessions).map(|_| Slot::default()).collect();
        Arc::new(Self {
            tunables,
            slots: Mutex::new(slots),
        })
    }

    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    pub fn capacity(&self) -> usize {
        self.tunables.max_sessions
    }

    pub fn in_use(&self) -> usize {
        lock(&self.slots).iter().filter(|s| s.ref_cnt > 0).count()
    }

    /// Live sessions, in slot order
    pub fn sessions(&self) -> Vec<Arc<CmdSession>> {
        lock(&self.slots)
            .iter()
            .filter(|s| s.ref_cnt > 0)
            .filter_map(|s| s.session.upgrade())
            .collect()
    }

    fn checkout(&self) -> Result<usize, CmdError> {
        let mut slots = lock(&self.slots);
        let (idx, slot) = slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.ref_cnt == 0)
            .ok_or(CmdError::ResourceExhausted {
                capacity: self.tunables.max_sessions,
            })?;
        slot.ref_cnt = 1;
        Ok(idx)
    }

    fn attach(&self, idx: usize, session: &Arc<CmdSession>) {
        if let Some(slot) = lock(&self.slots).get_mut(idx) {
            slot.session = Arc::downgrade(session);
        }
    }

    pub(super) fn release(&self, idx: usize) {
        if let Some(slot) = lock(&self.slots).get_mut(idx) {
            *slot = Slot::default();
        }
    }

    /// Start command mode on `ctl`.
    ///
    /// Needs a drive surface bound to the controller. If tear-check setup
    /// fails the session stays installed (and its slot leased) so the caller
    /// can still `stop` it; the error is returned.
    pub fn start(self: &Arc<Self>, ctl: &Arc<DisplayController>) -> Result<Arc<CmdSession>, CmdError> {
        tracing::debug!(ctl = ctl.num(), "Starting command mode");

        let block = ctl
            .surface(Side::Left)
            .or_else(|| ctl.surface(Side::Right))
            .ok_or_else(|| {
                tracing::error!("Mixer not setup correctly");
                CmdError::Configuration("no drive surface bound".to_string())
            })?;

        if ctl.has_session() {
            return Err(CmdError::Configuration(format!(
                "controller {} already has a command-mode session",
                ctl.num()
            )));
        }

        let idx = self.checkout().inspect_err(|_| {
            tracing::error!("Too many sessions");
        })?;

        let session = Arc::new(CmdSession::new(idx, ctl, block.num(), Arc::clone(self)));

        // Drop any read-pointer subscription left by a previous lease
        ctl.hw().irq.unsubscribe(session.rdptr_source());

        let worker = format!("cmd-deferred-{}", session.pp_num());
        if let Err(e) = session
            .deferred()
            .spawn_worker(worker, Arc::downgrade(&session))
        {
            self.release(idx);
            return Err(e.into());
        }
        self.attach(idx, &session);

        if let Err(e) = ctl.install(Arc::clone(&session)) {
            // Lost a race with another start on the same controller
            session.deferred().shutdown();
            self.release(idx);
            return Err(e);
        }

        tracing::debug!(slot = idx, pp = session.pp_num(), "Session leased");

        let weak = Arc::downgrade(&session);
        let on_readptr: IrqCallback = Arc::new(move || {
            if let Some(session) = weak.upgrade() {
                session.on_readptr_event();
            }
        });
        let weak = Arc::downgrade(&session);
        let on_completion: IrqCallback = Arc::new(move || {
            if let Some(session) = weak.upgrade() {
                session.on_completion();
            }
        });
        ctl.hw()
            .irq
            .set_callback(session.rdptr_source(), Some(on_readptr));
        ctl.hw()
            .irq
            .set_callback(session.comp_source(), Some(on_completion));

        if let Err(e) = tearcheck::setup(&session, ctl, true) {
            tracing::error!("Tearcheck setup failed: {}", e);
            return Err(e);
        }

        tracing::info!(ctl = ctl.num(), slot = idx, pp = session.pp_num(), "Command mode started");
        Ok(session)
    }

    /// Release every lost kickoff across the pool, returning how many
    /// sessions were recovered
    pub fn recover_after_kickoff(&self) -> usize {
        tracing::info!("Recovering after kickoff");
        let recovered = self
            .sessions()
            .iter()
            .filter(|s| s.recover_kickoff())
            .count();
        tracing::info!(recovered, "Recovery done");
        recovered
    }
}

impl CmdSession {
    /// Stop command mode and return the slot to the pool.
    ///
    /// A second call returns [`CmdError::NotFound`] without side effects.
    pub fn stop(&self) -> Result<(), CmdError> {
        let ctl = self.controller()?;
        if self.stopping.swap(true, Ordering::AcqRel) {
            return Err(CmdError::NotFound);
        }

        {
            let st = self.state();
            tracing::debug!(
                koff_cnt = st.koff_cnt,
                clk_enabled = st.clk_enabled,
                rdptr_ticks = st.rdptr_ticks,
                "Stopping command mode"
            );
        }

        let removed = self.remove_all_handlers();
        tracing::debug!(removed, "Vsync handlers removed");

        let need_wait = {
            let st = self.state();
            if st.rdptr_ticks > 0 {
                self.stop_comp.reset();
                true
            } else {
                false
            }
        };
        if need_wait && !self.stop_comp.wait_timeout(self.tunables.stop_timeout) {
            tracing::warn!(
                rdptr_ticks = self.readptr_hold_ticks(),
                "Stop timed out waiting for read pointer after {:?}",
                self.tunables.stop_timeout
            );
        }

        if self.deferred().cancel_clock_off() {
            tracing::debug!("Cancelled pending clock-off");
        }

        {
            let mut st = self.state();
            if st.rdptr_ticks > 0 {
                ctl.hw().irq.unsubscribe(self.rdptr_source());
                st.rdptr_ticks = 0;
            }
            if st.koff_cnt > 0 {
                tracing::warn!(koff_cnt = st.koff_cnt, "Abandoning outstanding kickoff");
                ctl.hw().irq.unsubscribe(self.comp_source());
                st.koff_cnt = 0;
                // Waiters return now instead of timing out after teardown
                self.pp_comp.complete_all();
            }
        }

        self.clock_off(&ctl);
        self.deferred().flush();

        self.teardown(&ctl);

        if let Err(e) = ctl.notify(PanelEvent::Blank) {
            tracing::warn!(intf = ctl.intf_num(), "Blank failed: {}", e);
        }
        if let Err(e) = ctl.notify(PanelEvent::PanelOff) {
            tracing::warn!(intf = ctl.intf_num(), "Panel off failed: {}", e);
        }

        ctl.uninstall(self);
        tracing::info!(ctl = ctl.num(), slot = self.slot, "Command mode stopped");
        Ok(())
    }

    /// Uninstall callbacks, stop the worker, zero state and free the slot
    fn teardown(&self, ctl: &DisplayController) {
        ctl.hw().irq.set_callback(self.rdptr_source(), None);
        ctl.hw().irq.set_callback(self.comp_source(), None);

        self.deferred().shutdown();

        let vsync_clk_held = {
            let mut st = self.state();
            std::mem::take(&mut *st).vsync_clk_held
        };
        if vsync_clk_held {
            ctl.hw().vsync_clock.release();
        }
        self.pp_done_cnt.store(0, Ordering::Release);

        self.pool.release(self.slot);
    }
}
