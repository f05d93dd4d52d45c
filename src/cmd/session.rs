//! Kickoff/completion state machine.
//!
//! Per transfer a session moves Armed (kickoff issued, one outstanding
//! kickoff) -> Completed (ping-pong done, counter back to zero) and then is
//! armed again or stopped.
//!
//! All fields touched from the hardware-event path live in [`SyncState`]
//! behind the short state lock. That lock is never held across anything that
//! can block.

use super::completion::Completion;
use super::deferred::{DeferredQueue, ScheduleOutcome};
use super::tearcheck::{self, TearcheckParams};
use super::vsync::{self, Delivery, VsyncHandler};
use super::{CmdError, SessionPool};
use crate::config::Tunables;
use crate::controller::DisplayController;
use crate::hw::{IrqSource, PanelEvent};
use crate::lock;
use serde::Serialize;
use std::sync::atomic::{fence, AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;

/// Session counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub kickoffs: u64,
    pub completions: u64,
    /// Completions with no outstanding kickoff
    pub spurious_completions: u64,
    /// Completions that found more than one outstanding kickoff
    pub kickoff_overruns: u64,
    pub timeouts: u64,
    pub clock_off_scheduled: u64,
    pub clock_off_runs: u64,
    pub frame_done_delivered: u64,
    pub readptr_events: u64,
}

/// State guarded by the short lock
#[derive(Debug, Default)]
pub(super) struct SyncState {
    /// Cleared once the session is stopped and its slot returned
    pub(super) leased: bool,
    pub(super) panel_on: bool,
    pub(super) koff_cnt: u32,
    pub(super) clk_enabled: bool,
    /// A regular vsync handler is subscribed
    pub(super) vsync_enabled: bool,
    /// Debounce countdown; non-zero while the read-pointer source is subscribed
    pub(super) rdptr_ticks: u32,
    pub(super) vsync_clk_held: bool,
    pub(super) tearcheck: TearcheckParams,
    pub(super) handlers: Vec<Arc<VsyncHandler>>,
    pub(super) stats: SessionStats,
}

/// One leased command-mode session
pub struct CmdSession {
    pub(super) slot: usize,
    pub(super) pp_num: u32,
    pub(super) panel_ndx: u32,
    pub(super) ctl: Weak<DisplayController>,
    pub(super) pool: Arc<SessionPool>,
    pub(super) tunables: Tunables,
    pub(super) state: Mutex<SyncState>,
    /// Serializes clock transitions; never taken from the hardware-event path
    pub(super) clk_mtx: Mutex<()>,
    pub(super) pp_comp: Completion,
    pub(super) stop_comp: Completion,
    pub(super) pp_done_cnt: AtomicU32,
    pub(super) stopping: AtomicBool,
    deferred: DeferredQueue,
}

impl std::fmt::Debug for CmdSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CmdSession")
            .field("slot", &self.slot)
            .field("pp_num", &self.pp_num)
            .field("panel_ndx", &self.panel_ndx)
            .finish_non_exhaustive()
    }
}

impl CmdSession {
    pub(super) fn new(
        slot: usize,
        ctl: &Arc<DisplayController>,
        pp_num: u32,
        pool: Arc<SessionPool>,
    ) -> Self {
        let tunables = *pool.tunables();
        Self {
            slot,
            pp_num,
            panel_ndx: ctl.panel_ndx(),
            ctl: Arc::downgrade(ctl),
            pool,
            tunables,
            state: Mutex::new(SyncState {
                leased: true,
                ..SyncState::default()
            }),
            clk_mtx: Mutex::new(()),
            pp_comp: Completion::new(),
            stop_comp: Completion::new(),
            pp_done_cnt: AtomicU32::new(0),
            stopping: AtomicBool::new(false),
            deferred: DeferredQueue::new(tunables.deferred_queue_depth),
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn pp_num(&self) -> u32 {
        self.pp_num
    }

    pub fn panel_ndx(&self) -> u32 {
        self.panel_ndx
    }

    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    pub(super) fn deferred(&self) -> &DeferredQueue {
        &self.deferred
    }

    pub(super) fn state(&self) -> MutexGuard<'_, SyncState> {
        lock(&self.state)
    }

    pub(super) fn comp_source(&self) -> IrqSource {
        IrqSource::completion(self.pp_num)
    }

    pub(super) fn rdptr_source(&self) -> IrqSource {
        IrqSource::readptr(self.pp_num)
    }

    /// The owning controller, or `NotFound` once stopped
    pub(super) fn controller(&self) -> Result<Arc<DisplayController>, CmdError> {
        if !self.state().leased {
            return Err(CmdError::NotFound);
        }
        self.ctl.upgrade().ok_or(CmdError::NotFound)
    }

    pub fn is_active(&self) -> bool {
        self.state().leased
    }

    pub fn stats(&self) -> SessionStats {
        self.state().stats
    }

    pub fn outstanding_kickoffs(&self) -> u32 {
        self.state().koff_cnt
    }

    pub fn clock_enabled(&self) -> bool {
        self.state().clk_enabled
    }

    pub fn readptr_refresh_enabled(&self) -> bool {
        self.state().vsync_enabled
    }

    pub fn readptr_hold_ticks(&self) -> u32 {
        self.state().rdptr_ticks
    }

    pub fn pending_notify_count(&self) -> u32 {
        self.pp_done_cnt.load(Ordering::Acquire)
    }

    pub fn tearcheck_params(&self) -> TearcheckParams {
        self.state().tearcheck
    }

    pub fn handler_count(&self) -> usize {
        self.state().handlers.len()
    }

    /// Arm a transfer of the current frame.
    ///
    /// The first kickoff after start unblanks and powers on the panel. With
    /// no panel attached this returns `Ok` without touching the hardware.
    pub fn kickoff(&self) -> Result<(), CmdError> {
        let ctl = self.controller()?;

        let panel_on = self.state().panel_on;
        if !panel_on {
            if let Err(e) = ctl.notify(PanelEvent::Unblank) {
                tracing::warn!(intf = ctl.intf_num(), "Unblank failed: {}", e);
            }

            if !ctl.hw().panel.is_attached() {
                tracing::error!(intf = ctl.intf_num(), "Panel is not attached, skipping kickoff");
                return Ok(());
            }

            self.state().panel_on = true;

            if let Err(e) = ctl.notify(PanelEvent::PanelOn) {
                tracing::warn!(intf = ctl.intf_num(), "Panel on failed: {}", e);
            }
        }

        if let Err(e) = ctl.notify(PanelEvent::CmdListKickoff) {
            tracing::debug!("Command list kickoff: {}", e);
        }

        self.clock_on(&ctl);

        self.pp_comp.reset();
        ctl.hw().irq.subscribe(self.comp_source());

        // Counted before the start write: the completion may fire inside it
        {
            let mut st = self.state();
            st.koff_cnt += 1;
            st.stats.kickoffs += 1;
            tracing::debug!(
                koff_cnt = st.koff_cnt,
                clk_enabled = st.clk_enabled,
                rdptr_ticks = st.rdptr_ticks,
                "Kickoff armed: ctl={} pp={}",
                ctl.num(),
                self.pp_num
            );
        }

        ctl.hw().ctl_regs.start();
        fence(Ordering::SeqCst);

        Ok(())
    }

    /// Ping-pong completion. Runs in the hardware-event context.
    pub fn on_completion(&self) {
        let Some(ctl) = self.ctl.upgrade() else {
            tracing::error!(pp = self.pp_num, "Completion without controller");
            return;
        };

        let handlers = {
            let st = self.state();
            if !st.leased {
                return;
            }
            st.handlers.clone()
        };
        vsync::deliver(&handlers, Delivery::PostFlush, &ctl, Instant::now());

        let mut st = self.state();
        ctl.hw().irq.unsubscribe(self.comp_source());
        self.pp_comp.complete_all();

        if st.koff_cnt == 0 {
            st.stats.spurious_completions += 1;
            tracing::error!(pp = self.pp_num, "Ping-pong completion without a kickoff");
            return;
        }

        st.stats.completions += 1;
        self.pp_done_cnt.fetch_add(1, Ordering::AcqRel);
        match self.deferred.schedule_frame_done() {
            ScheduleOutcome::Queued | ScheduleOutcome::AlreadyPending => {}
            outcome => tracing::error!("Frame-done work not queued: {:?}", outcome),
        }

        st.koff_cnt -= 1;
        if st.koff_cnt > 0 {
            tracing::error!(koff_cnt = st.koff_cnt, "Too many kickoffs outstanding, clamping");
            st.stats.kickoff_overruns += 1;
            st.koff_cnt = 0;
        }

        tracing::debug!(
            koff_cnt = st.koff_cnt,
            "Ping-pong done: ctl={} intf={} pp={}",
            ctl.num(),
            ctl.intf_num(),
            self.pp_num
        );
    }

    /// Wait for the outstanding kickoff to complete.
    ///
    /// Times out after the revision-dependent ping-pong bound, reports
    /// `FrameTimeout` to the controller and returns [`CmdError::Timeout`].
    /// The transfer stays armed; retrying is up to the caller. With
    /// `flush_deferred` the call also waits until queued frame-done
    /// notifications have been delivered.
    pub fn wait_for_completion(&self, flush_deferred: bool) -> Result<(), CmdError> {
        let ctl = self.controller()?;

        let need_wait = self.state().koff_cnt > 0;
        tracing::debug!(need_wait, intf = ctl.intf_num(), "Waiting for ping-pong");

        let mut result = Ok(());
        if need_wait {
            let caps = self.tunables.capabilities;
            if !self.pp_comp.wait_timeout(caps.pingpong_timeout) {
                let koff_cnt = {
                    let mut st = self.state();
                    st.stats.timeouts += 1;
                    st.koff_cnt
                };
                tracing::warn!(
                    koff_cnt,
                    revision = caps.revision,
                    ctl = ctl.num(),
                    "Command kickoff timed out after {:?}",
                    caps.pingpong_timeout
                );
                if let Err(e) = ctl.notify(PanelEvent::FrameTimeout) {
                    tracing::warn!("Frame timeout notification failed: {}", e);
                }
                result = Err(CmdError::Timeout {
                    what: "ping-pong completion",
                    timeout: caps.pingpong_timeout,
                });
            }
        }

        if flush_deferred {
            self.deferred.flush();
        }

        result
    }

    /// Read-pointer event. Runs in the hardware-event context.
    pub fn on_readptr_event(&self) {
        let Some(ctl) = self.ctl.upgrade() else {
            tracing::error!(pp = self.pp_num, "Read pointer without controller");
            return;
        };
        let now = Instant::now();
        ctl.count_vsync();

        let handlers = {
            let mut st = self.state();
            if !st.leased {
                return;
            }
            st.stats.readptr_events += 1;
            st.handlers.clone()
        };
        vsync::deliver(&handlers, Delivery::Regular, &ctl, now);

        // Never count down while a command transfer is in flight
        if ctl.hw().panel.cmd_busy() {
            return;
        }

        let mut st = self.state();
        if !st.vsync_enabled && st.rdptr_ticks > 0 {
            st.rdptr_ticks -= 1;
        }

        if st.rdptr_ticks == 0 {
            ctl.hw().irq.unsubscribe(self.rdptr_source());
            self.stop_comp.complete_all();
            match self.deferred.schedule_clock_off() {
                ScheduleOutcome::Queued => st.stats.clock_off_scheduled += 1,
                ScheduleOutcome::AlreadyPending => {}
                outcome => tracing::error!("Clock-off work not queued: {:?}", outcome),
            }
        }
    }

    /// Deliver queued frame-done notifications. Deferred context.
    pub(super) fn frame_done_work(&self) {
        let Some(ctl) = self.ctl.upgrade() else {
            return;
        };

        while self
            .pp_done_cnt
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
        {
            if let Err(e) = ctl.notify(PanelEvent::FrameDone) {
                tracing::warn!("Frame done notification failed: {}", e);
            }
            self.state().stats.frame_done_delivered += 1;
        }
    }

    /// Deferred clock-off. Deferred context.
    pub(super) fn clock_off_work(&self) {
        let Some(ctl) = self.ctl.upgrade() else {
            return;
        };
        self.state().stats.clock_off_runs += 1;
        self.clock_off(&ctl);
    }

    /// Reprogram tear-check, e.g. after a panel mode change
    pub fn set_tearcheck(&self, enable: bool) -> Result<(), CmdError> {
        let ctl = self.controller()?;
        tearcheck::setup(self, &ctl, enable)
    }

    /// Current panel line, or [`LINE_COUNT_INVALID`](crate::LINE_COUNT_INVALID)
    pub fn read_line_count(&self) -> u32 {
        match self.controller() {
            Ok(ctl) => tearcheck::read_line_count(&ctl),
            Err(_) => crate::LINE_COUNT_INVALID,
        }
    }

    /// Hand the pipeline over from the boot-time continuous splash.
    ///
    /// Drops the clock reference the splash left behind.
    pub fn reconfigure_splash_done(&self) -> Result<(), CmdError> {
        let ctl = self.controller()?;
        ctl.hw().panel.clear_cont_splash();

        let result = ctl.notify(PanelEvent::ContSplashFinish);

        if let Err(e) = ctl.notify(PanelEvent::ClockCtrl(false)) {
            tracing::warn!("Clock control off failed: {}", e);
        }
        ctl.hw().mdp_clock.release();

        tracing::info!(ctl = ctl.num(), "Continuous splash handed over");
        result.map_err(CmdError::from)
    }

    /// Abandon a lost transfer: reset the control path and release waiters.
    ///
    /// Returns `true` if a kickoff was outstanding.
    pub fn recover_kickoff(&self) -> bool {
        let Some(ctl) = self.ctl.upgrade() else {
            return false;
        };

        let mut st = self.state();
        if !st.leased || st.koff_cnt == 0 {
            return false;
        }

        ctl.hw().ctl_regs.reset();
        st.koff_cnt -= 1;
        ctl.hw().irq.unsubscribe(self.comp_source());
        self.pp_comp.complete_all();
        tracing::info!(koff_cnt = st.koff_cnt, intf = ctl.intf_num(), "Recovered after kickoff");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::testutil::{rig, rig_with, Rig};
    use crate::config::Tunables;
    use crate::hw::IrqKind;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    fn complete(rig: &Rig) -> bool {
        rig.hw.fire(IrqSource::completion(rig.session.pp_num()))
    }

    #[test]
    fn first_kickoff_powers_panel_and_arms() {
        let rig = rig();
        rig.session.kickoff().unwrap();

        assert_eq!(
            rig.hw.events(),
            vec![
                PanelEvent::Unblank,
                PanelEvent::PanelOn,
                PanelEvent::CmdListKickoff,
                PanelEvent::ClockCtrl(true),
            ]
        );
        assert_eq!(rig.hw.starts(), 1);
        assert_eq!(rig.session.outstanding_kickoffs(), 1);
        assert!(rig.session.clock_enabled());
        assert!(rig.hw.is_subscribed(IrqSource::completion(rig.session.pp_num())));
        assert!(rig.hw.is_subscribed(IrqSource::readptr(rig.session.pp_num())));

        rig.hw.clear_events();
        assert!(complete(&rig));
        rig.session.kickoff().unwrap();
        assert_eq!(rig.hw.events(), vec![PanelEvent::CmdListKickoff]);
    }

    #[test]
    fn kickoff_without_panel_does_not_arm() {
        let rig = rig();
        rig.hw.set_attached(false);

        rig.session.kickoff().unwrap();

        assert_eq!(rig.hw.events(), vec![PanelEvent::Unblank]);
        assert_eq!(rig.hw.starts(), 0);
        assert_eq!(rig.session.outstanding_kickoffs(), 0);
    }

    #[test]
    fn completion_queues_frame_done() {
        let rig = rig();
        rig.session.kickoff().unwrap();
        assert!(complete(&rig));

        assert_eq!(rig.session.outstanding_kickoffs(), 0);
        assert!(!rig.hw.is_subscribed(IrqSource::completion(rig.session.pp_num())));

        rig.session.wait_for_completion(true).unwrap();
        assert_eq!(rig.hw.count_events(PanelEvent::FrameDone), 1);
        assert_eq!(rig.session.pending_notify_count(), 0);

        let stats = rig.session.stats();
        assert_eq!(stats.completions, 1);
        assert_eq!(stats.frame_done_delivered, 1);
    }

    #[test]
    fn double_kickoff_is_clamped_once() {
        let rig = rig();
        rig.session.kickoff().unwrap();
        rig.session.kickoff().unwrap();
        assert_eq!(rig.session.outstanding_kickoffs(), 2);

        assert!(complete(&rig));

        assert_eq!(rig.session.outstanding_kickoffs(), 0);
        let stats = rig.session.stats();
        assert_eq!(stats.kickoff_overruns, 1);
        assert_eq!(stats.completions, 1);

        rig.session.wait_for_completion(true).unwrap();
        assert_eq!(rig.hw.count_events(PanelEvent::FrameDone), 1);
    }

    #[test]
    fn spurious_completion_is_ignored() {
        let rig = rig();
        rig.session.on_completion();

        let stats = rig.session.stats();
        assert_eq!(stats.spurious_completions, 1);
        assert_eq!(stats.completions, 0);
        assert_eq!(rig.session.outstanding_kickoffs(), 0);
        assert_eq!(rig.session.pending_notify_count(), 0);
    }

    #[test]
    fn wait_without_kickoff_returns_immediately() {
        let rig = rig();
        rig.session.wait_for_completion(false).unwrap();
        assert_eq!(rig.hw.count_events(PanelEvent::FrameTimeout), 0);
    }

    fn wait_succeeds_before_bound(revision: u8) {
        let rig = rig_with(crate::cmd::testutil::tunables(revision));
        rig.session.kickoff().unwrap();

        let hw = Arc::clone(&rig.hw);
        let pp = rig.session.pp_num();
        let firer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(2));
            hw.fire(IrqSource::completion(pp));
        });

        rig.session.wait_for_completion(false).unwrap();
        firer.join().unwrap();
        assert_eq!(rig.hw.count_events(PanelEvent::FrameTimeout), 0);
    }

    fn wait_times_out(revision: u8, bound: Duration) {
        let rig = rig_with(crate::cmd::testutil::tunables(revision));
        rig.session.kickoff().unwrap();

        let start = Instant::now();
        let err = rig.session.wait_for_completion(false).unwrap_err();

        assert!(start.elapsed() >= bound);
        assert!(matches!(err, CmdError::Timeout { timeout, .. } if timeout == bound));
        assert_eq!(rig.hw.count_events(PanelEvent::FrameTimeout), 1);
        assert_eq!(rig.session.stats().timeouts, 1);
        // Still armed: a late completion is accepted
        assert_eq!(rig.session.outstanding_kickoffs(), 1);
        assert!(complete(&rig));
        assert_eq!(rig.session.outstanding_kickoffs(), 0);
    }

    #[test]
    fn wait_succeeds_current_revision() {
        wait_succeeds_before_bound(3);
    }

    #[test]
    fn wait_succeeds_old_revision() {
        wait_succeeds_before_bound(2);
    }

    #[test]
    fn wait_times_out_current_revision() {
        wait_times_out(3, Duration::from_millis(150));
    }

    #[test]
    fn wait_times_out_old_revision() {
        wait_times_out(2, Duration::from_millis(20));
    }

    #[test]
    fn readptr_countdown_schedules_clock_off_once() {
        let rig = rig();
        rig.session.kickoff().unwrap();
        assert!(complete(&rig));
        rig.session.wait_for_completion(true).unwrap();

        // Hold the clock lock so the deferred clock-off cannot finish yet
        let guard = lock(&rig.session.clk_mtx);
        for _ in 0..6 {
            rig.hw.fire_kind(IrqKind::PingPongRdPtr);
        }

        assert_eq!(rig.session.readptr_hold_ticks(), 0);
        assert!(!rig.hw.is_subscribed(IrqSource::readptr(rig.session.pp_num())));
        assert_eq!(rig.session.stats().clock_off_scheduled, 1);
        assert_eq!(rig.session.stats().readptr_events, 4);
        assert!(rig.session.clock_enabled());

        drop(guard);
        rig.session.deferred().flush();

        assert!(!rig.session.clock_enabled());
        assert_eq!(rig.session.stats().clock_off_runs, 1);
        assert_eq!(rig.hw.count_events(PanelEvent::ClockCtrl(false)), 1);
        assert_eq!(rig.hw.mdp_clock().refs(), 0);
    }

    #[test]
    fn busy_command_holds_countdown() {
        let rig = rig();
        rig.session.kickoff().unwrap();
        assert!(complete(&rig));

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let handler = VsyncHandler::regular(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        rig.session.add_vsync_handler(&handler).unwrap();

        rig.hw.set_busy(true);
        for _ in 0..8 {
            rig.hw.fire_kind(IrqKind::PingPongRdPtr);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 8);
        assert_eq!(rig.session.readptr_hold_ticks(), 4);
        assert_eq!(rig.session.stats().clock_off_scheduled, 0);

        rig.session.remove_vsync_handler(&handler).unwrap();
        rig.hw.set_busy(false);
        rig.hw.fire_kind(IrqKind::PingPongRdPtr);
        assert_eq!(hits.load(Ordering::SeqCst), 8);
        assert_eq!(rig.session.readptr_hold_ticks(), 3);
    }

    #[test]
    fn kickoff_rearms_countdown() {
        let rig = rig();
        rig.session.kickoff().unwrap();
        assert!(complete(&rig));

        rig.hw.fire_kind(IrqKind::PingPongRdPtr);
        rig.hw.fire_kind(IrqKind::PingPongRdPtr);
        assert_eq!(rig.session.readptr_hold_ticks(), 2);

        rig.session.kickoff().unwrap();
        assert_eq!(rig.session.readptr_hold_ticks(), 4);
        assert_eq!(rig.hw.count_events(PanelEvent::ClockCtrl(true)), 1);
    }

    #[test]
    fn post_flush_handler_sees_completion_only() {
        let rig = rig();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let handler = VsyncHandler::post_flush(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        rig.session.add_vsync_handler(&handler).unwrap();

        rig.session.kickoff().unwrap();
        rig.hw.fire_kind(IrqKind::PingPongRdPtr);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        assert!(complete(&rig));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn recover_releases_lost_kickoff() {
        let rig = rig();
        rig.session.kickoff().unwrap();

        assert!(rig.session.recover_kickoff());
        assert_eq!(rig.hw.resets(), 1);
        assert_eq!(rig.session.outstanding_kickoffs(), 0);
        rig.session.wait_for_completion(false).unwrap();
        assert!(!rig.session.recover_kickoff());
    }

    #[test]
    fn splash_handover_drops_boot_clock() {
        let rig = rig();
        rig.hw.set_cont_splash(true);
        assert_eq!(rig.hw.mdp_clock().refs(), 1);

        rig.session.reconfigure_splash_done().unwrap();

        assert!(!rig.hw.cont_splash());
        assert_eq!(rig.hw.mdp_clock().refs(), 0);
        assert_eq!(
            rig.hw.events(),
            vec![PanelEvent::ContSplashFinish, PanelEvent::ClockCtrl(false)]
        );
    }

    #[test]
    fn rejected_splash_finish_still_drops_boot_clock() {
        let rig = rig();
        rig.hw.set_cont_splash(true);
        rig.hw.fail_event(PanelEvent::ContSplashFinish);

        let err = rig.session.reconfigure_splash_done().unwrap_err();

        assert!(matches!(err, CmdError::Hw(_)));
        assert!(!rig.hw.cont_splash());
        assert_eq!(rig.hw.mdp_clock().refs(), 0);
    }

    #[test]
    fn failed_panel_on_still_arms_kickoff() {
        let rig = rig();
        rig.hw.fail_event(PanelEvent::PanelOn);

        rig.session.kickoff().unwrap();

        assert_eq!(rig.session.outstanding_kickoffs(), 1);
        assert_eq!(rig.hw.starts(), 1);
    }

    #[test]
    fn completion_inside_start_write_is_not_spurious() {
        let rig = rig();
        rig.hw.set_auto_complete(Some(Duration::ZERO));

        rig.session.kickoff().unwrap();

        let stats = rig.session.stats();
        assert_eq!(stats.completions, 1);
        assert_eq!(stats.spurious_completions, 0);
        assert_eq!(rig.session.outstanding_kickoffs(), 0);
        rig.session.wait_for_completion(true).unwrap();
        assert_eq!(rig.hw.count_events(PanelEvent::FrameDone), 1);
    }

    #[test]
    fn default_tunables_match_reference_hardware() {
        let t = Tunables::default();
        assert_eq!(t.vsync_expire_ticks, 4);
        assert_eq!(t.max_sessions, 2);
    }
}
