//! Clock gating for the shared pipeline clock.
//!
//! The clock goes on at every kickoff and when a regular vsync handler
//! subscribes. It goes off only from the deferred worker, once the
//! read-pointer countdown has expired and no kickoff is outstanding. The
//! countdown is re-armed at every `clock_on`, not just on transitions.

use super::session::CmdSession;
use crate::controller::DisplayController;
use crate::hw::PanelEvent;
use crate::lock;

impl CmdSession {
    pub(crate) fn clock_on(&self, ctl: &DisplayController) {
        let _clk = lock(&self.clk_mtx);

        let turn_on = {
            let mut st = self.state();
            tracing::debug!(
                koff_cnt = st.koff_cnt,
                clk_enabled = st.clk_enabled,
                rdptr_ticks = st.rdptr_ticks,
                "Clock on"
            );
            !std::mem::replace(&mut st.clk_enabled, true)
        };

        if turn_on {
            if let Err(e) = ctl.notify(PanelEvent::ClockCtrl(true)) {
                tracing::warn!("Panel clock control on failed: {}", e);
            }
            ctl.hw().mdp_clock.acquire();
        }

        let mut st = self.state();
        if st.rdptr_ticks == 0 {
            ctl.hw().irq.subscribe(self.rdptr_source());
        }
        st.rdptr_ticks = self.tunables.vsync_expire_ticks;
    }

    /// May block on the clock; call from the deferred worker or a caller.
    pub(crate) fn clock_off(&self, ctl: &DisplayController) {
        let _clk = lock(&self.clk_mtx);

        let (enabled, quiet) = {
            let st = self.state();
            tracing::debug!(
                koff_cnt = st.koff_cnt,
                clk_enabled = st.clk_enabled,
                rdptr_ticks = st.rdptr_ticks,
                "Clock off"
            );
            (st.clk_enabled, st.rdptr_ticks == 0 && st.koff_cnt == 0)
        };

        let detached = !ctl.hw().panel.is_attached();
        if !enabled || !(quiet || detached) {
            return;
        }

        self.state().clk_enabled = false;
        if let Err(e) = ctl.notify(PanelEvent::ClockCtrl(false)) {
            tracing::warn!("Panel clock control off failed: {}", e);
        }
        ctl.hw().mdp_clock.release();
    }
}

#[cfg(test)]
mod tests {
    use crate::cmd::testutil::rig;
    use crate::hw::{IrqSource, PanelEvent};

    #[test]
    fn clock_on_acquires_once_and_rearms() {
        let rig = rig();
        let ctl = rig.ctl.clone();

        rig.session.clock_on(&ctl);
        rig.session.clock_on(&ctl);

        assert!(rig.session.clock_enabled());
        assert_eq!(rig.hw.mdp_clock().acquires(), 1);
        assert_eq!(rig.hw.count_events(PanelEvent::ClockCtrl(true)), 1);
        assert_eq!(rig.session.readptr_hold_ticks(), 4);
        assert!(rig.hw.is_subscribed(IrqSource::readptr(rig.session.pp_num())));
    }

    #[test]
    fn clock_off_waits_for_countdown() {
        let rig = rig();
        let ctl = rig.ctl.clone();
        rig.session.clock_on(&ctl);

        rig.session.clock_off(&ctl);
        assert!(rig.session.clock_enabled());
        assert_eq!(rig.hw.mdp_clock().refs(), 1);

        rig.session.state().rdptr_ticks = 0;
        rig.session.clock_off(&ctl);
        assert!(!rig.session.clock_enabled());
        assert_eq!(rig.hw.mdp_clock().refs(), 0);
        assert_eq!(rig.hw.count_events(PanelEvent::ClockCtrl(false)), 1);

        // Already off: nothing more to release
        rig.session.clock_off(&ctl);
        assert_eq!(rig.hw.mdp_clock().releases(), 1);
    }

    #[test]
    fn clock_stays_on_with_outstanding_kickoff() {
        let rig = rig();
        let ctl = rig.ctl.clone();
        rig.session.clock_on(&ctl);
        {
            let mut st = rig.session.state();
            st.rdptr_ticks = 0;
            st.koff_cnt = 1;
        }

        rig.session.clock_off(&ctl);
        assert!(rig.session.clock_enabled());
    }

    #[test]
    fn detached_panel_forces_clock_off() {
        let rig = rig();
        let ctl = rig.ctl.clone();
        rig.session.clock_on(&ctl);
        rig.hw.set_attached(false);

        rig.session.clock_off(&ctl);
        assert!(!rig.session.clock_enabled());
        assert_eq!(rig.hw.mdp_clock().refs(), 0);
    }
}
