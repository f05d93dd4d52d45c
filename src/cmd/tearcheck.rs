//! Tear-check configuration.
//!
//! The ping-pong block counts vsync clock ticks to follow the panel's read
//! pointer. A new transfer may only start in the window just after the read
//! pointer passes the configured line.
//!
//! Register layout:
//! - `SYNC_CONFIG_VSYNC`: bit 19 counter enable, bit 20 external vsync input,
//!   low bits vsync clocks per line
//! - `SYNC_CONFIG_HEIGHT`: counter wrap height
//! - `VSYNC_INIT_VAL` / `START_POS`: panel height
//! - `RD_PTR_IRQ`: panel height + 1
//! - `SYNC_THRESH`: `(continue << 16) | start`

use super::session::CmdSession;
use super::CmdError;
use crate::controller::{DisplayController, Side, LINE_COUNT_INVALID};
use crate::hw::{PanelTiming, SyncReg};

const VSYNC_COUNTER_EN: u32 = 1 << 19;
const VSYNC_IN_EN: u32 = 1 << 20;

/// Counter wrap height, above any real panel
pub const SYNC_HEIGHT: u32 = 0xfff0;

/// Parameters derived from panel timing and the vsync clock rate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TearcheckParams {
    /// Panel drives the external vsync input
    pub tear_check: bool,
    pub height: u16,
    pub vporch: u16,
    pub start_threshold: u16,
    pub continue_threshold: u16,
    /// Vsync clock ticks per panel line
    pub vclk_line: u32,
}

impl TearcheckParams {
    pub fn derive(
        timing: &PanelTiming,
        vsync_clk_hz: u32,
        start_threshold: u16,
        continue_threshold: u16,
    ) -> Result<Self, CmdError> {
        if vsync_clk_hz == 0 {
            return Err(CmdError::Configuration(
                "vsync clock rate reads as zero".to_string(),
            ));
        }

        let vporch = timing.vporch();
        let total_lines = (u32::from(timing.yres) + u32::from(vporch))
            .checked_mul(timing.frame_rate)
            .filter(|&lines| lines > 0)
            .ok_or_else(|| {
                CmdError::Configuration(format!(
                    "invalid panel timing: yres={} vporch={} fr={}",
                    timing.yres, vporch, timing.frame_rate
                ))
            })?;

        Ok(Self {
            tear_check: timing.hw_vsync_mode,
            height: timing.yres,
            vporch,
            start_threshold,
            continue_threshold,
            vclk_line: vsync_clk_hz / total_lines,
        })
    }

    /// Register writes for one drive surface, applied as a unit.
    ///
    /// The enable bit is only included when the board latches it.
    pub fn sync_config(&self, enable: bool, latch_enable: bool) -> Vec<(SyncReg, u32)> {
        let mut cfg = VSYNC_COUNTER_EN;
        if self.tear_check {
            cfg |= VSYNC_IN_EN;
        }
        cfg |= self.vclk_line;

        let height = u32::from(self.height);
        let mut writes = vec![
            (SyncReg::SyncConfigVsync, cfg),
            (SyncReg::SyncConfigHeight, SYNC_HEIGHT),
            (SyncReg::VsyncInitVal, height),
            (SyncReg::RdPtrIrq, height + 1),
            (SyncReg::StartPos, height),
            (
                SyncReg::SyncThresh,
                (u32::from(self.continue_threshold) << 16) | u32::from(self.start_threshold),
            ),
        ];
        if latch_enable {
            writes.push((SyncReg::TearCheckEn, u32::from(enable)));
        }
        writes
    }
}

/// Derive (when enabling) and program tear-check on every bound surface
pub(super) fn setup(
    session: &CmdSession,
    ctl: &DisplayController,
    enable: bool,
) -> Result<(), CmdError> {
    let timing = ctl.hw().panel.timing();
    let tunables = session.tunables();

    let enable = timing.vsync_enable && enable;
    if enable {
        let newly_held = !std::mem::replace(&mut session.state().vsync_clk_held, true);
        if newly_held {
            ctl.hw().vsync_clock.acquire();
        }

        let rate = ctl.hw().vsync_clock.current_rate();
        tracing::debug!("vsync_clk_rate={}", rate);
        if rate == 0 {
            tracing::error!("Can't get vsync clock speed");
        }

        let params = TearcheckParams::derive(
            &timing,
            rate,
            tunables.start_threshold,
            tunables.continue_threshold,
        )?;
        tracing::debug!(
            "fr={} vcnt={} thold={} vrate={}",
            timing.frame_rate,
            params.vclk_line,
            params.start_threshold,
            rate
        );
        session.state().tearcheck = params;
    }

    let params = session.state().tearcheck;
    let writes = params.sync_config(enable, tunables.capabilities.latch_tear_check_enable);
    for block in ctl.surfaces() {
        block.write_sync_config(&writes);
    }

    Ok(())
}

/// Lines scanned since the read-pointer line, from the first bound surface
pub(crate) fn read_line_count(ctl: &DisplayController) -> u32 {
    let Some(block) = ctl.surface(Side::Left).or_else(|| ctl.surface(Side::Right)) else {
        return LINE_COUNT_INVALID;
    };

    let clock = &ctl.hw().mdp_clock;
    clock.acquire();

    let init = block.read(SyncReg::VsyncInitVal) & 0xffff;
    let height = block.read(SyncReg::SyncConfigHeight) & 0xffff;

    let cnt = if height < init {
        LINE_COUNT_INVALID
    } else {
        let raw = block.read(SyncReg::IntCountVal) & 0xffff;
        if raw < init {
            // Wrapped at height
            raw + (height - init)
        } else {
            raw - init
        }
    };

    clock.release();
    tracing::debug!("cnt={} init={} height={}", cnt, init, height);
    cnt
}
