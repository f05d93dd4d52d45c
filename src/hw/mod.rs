//! Hardware collaborator interfaces.
//!
//! The engine never touches registers or interrupt lines directly. Everything
//! it needs from the display pipeline goes through the traits in this module:
//! - [`EventSink`]: the controller's external-event interface (panel power,
//!   clock control, frame-done/timeout notifications)
//! - [`IrqController`]: hardware event source subscription and callbacks
//! - [`PingPongBlock`]: the synchronization registers of one drive surface
//! - [`CtlRegisters`]: the control path start/reset registers
//! - [`ClockResource`]: a shared, reference-counted clock
//! - [`Panel`]: timing and attachment state of the physical panel

pub mod sim;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Notifications sent to the controller's external-event interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PanelEvent {
    Unblank,
    PanelOn,
    PanelOff,
    Blank,
    /// Panel clock control, `true` when the clock is being turned on
    ClockCtrl(bool),
    /// Lets the command transmitter push any pending command-mode payload
    CmdListKickoff,
    ContSplashFinish,
    FrameDone,
    FrameTimeout,
}

/// Collaborator errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HwError {
    #[error("event {event:?} failed: {reason}")]
    EventFailed { event: PanelEvent, reason: String },

    #[error("clock {0} unavailable")]
    ClockUnavailable(&'static str),
}

/// Interrupt line classes used by command mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrqKind {
    /// Ping-pong transfer complete
    PingPongComp,
    /// Panel read pointer reached the configured line
    PingPongRdPtr,
}

/// One interrupt source: a line class on a specific ping-pong unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IrqSource {
    pub kind: IrqKind,
    pub unit: u32,
}

impl IrqSource {
    pub fn completion(unit: u32) -> Self {
        Self {
            kind: IrqKind::PingPongComp,
            unit,
        }
    }

    pub fn readptr(unit: u32) -> Self {
        Self {
            kind: IrqKind::PingPongRdPtr,
            unit,
        }
    }
}

/// Interrupt callback.
///
/// Runs in the hardware-event context: it must not block.
pub type IrqCallback = Arc<dyn Fn() + Send + Sync>;

/// Named synchronization fields of a ping-pong block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncReg {
    /// Counter enable, vsync input enable and vsync clocks per line
    SyncConfigVsync,
    /// Counter wrap height
    SyncConfigHeight,
    VsyncInitVal,
    /// Line that raises the read-pointer interrupt
    RdPtrIrq,
    StartPos,
    /// `(continue << 16) | start`
    SyncThresh,
    TearCheckEn,
    /// Live line counter (read only)
    IntCountVal,
}

/// Controller external-event interface
pub trait EventSink: Send + Sync {
    fn notify(&self, event: PanelEvent) -> Result<(), HwError>;
}

/// Hardware event source subscription.
///
/// `subscribe`/`unsubscribe` must be callable from the hardware-event context.
pub trait IrqController: Send + Sync {
    fn subscribe(&self, source: IrqSource);
    fn unsubscribe(&self, source: IrqSource);
    fn set_callback(&self, source: IrqSource, callback: Option<IrqCallback>);
}

/// Register access to one drive surface
pub trait PingPongBlock: Send + Sync {
    /// Ping-pong unit number, used to address its interrupt sources
    fn num(&self) -> u32;

    fn read(&self, reg: SyncReg) -> u32;

    fn write(&self, reg: SyncReg, value: u32);

    /// Apply a set of writes as one unit.
    ///
    /// Implementations backed by real hardware must make sure the block
    /// never observes a partial configuration.
    fn write_sync_config(&self, writes: &[(SyncReg, u32)]) {
        for &(reg, value) in writes {
            self.write(reg, value);
        }
    }
}

/// Control path registers
pub trait CtlRegisters: Send + Sync {
    /// Write the start register, launching a transfer
    fn start(&self);

    /// Reset the control path after a lost completion
    fn reset(&self);
}

/// Shared clock with demand-based acquisition.
///
/// Several sessions may hold the same clock; implementations count
/// references and only gate the clock when the last holder releases it.
pub trait ClockResource: Send + Sync {
    /// May block while the clock powers up
    fn acquire(&self);

    /// May block while the clock powers down
    fn release(&self);

    /// Current rate in Hz, 0 when unknown
    fn current_rate(&self) -> u32;
}

/// Physical panel state
pub trait Panel: Send + Sync {
    fn timing(&self) -> PanelTiming;

    fn is_attached(&self) -> bool;

    /// Whether a command transfer is currently in flight
    fn cmd_busy(&self) -> bool;

    /// Mark the boot-time continuous splash as handed over
    fn clear_cont_splash(&self);
}

/// Vertical timing of a command-mode panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelTiming {
    /// Vertical resolution in lines
    pub yres: u16,
    #[serde(default)]
    pub v_back_porch: u16,
    #[serde(default)]
    pub v_front_porch: u16,
    #[serde(default)]
    pub v_pulse_width: u16,
    /// Refresh rate in Hz
    pub frame_rate: u32,
    /// Tear-check requested for this panel
    #[serde(default)]
    pub vsync_enable: bool,
    /// Panel drives an external TE (vsync) line
    #[serde(default)]
    pub hw_vsync_mode: bool,
}

impl PanelTiming {
    /// Sum of back porch, front porch and pulse width
    pub fn vporch(&self) -> u16 {
        self.v_back_porch
            .saturating_add(self.v_front_porch)
            .saturating_add(self.v_pulse_width)
    }
}

impl Default for PanelTiming {
    fn default() -> Self {
        Self {
            yres: 1920,
            v_back_porch: 20,
            v_front_porch: 16,
            v_pulse_width: 4,
            frame_rate: 60,
            vsync_enable: true,
            hw_vsync_mode: true,
        }
    }
}
