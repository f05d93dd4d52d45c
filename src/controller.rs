//! Display controller.
//!
//! One controller drives one display path. It owns the collaborator handles,
//! the bound drive surfaces (left/right in a split-panel topology) and the
//! slot where a command-mode session installs its operations.

use crate::cmd::{CmdError, CmdSession, VsyncHandler};
use crate::hw::{
    ClockResource, CtlRegisters, EventSink, HwError, IrqController, Panel, PanelEvent,
    PingPongBlock,
};
use crate::lock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Line count returned when no valid counter can be read
pub const LINE_COUNT_INVALID: u32 = 0xffff;

/// Drive surface position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }
}

/// Collaborators the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    pub events: Arc<dyn EventSink>,
    pub irq: Arc<dyn IrqController>,
    pub ctl_regs: Arc<dyn CtlRegisters>,
    pub panel: Arc<dyn Panel>,
    /// Shared pipeline clock, gated by read-pointer activity
    pub mdp_clock: Arc<dyn ClockResource>,
    /// Dedicated tear-check reference clock
    pub vsync_clock: Arc<dyn ClockResource>,
}

/// Display controller with an optional command-mode session installed
pub struct DisplayController {
    num: u32,
    intf_num: u32,
    panel_ndx: u32,
    hw: Collaborators,
    surfaces: Mutex<[Option<Arc<dyn PingPongBlock>>; 2]>,
    vsync_cnt: AtomicU64,
    cmd: Mutex<Option<Arc<CmdSession>>>,
}

impl DisplayController {
    pub fn new(num: u32, intf_num: u32, panel_ndx: u32, hw: Collaborators) -> Arc<Self> {
        Arc::new(Self {
            num,
            intf_num,
            panel_ndx,
            hw,
            surfaces: Mutex::new([None, None]),
            vsync_cnt: AtomicU64::new(0),
            cmd: Mutex::new(None),
        })
    }

    pub fn num(&self) -> u32 {
        self.num
    }

    pub fn intf_num(&self) -> u32 {
        self.intf_num
    }

    pub fn panel_ndx(&self) -> u32 {
        self.panel_ndx
    }

    pub fn hw(&self) -> &Collaborators {
        &self.hw
    }

    /// Bind a drive surface, replacing any previous one on that side
    pub fn bind_surface(&self, side: Side, block: Arc<dyn PingPongBlock>) {
        tracing::debug!(ctl = self.num, "Binding {:?} surface: pp={}", side, block.num());
        lock(&self.surfaces)[side.index()] = Some(block);
    }

    pub fn unbind_surface(&self, side: Side) -> Option<Arc<dyn PingPongBlock>> {
        lock(&self.surfaces)[side.index()].take()
    }

    pub fn surface(&self, side: Side) -> Option<Arc<dyn PingPongBlock>> {
        lock(&self.surfaces)[side.index()].clone()
    }

    /// Bound surfaces, left first
    pub fn surfaces(&self) -> Vec<Arc<dyn PingPongBlock>> {
        lock(&self.surfaces).iter().flatten().cloned().collect()
    }

    /// Read-pointer events seen since creation
    pub fn vsync_count(&self) -> u64 {
        self.vsync_cnt.load(Ordering::Relaxed)
    }

    pub(crate) fn count_vsync(&self) {
        self.vsync_cnt.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn notify(&self, event: PanelEvent) -> Result<(), HwError> {
        self.hw.events.notify(event)
    }

    /// The installed command-mode session
    pub fn session(&self) -> Result<Arc<CmdSession>, CmdError> {
        lock(&self.cmd).clone().ok_or(CmdError::NotFound)
    }

    pub fn has_session(&self) -> bool {
        lock(&self.cmd).is_some()
    }

    pub(crate) fn install(&self, session: Arc<CmdSession>) -> Result<(), CmdError> {
        let mut slot = lock(&self.cmd);
        if slot.is_some() {
            return Err(CmdError::Configuration(format!(
                "controller {} already has a command-mode session",
                self.num
            )));
        }
        *slot = Some(session);
        Ok(())
    }

    /// Clear the installed session if it is `session`
    pub(crate) fn uninstall(&self, session: &CmdSession) {
        let mut slot = lock(&self.cmd);
        if slot
            .as_ref()
            .is_some_and(|s| std::ptr::eq(Arc::as_ptr(s), session))
        {
            *slot = None;
        }
    }

    /// Arm a transfer of the current frame
    pub fn kickoff(&self) -> Result<(), CmdError> {
        self.session()?.kickoff()
    }

    /// Wait for the outstanding kickoff, optionally flushing frame-done
    /// notifications before returning
    pub fn wait_for_completion(&self, flush_deferred: bool) -> Result<(), CmdError> {
        self.session()?.wait_for_completion(flush_deferred)
    }

    /// Tear down the command-mode session
    pub fn stop(&self) -> Result<(), CmdError> {
        let session = lock(&self.cmd).take().ok_or(CmdError::NotFound)?;
        session.stop()
    }

    pub fn add_vsync_handler(&self, handler: &Arc<VsyncHandler>) -> Result<(), CmdError> {
        self.session()?.add_vsync_handler(handler)
    }

    pub fn remove_vsync_handler(&self, handler: &Arc<VsyncHandler>) -> Result<(), CmdError> {
        self.session()?.remove_vsync_handler(handler)
    }

    /// Current panel line, [`LINE_COUNT_INVALID`] without a session
    pub fn read_line_count(&self) -> u32 {
        match self.session() {
            Ok(session) => session.read_line_count(),
            Err(_) => LINE_COUNT_INVALID,
        }
    }
}
