//! Shared fixtures for engine tests.

use super::{CmdSession, SessionPool};
use crate::config::{Capabilities, Config, Tunables};
use crate::controller::{DisplayController, Side};
use crate::hw::sim::SimHardware;
use crate::hw::PanelTiming;
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct Rig {
    pub hw: Arc<SimHardware>,
    pub ctl: Arc<DisplayController>,
    pub pool: Arc<SessionPool>,
    pub session: Arc<CmdSession>,
}

pub(crate) fn tunables(revision: u8) -> Tunables {
    Tunables {
        capabilities: Capabilities::from_revision(revision),
        stop_timeout: Duration::from_millis(200),
        ..Config::default().tunables()
    }
}

/// Reference 1920-line panel on ping-pong 0, session started
pub(crate) fn rig() -> Rig {
    rig_with(tunables(3))
}

pub(crate) fn rig_with(tunables: Tunables) -> Rig {
    let hw = SimHardware::new(PanelTiming::default(), 19_200_000);
    let ctl = DisplayController::new(0, 1, 0, hw.collaborators());
    ctl.bind_surface(Side::Left, hw.pingpong(0));

    let pool = SessionPool::with_tunables(tunables);
    let session = pool.start(&ctl).expect("session start");

    Rig {
        hw,
        ctl,
        pool,
        session,
    }
}
