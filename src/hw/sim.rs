//! Simulated command-mode panel.
//!
//! Implements every collaborator trait in software so the engine can run
//! without a display pipeline:
//! - Interrupt sources fire only while subscribed, like a masked IRQ line
//! - Register writes are recorded per ping-pong unit
//! - Notifications are recorded in order
//! - Clocks keep a reference count
//!
//! A kickoff can optionally complete on its own after a fixed latency, and a
//! [`RefreshTicker`] fires the read-pointer interrupt at the panel refresh
//! cadence.

use super::{
    ClockResource, CtlRegisters, EventSink, HwError, IrqCallback, IrqController, IrqKind,
    IrqSource, Panel, PanelEvent, PanelTiming, PingPongBlock, SyncReg,
};
use crate::controller::Collaborators;
use crate::lock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Software clock with a reference count
#[derive(Debug)]
pub struct SimClock {
    name: &'static str,
    rate: AtomicU32,
    refs: AtomicUsize,
    acquires: AtomicUsize,
    releases: AtomicUsize,
}

impl SimClock {
    pub fn new(name: &'static str, rate: u32) -> Self {
        Self {
            name,
            rate: AtomicU32::new(rate),
            refs: AtomicUsize::new(0),
            acquires: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    pub fn set_rate(&self, rate: u32) {
        self.rate.store(rate, Ordering::SeqCst);
    }

    /// Outstanding references
    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }

    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Start with a reference already held, as left behind by a boot splash
    fn preload(&self) {
        self.refs.store(1, Ordering::SeqCst);
    }
}

impl ClockResource for SimClock {
    fn acquire(&self) {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        if self.refs.fetch_add(1, Ordering::SeqCst) == 0 {
            tracing::debug!("{} clock ON", self.name);
        }
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        let prev = self
            .refs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match prev {
            Ok(1) => tracing::debug!("{} clock OFF", self.name),
            Ok(_) => {}
            Err(_) => tracing::warn!("{} clock released without a reference", self.name),
        }
    }

    fn current_rate(&self) -> u32 {
        self.rate.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct SimState {
    events: Vec<PanelEvent>,
    failing: HashSet<PanelEvent>,
    subscribed: HashSet<IrqSource>,
    callbacks: HashMap<IrqSource, IrqCallback>,
    regs: HashMap<(u32, SyncReg), u32>,
    reg_writes: usize,
    config_writes: usize,
    starts: usize,
    resets: usize,
}

/// Simulated display pipeline and panel
pub struct SimHardware {
    this: Weak<SimHardware>,
    state: Mutex<SimState>,
    timing: Mutex<PanelTiming>,
    mdp_clock: Arc<SimClock>,
    vsync_clock: Arc<SimClock>,
    attached: AtomicBool,
    busy: AtomicBool,
    cont_splash: AtomicBool,
    complete_after: Mutex<Option<Duration>>,
}

impl SimHardware {
    /// Create an attached panel with the given timing and vsync clock rate
    pub fn new(timing: PanelTiming, vsync_clock_hz: u32) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            state: Mutex::new(SimState::default()),
            timing: Mutex::new(timing),
            mdp_clock: Arc::new(SimClock::new("mdp", 200_000_000)),
            vsync_clock: Arc::new(SimClock::new("vsync", vsync_clock_hz)),
            attached: AtomicBool::new(true),
            busy: AtomicBool::new(false),
            cont_splash: AtomicBool::new(false),
            complete_after: Mutex::new(None),
        })
    }

    /// Bundle this simulator as the controller's collaborators
    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            events: self.clone(),
            irq: self.clone(),
            ctl_regs: self.clone(),
            panel: self.clone(),
            mdp_clock: self.mdp_clock.clone(),
            vsync_clock: self.vsync_clock.clone(),
        }
    }

    /// A drive surface backed by this simulator
    pub fn pingpong(self: &Arc<Self>, num: u32) -> Arc<SimPingPong> {
        Arc::new(SimPingPong {
            num,
            hw: Arc::clone(self),
        })
    }

    pub fn mdp_clock(&self) -> &SimClock {
        &self.mdp_clock
    }

    pub fn vsync_clock(&self) -> &SimClock {
        &self.vsync_clock
    }

    /// Complete every kickoff on its own after `latency`, or never with `None`.
    ///
    /// A zero latency completes inside the start-register write.
    pub fn set_auto_complete(&self, latency: Option<Duration>) {
        *lock(&self.complete_after) = latency;
    }

    pub fn set_attached(&self, attached: bool) {
        self.attached.store(attached, Ordering::SeqCst);
    }

    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    /// Boot as if a splash screen left the pipeline clock running
    pub fn set_cont_splash(&self, enabled: bool) {
        self.cont_splash.store(enabled, Ordering::SeqCst);
        if enabled {
            self.mdp_clock.preload();
        }
    }

    pub fn cont_splash(&self) -> bool {
        self.cont_splash.load(Ordering::SeqCst)
    }

    /// Make `notify(event)` fail from now on
    pub fn fail_event(&self, event: PanelEvent) {
        lock(&self.state).failing.insert(event);
    }

    /// Fire one interrupt source.
    ///
    /// Returns `false` when the source is masked or has no callback.
    pub fn fire(&self, source: IrqSource) -> bool {
        let callback = {
            let state = lock(&self.state);
            if !state.subscribed.contains(&source) {
                return false;
            }
            match state.callbacks.get(&source) {
                Some(cb) => Arc::clone(cb),
                None => return false,
            }
        };
        // Called without the state lock; handlers unsubscribe from inside
        callback();
        true
    }

    /// Fire every subscribed source of a kind, returning how many fired
    pub fn fire_kind(&self, kind: IrqKind) -> usize {
        let sources: Vec<IrqSource> = lock(&self.state)
            .subscribed
            .iter()
            .filter(|s| s.kind == kind)
            .copied()
            .collect();
        sources.into_iter().filter(|s| self.fire(*s)).count()
    }

    pub fn is_subscribed(&self, source: IrqSource) -> bool {
        lock(&self.state).subscribed.contains(&source)
    }

    pub fn has_callback(&self, source: IrqSource) -> bool {
        lock(&self.state).callbacks.contains_key(&source)
    }

    /// Notifications received so far, in order
    pub fn events(&self) -> Vec<PanelEvent> {
        lock(&self.state).events.clone()
    }

    pub fn count_events(&self, event: PanelEvent) -> usize {
        lock(&self.state)
            .events
            .iter()
            .filter(|e| **e == event)
            .count()
    }

    pub fn clear_events(&self) {
        lock(&self.state).events.clear();
    }

    /// Last value written to (or preset on) a register
    pub fn reg(&self, unit: u32, reg: SyncReg) -> Option<u32> {
        lock(&self.state).regs.get(&(unit, reg)).copied()
    }

    /// Preset a register, e.g. the live line counter
    pub fn set_reg(&self, unit: u32, reg: SyncReg, value: u32) {
        lock(&self.state).regs.insert((unit, reg), value);
    }

    /// Individual register writes, including those inside a config unit
    pub fn reg_writes(&self) -> usize {
        lock(&self.state).reg_writes
    }

    /// Atomic sync-config units applied
    pub fn config_writes(&self) -> usize {
        lock(&self.state).config_writes
    }

    pub fn starts(&self) -> usize {
        lock(&self.state).starts
    }

    pub fn resets(&self) -> usize {
        lock(&self.state).resets
    }

    /// Fire the read-pointer interrupt every `period` until the ticker drops
    pub fn spawn_refresh(self: &Arc<Self>, period: Duration) -> std::io::Result<RefreshTicker> {
        let stop = Arc::new(AtomicBool::new(false));
        let hw = Arc::downgrade(self);
        let flag = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("sim-refresh".into())
            .spawn(move || {
                while !flag.load(Ordering::SeqCst) {
                    thread::sleep(period);
                    match hw.upgrade() {
                        Some(hw) => {
                            hw.fire_kind(IrqKind::PingPongRdPtr);
                        }
                        None => break,
                    }
                }
            })?;

        tracing::debug!("Refresh ticker started: period={:?}", period);
        Ok(RefreshTicker {
            stop,
            handle: Some(handle),
        })
    }
}

impl EventSink for SimHardware {
    fn notify(&self, event: PanelEvent) -> Result<(), HwError> {
        let mut state = lock(&self.state);
        state.events.push(event);
        if state.failing.contains(&event) {
            return Err(HwError::EventFailed {
                event,
                reason: "rejected by simulator".into(),
            });
        }
        Ok(())
    }
}

impl IrqController for SimHardware {
    fn subscribe(&self, source: IrqSource) {
        lock(&self.state).subscribed.insert(source);
    }

    fn unsubscribe(&self, source: IrqSource) {
        lock(&self.state).subscribed.remove(&source);
    }

    fn set_callback(&self, source: IrqSource, callback: Option<IrqCallback>) {
        let mut state = lock(&self.state);
        match callback {
            Some(cb) => {
                state.callbacks.insert(source, cb);
            }
            None => {
                state.callbacks.remove(&source);
            }
        }
    }
}

impl CtlRegisters for SimHardware {
    fn start(&self) {
        lock(&self.state).starts += 1;

        let Some(latency) = *lock(&self.complete_after) else {
            return;
        };
        if latency.is_zero() {
            self.fire_kind(IrqKind::PingPongComp);
            return;
        }
        let hw = self.this.clone();
        let spawned = thread::Builder::new()
            .name("sim-transfer".into())
            .spawn(move || {
                thread::sleep(latency);
                if let Some(hw) = hw.upgrade() {
                    hw.fire_kind(IrqKind::PingPongComp);
                }
            });
        if let Err(e) = spawned {
            tracing::warn!("Failed to spawn simulated transfer: {}", e);
        }
    }

    fn reset(&self) {
        lock(&self.state).resets += 1;
    }
}

impl Panel for SimHardware {
    fn timing(&self) -> PanelTiming {
        *lock(&self.timing)
    }

    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    fn cmd_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn clear_cont_splash(&self) {
        self.cont_splash.store(false, Ordering::SeqCst);
    }
}

/// One simulated ping-pong block
pub struct SimPingPong {
    num: u32,
    hw: Arc<SimHardware>,
}

impl PingPongBlock for SimPingPong {
    fn num(&self) -> u32 {
        self.num
    }

    fn read(&self, reg: SyncReg) -> u32 {
        self.hw.reg(self.num, reg).unwrap_or(0)
    }

    fn write(&self, reg: SyncReg, value: u32) {
        let mut state = lock(&self.hw.state);
        state.regs.insert((self.num, reg), value);
        state.reg_writes += 1;
    }

    fn write_sync_config(&self, writes: &[(SyncReg, u32)]) {
        // One lock for the whole unit: readers never see half a config
        let mut state = lock(&self.hw.state);
        for &(reg, value) in writes {
            state.regs.insert((self.num, reg), value);
            state.reg_writes += 1;
        }
        state.config_writes += 1;
    }
}

/// Background read-pointer interrupt source
pub struct RefreshTicker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RefreshTicker {
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RefreshTicker {
    fn drop(&mut self) {
        self.halt();
    }
}
