//! Command-mode panel simulator
//!
//! Drives the refresh synchronization engine against a simulated panel:
//! - Starts a command-mode session on a simulated controller
//! - Refreshes the panel at its frame rate (read-pointer events)
//! - Kicks off frames from an async frame producer
//! - Stops cleanly on SIGTERM/SIGINT or after the requested frame count

use anyhow::Context;
use clap::Parser;
use cmd_panel_sync::config::{Config, DEFAULT_CONFIG_PATH};
use cmd_panel_sync::controller::{DisplayController, Side};
use cmd_panel_sync::hw::sim::{RefreshTicker, SimHardware};
use cmd_panel_sync::scheduler::FrameScheduler;
use cmd_panel_sync::{CmdSession, SessionPool, VsyncHandler};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "cmd-panel-sim")]
#[command(about = "Command-mode panel refresh simulator")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Frames to present before exiting (default: run until interrupted)
    #[arg(short, long)]
    frames: Option<u64>,

    /// Board revision (overrides config)
    #[arg(long)]
    revision: Option<u8>,

    /// Never complete transfers, exercising the timeout path
    #[arg(long)]
    drop_completions: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Everything the simulation keeps alive between bring-up and teardown
struct Sim {
    hw: Arc<SimHardware>,
    ctl: Arc<DisplayController>,
    session: Arc<CmdSession>,
    ticker: RefreshTicker,
    vsyncs: Arc<AtomicU64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config).unwrap_or_else(|e| {
        eprintln!("Failed to load config from {}: {}", args.config, e);
        Config::default()
    });
    init_logging(args.verbose || config.verbose);

    tracing::info!("Starting command-mode panel simulator");

    if let Some(revision) = args.revision {
        config.hw_revision = revision;
    }
    let frame_period = config.frame_period();
    tracing::info!(
        revision = config.hw_revision,
        yres = config.panel.timing.yres,
        frame_rate = config.panel.timing.frame_rate,
        "Panel configured"
    );

    // Engine calls block; keep them off the async thread
    let drop_completions = args.drop_completions;
    let sim = tokio::task::spawn_blocking(move || bring_up(&config, drop_completions)).await??;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut scheduler = FrameScheduler::new(Arc::clone(&sim.ctl), frame_period);
    if let Some(frames) = args.frames {
        scheduler = scheduler.with_frame_limit(frames);
    }

    let scheduler_shutdown = shutdown_tx.subscribe();
    let mut scheduler_handle =
        tokio::spawn(async move { scheduler.run(scheduler_shutdown).await });

    let report = tokio::select! {
        report = &mut scheduler_handle => report?,
        res = wait_for_shutdown() => {
            res?;
            tracing::info!("Shutdown signal received");
            let _ = shutdown_tx.send(());
            scheduler_handle.await?
        }
    };

    let stats = sim.session.stats();
    let summary = tokio::task::spawn_blocking(move || tear_down(sim)).await??;

    println!("{}", serde_json::to_string_pretty(&report)?);
    println!("{}", serde_json::to_string_pretty(&stats)?);
    tracing::info!(
        vsyncs = summary.vsyncs,
        line = summary.line,
        clock_refs = summary.clock_refs,
        "Shutdown complete"
    );
    Ok(())
}

/// Wire the simulated hardware and start a command-mode session
fn bring_up(config: &Config, drop_completions: bool) -> anyhow::Result<Sim> {
    let panel = &config.panel;
    let hw = SimHardware::new(panel.timing, panel.vsync_clock_hz);
    if panel.boot_splash {
        hw.set_cont_splash(true);
    }
    if !drop_completions {
        hw.set_auto_complete(Some(Duration::from_millis(panel.transfer_latency_ms)));
    }

    let ctl = DisplayController::new(0, 1, 0, hw.collaborators());
    ctl.bind_surface(Side::Left, hw.pingpong(0));
    if panel.dual {
        ctl.bind_surface(Side::Right, hw.pingpong(1));
    }

    let pool = SessionPool::new(config);
    let session = pool.start(&ctl).context("Failed to start command mode")?;
    if hw.cont_splash() {
        session
            .reconfigure_splash_done()
            .context("Failed to hand over continuous splash")?;
    }

    let vsyncs = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&vsyncs);
    let handler = VsyncHandler::regular(move |_, _| {
        counter.fetch_add(1, Ordering::Relaxed);
    });
    ctl.add_vsync_handler(&handler)?;

    let ticker = hw
        .spawn_refresh(config.frame_period())
        .context("Failed to start panel refresh")?;

    Ok(Sim {
        hw,
        ctl,
        session,
        ticker,
        vsyncs,
    })
}

struct Summary {
    vsyncs: u64,
    line: u32,
    clock_refs: usize,
}

/// Stop the session while the panel still refreshes, then stop the panel
fn tear_down(sim: Sim) -> anyhow::Result<Summary> {
    let line = sim.ctl.read_line_count();
    sim.ctl.stop().context("Failed to stop command mode")?;
    sim.ticker.stop();

    Ok(Summary {
        vsyncs: sim.vsyncs.load(Ordering::Relaxed),
        line,
        clock_refs: sim.hw.mdp_clock().refs(),
    })
}

/// Initialize tracing/logging
///
/// Default level is "warn"; --verbose switches to "debug".
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("cmd_panel_sync={level},cmd_panel_sim={level}").into()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
async fn wait_for_shutdown() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}
