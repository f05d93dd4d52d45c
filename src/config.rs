//! Configuration for the command-mode engine and the panel simulator.
//!
//! Handles loading and validating configuration from JSON files. The
//! hardware revision is resolved once into [`Capabilities`] here, so the
//! engine never consults a global revision at runtime.

use crate::hw::PanelTiming;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "/etc/cmd-panel/config.json";

/// Board revisions above this latch the tear-check enable bit and get the
/// long ping-pong timeout
const ERRATUM_LAST_REVISION: u8 = 0x02;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Revision-dependent hardware behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub revision: u8,
    /// Write the tear-check enable bit; older boards leave it untouched
    pub latch_tear_check_enable: bool,
    /// Bound on waiting for a ping-pong completion
    pub pingpong_timeout: Duration,
}

impl Capabilities {
    pub fn from_revision(revision: u8) -> Self {
        let current = revision > ERRATUM_LAST_REVISION;
        Self {
            revision,
            latch_tear_check_enable: current,
            pingpong_timeout: if current {
                Duration::from_millis(150)
            } else {
                Duration::from_millis(20)
            },
        }
    }
}

/// Engine parameters resolved from [`Config`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tunables {
    pub capabilities: Capabilities,
    /// Read-pointer events without kickoff before the clock may be gated
    pub vsync_expire_ticks: u32,
    /// Lines after the read pointer at which a new transfer may start
    pub start_threshold: u16,
    /// Lines allowed for a transfer already in progress
    pub continue_threshold: u16,
    /// Bound on waiting for the read pointer to quiesce during stop
    pub stop_timeout: Duration,
    pub max_sessions: usize,
    pub deferred_queue_depth: usize,
}

impl Default for Tunables {
    fn default() -> Self {
        Config::default().tunables()
    }
}

/// Simulated panel description
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimPanelConfig {
    #[serde(flatten)]
    pub timing: PanelTiming,

    /// Rate of the tear-check reference clock in Hz
    #[serde(default = "default_vsync_clock_hz")]
    pub vsync_clock_hz: u32,

    /// Split panel driven by two ping-pong blocks
    #[serde(default)]
    pub dual: bool,

    /// Time from kickoff to ping-pong completion
    #[serde(default = "default_transfer_latency_ms")]
    pub transfer_latency_ms: u64,

    /// Boot with the continuous splash still owning the clock
    #[serde(default)]
    pub boot_splash: bool,
}

impl Default for SimPanelConfig {
    fn default() -> Self {
        Self {
            timing: PanelTiming::default(),
            vsync_clock_hz: default_vsync_clock_hz(),
            dual: false,
            transfer_latency_ms: default_transfer_latency_ms(),
            boot_splash: false,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Board revision
    #[serde(default = "default_hw_revision")]
    pub hw_revision: u8,

    #[serde(default = "default_expire_ticks")]
    pub vsync_expire_ticks: u32,

    #[serde(default = "default_threshold")]
    pub start_threshold: u16,

    #[serde(default = "default_threshold")]
    pub continue_threshold: u16,

    /// Stop quiesce bound; derived from the expiry ticks when absent
    #[serde(default)]
    pub stop_timeout_ms: Option<u64>,

    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    #[serde(default = "default_queue_depth")]
    pub deferred_queue_depth: usize,

    #[serde(default)]
    pub panel: SimPanelConfig,

    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

fn default_hw_revision() -> u8 {
    0x03
}

fn default_expire_ticks() -> u32 {
    4
}

fn default_threshold() -> u16 {
    4
}

fn default_max_sessions() -> usize {
    2
}

fn default_queue_depth() -> usize {
    16
}

fn default_vsync_clock_hz() -> u32 {
    19_200_000
}

fn default_transfer_latency_ms() -> u64 {
    8
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hw_revision: default_hw_revision(),
            vsync_expire_ticks: default_expire_ticks(),
            start_threshold: default_threshold(),
            continue_threshold: default_threshold(),
            stop_timeout_ms: None,
            max_sessions: default_max_sessions(),
            deferred_queue_depth: default_queue_depth(),
            panel: SimPanelConfig::default(),
            verbose: false,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=64).contains(&self.vsync_expire_ticks) {
            return Err(ConfigError::ValidationError(
                "vsync_expire_ticks must be between 1 and 64".to_string(),
            ));
        }

        if !(1..=8).contains(&self.max_sessions) {
            return Err(ConfigError::ValidationError(
                "max_sessions must be between 1 and 8".to_string(),
            ));
        }

        if self.deferred_queue_depth == 0 {
            return Err(ConfigError::ValidationError(
                "deferred_queue_depth must be greater than 0".to_string(),
            ));
        }

        if self.start_threshold == 0 || self.continue_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "tear-check thresholds must be greater than 0".to_string(),
            ));
        }

        let timing = &self.panel.timing;
        if timing.yres == 0 || timing.yres >= 0xfff0 {
            return Err(ConfigError::ValidationError(format!(
                "panel yres {} out of range",
                timing.yres
            )));
        }

        if timing.frame_rate == 0 {
            return Err(ConfigError::ValidationError(
                "panel frame_rate must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Quiesce bound: twice the expiry window at a 16 ms line cadence,
    /// plus two ticks of slack
    pub fn stop_timeout(&self) -> Duration {
        let ms = self
            .stop_timeout_ms
            .unwrap_or(16 * (u64::from(self.vsync_expire_ticks) + 2) * 2);
        Duration::from_millis(ms)
    }

    /// Resolve engine parameters
    pub fn tunables(&self) -> Tunables {
        Tunables {
            capabilities: Capabilities::from_revision(self.hw_revision),
            vsync_expire_ticks: self.vsync_expire_ticks,
            start_threshold: self.start_threshold,
            continue_threshold: self.continue_threshold,
            stop_timeout: self.stop_timeout(),
            max_sessions: self.max_sessions,
            deferred_queue_depth: self.deferred_queue_depth,
        }
    }

    /// Refresh period of the configured panel
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs(1) / self.panel.timing.frame_rate.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_resolves_capabilities() {
        let current = Capabilities::from_revision(3);
        assert!(current.latch_tear_check_enable);
        assert_eq!(current.pingpong_timeout, Duration::from_millis(150));

        let old = Capabilities::from_revision(2);
        assert!(!old.latch_tear_check_enable);
        assert_eq!(old.pingpong_timeout, Duration::from_millis(20));
    }

    #[test]
    fn default_stop_timeout_derives_from_expiry() {
        let config = Config::default();
        assert_eq!(config.stop_timeout(), Duration::from_millis(192));

        let tuned = Config {
            stop_timeout_ms: Some(10),
            ..Config::default()
        };
        assert_eq!(tuned.tunables().stop_timeout, Duration::from_millis(10));
    }

    #[test]
    fn parses_partial_json_with_defaults() {
        let json = r#"{ "hw_revision": 2, "panel": { "yres": 1280, "frame_rate": 60, "dual": true } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        config.validate().unwrap();

        assert_eq!(config.vsync_expire_ticks, 4);
        assert_eq!(config.max_sessions, 2);
        assert!(config.panel.dual);
        assert_eq!(config.panel.timing.yres, 1280);
        assert_eq!(config.panel.vsync_clock_hz, 19_200_000);
        assert!(!config.tunables().capabilities.latch_tear_check_enable);
    }

    #[test]
    fn rejects_invalid_values() {
        let mut config = Config::default();
        config.vsync_expire_ticks = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.max_sessions = 9;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.panel.timing.frame_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reads_file() {
        let path = std::env::temp_dir().join(format!("cmd-panel-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "vsync_expire_ticks": 6 }"#).unwrap();

        let config = Config::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(config.vsync_expire_ticks, 6);
        assert_eq!(config.stop_timeout(), Duration::from_millis(256));
    }

    #[test]
    fn load_missing_file_is_read_error() {
        let err = Config::load("/nonexistent/cmd-panel.json").unwrap_err();
        assert!(matches!(err, ConfigError::ReadError(_)));
    }
}
