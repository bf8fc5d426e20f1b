// src/config.rs

//! Configuration for the render-loop driver and the demo binary.
//!
//! Every struct deserializes with `#[serde(default)]`, so a config file only
//! needs the fields it wants to override. Files are JSON.

use crate::profiler::MAX_HISTORY_LEN;
use anyhow::{bail, Context, Result};
use log::{info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Slowest refresh rate any timer is paced at, whatever the config says.
pub const MIN_REFRESH_FLOOR_HZ: f64 = 0.1;

/// Environment variable naming the config file used by [`CONFIG`].
pub const CONFIG_PATH_ENV: &str = "VSYNC_LOOP_CONFIG";

/// Process-wide configuration, loaded lazily from `$VSYNC_LOOP_CONFIG`.
pub static CONFIG: Lazy<Config> = Lazy::new(|| match std::env::var(CONFIG_PATH_ENV) {
    Ok(path) => Config::load_or_default(path),
    Err(_) => Config::default(),
});

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Refresh pacing and frame timing.
    pub timing: TimingConfig,
    /// Driver behavior.
    pub driver: DriverConfig,
    /// Settings for the demo binary only.
    pub demo: DemoConfig,
}

impl Config {
    /// Reads and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Rejects values the driver cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.timing.validate().context("timing")?;
        self.driver.validate().context("driver")?;
        Ok(())
    }

    /// Reads a JSON config file, falling back to defaults on any error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{:#}. Using default configuration.", e);
                Self::default()
            }
        }
    }
}

// --- Timing ---

/// Refresh-rate bounds and frame delta handling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    /// Lowest refresh rate a timer will be paced at.
    pub min_refresh_hz: f64,
    /// Highest refresh rate a timer will be paced at.
    pub max_refresh_hz: f64,
    /// Rate used when the surface reports no display.
    /// `None` makes a missing display a setup failure.
    pub fallback_refresh_hz: Option<f64>,
    /// Upper bound for the delta handed to `update`, in milliseconds.
    /// Keeps a stalled frame (debugger, sleep) from producing a huge step.
    pub max_frame_delta_ms: u64,
}

impl TimingConfig {
    pub fn max_frame_delta(&self) -> Duration {
        Duration::from_millis(self.max_frame_delta_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.min_refresh_hz.is_finite() && self.min_refresh_hz >= MIN_REFRESH_FLOOR_HZ) {
            bail!(
                "min_refresh_hz must be at least {} Hz, got {}",
                MIN_REFRESH_FLOOR_HZ,
                self.min_refresh_hz
            );
        }
        if !(self.max_refresh_hz.is_finite() && self.max_refresh_hz >= self.min_refresh_hz) {
            bail!(
                "max_refresh_hz must be finite and at least min_refresh_hz ({}), got {}",
                self.min_refresh_hz,
                self.max_refresh_hz
            );
        }
        if let Some(fallback) = self.fallback_refresh_hz {
            if !(fallback.is_finite() && fallback > 0.0) {
                bail!("fallback_refresh_hz must be finite and positive, got {}", fallback);
            }
        }
        Ok(())
    }

    /// Clamps a reported refresh rate into the configured range.
    pub fn clamp_refresh(&self, hz: f64) -> f64 {
        let lo = self.min_refresh_hz.max(MIN_REFRESH_FLOOR_HZ);
        let hi = self.max_refresh_hz.max(lo);
        if hz.is_nan() {
            return lo;
        }
        hz.clamp(lo, hi)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            min_refresh_hz: 1.0,
            max_refresh_hz: 240.0,
            fallback_refresh_hz: None,
            max_frame_delta_ms: 100,
        }
    }
}

// --- Driver ---

/// What the loop does when the backend or surface reports an error mid-frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Halt the loop after the failing tick and report the fault from `stop`.
    #[default]
    FailFast,
    /// Log the error and keep ticking.
    LogAndContinue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriverConfig {
    pub failure_policy: FailurePolicy,
    /// Number of recent frames kept by the profiler.
    pub history_len: usize,
}

impl DriverConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_HISTORY_LEN).contains(&self.history_len) {
            bail!(
                "history_len must be between 1 and {}, got {}",
                MAX_HISTORY_LEN,
                self.history_len
            );
        }
        Ok(())
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            failure_policy: FailurePolicy::FailFast,
            history_len: 120,
        }
    }
}

// --- Demo ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DemoConfig {
    /// How long the demo loop runs before it is stopped.
    pub run_ms: u64,
    /// Refresh rate reported by the demo's headless surface.
    pub refresh_hz: f64,
    /// Log a progress line every this many frames. 0 disables it.
    pub log_every: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        DemoConfig {
            run_ms: 2000,
            refresh_hz: 60.0,
            log_every: 60,
        }
    }
}
