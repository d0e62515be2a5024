//! Session configuration
//!
//! Serial settings, read windows and the settle delays used by the
//! configuration sequences. The delays were tuned against real firmware;
//! they are kept configurable rather than assumed to be minimal.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{DEFAULT_BAUD_RATE, DEFAULT_LINE_TERMINATOR, DEFAULT_READ_WINDOW_MS};

/// Errors raised while loading or saving a configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read or written
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid config JSON
    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// What a second caller sees while an operation is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Fail immediately with `SessionBusy`
    #[default]
    Reject,
    /// Wait for the current operation to finish
    Queue,
}

/// Read windows and settle delays, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceTimings {
    /// Settle after each glitch parameter except the pulse width
    pub glitch_settle_ms: u64,
    /// Settle after the pulse width, the last and slowest parameter
    pub pulse_width_settle_ms: u64,
    /// Read window of the `gl` verification read
    pub verify_window_ms: u64,
    /// Read window of each ADC configuration step
    pub adc_step_window_ms: u64,
    /// Read window of `g`
    pub execute_glitch_window_ms: u64,
    /// Read window of `di`; sample dumps can be long
    pub display_adc_window_ms: u64,
    /// Settle after disarm and arm at the start of a pulse train
    pub pulse_train_arm_settle_ms: u64,
}

impl Default for SequenceTimings {
    fn default() -> Self {
        Self {
            glitch_settle_ms: 500,
            pulse_width_settle_ms: 2000,
            verify_window_ms: 1000,
            adc_step_window_ms: 200,
            execute_glitch_window_ms: 500,
            display_adc_window_ms: 1000,
            pulse_train_arm_settle_ms: 1000,
        }
    }
}

impl SequenceTimings {
    /// [`Self::glitch_settle_ms`] as a duration
    pub fn glitch_settle(&self) -> Duration {
        Duration::from_millis(self.glitch_settle_ms)
    }

    /// [`Self::pulse_width_settle_ms`] as a duration
    pub fn pulse_width_settle(&self) -> Duration {
        Duration::from_millis(self.pulse_width_settle_ms)
    }

    /// [`Self::verify_window_ms`] as a duration
    pub fn verify_window(&self) -> Duration {
        Duration::from_millis(self.verify_window_ms)
    }

    /// [`Self::adc_step_window_ms`] as a duration
    pub fn adc_step_window(&self) -> Duration {
        Duration::from_millis(self.adc_step_window_ms)
    }

    /// [`Self::pulse_train_arm_settle_ms`] as a duration
    pub fn pulse_train_arm_settle(&self) -> Duration {
        Duration::from_millis(self.pulse_train_arm_settle_ms)
    }
}

/// Everything a [`crate::session::Session`] needs to know up front
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Baud rate passed to the serial transport
    pub baud_rate: u32,
    /// Appended to every command
    pub line_terminator: String,
    /// Read window for commands without a specific one
    pub default_read_window_ms: u64,
    /// Longest single blocking read on the port
    pub poll_interval_ms: u64,
    /// Reject or queue a caller that arrives while the session is busy
    pub busy_policy: BusyPolicy,
    /// Transcript entries kept before the oldest are dropped
    pub transcript_capacity: usize,
    /// Sequence pacing and per-command read windows
    pub timings: SequenceTimings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            line_terminator: DEFAULT_LINE_TERMINATOR.to_string(),
            default_read_window_ms: DEFAULT_READ_WINDOW_MS,
            poll_interval_ms: 100,
            busy_policy: BusyPolicy::Reject,
            transcript_capacity: 10_000,
            timings: SequenceTimings::default(),
        }
    }
}

impl SessionConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write the config as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// [`Self::default_read_window_ms`] as a duration
    pub fn default_read_window(&self) -> Duration {
        Duration::from_millis(self.default_read_window_ms)
    }

    /// [`Self::poll_interval_ms`] as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
