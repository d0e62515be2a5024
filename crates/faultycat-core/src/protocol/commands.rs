//! Protocol commands
//!
//! Defines the command tokens understood by the FaultyCat firmware.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::SessionConfig;

/// Commands accepted by the board's serial console
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceCommand {
    /// Arm the high-voltage pulser ('a')
    Arm,

    /// Disarm the pulser ('d')
    Disarm,

    /// Fire a single pulse ('p')
    Pulse,

    /// Report board status ('s')
    Status,

    /// Print the firmware help text ('h')
    Help,

    /// Run the configured glitch ('g')
    ExecuteGlitch,

    /// Scan for JTAG/SWD pinouts ('j')
    JtagScan,

    /// Legacy single-shot configure ('c')
    Configure,

    /// Enter the glitch configuration prompt ('co')
    EnterGlitchConfig,

    /// Enter the ADC configuration prompt ('con')
    EnterAdcConfig,

    /// Print the current glitch configuration ('gl')
    GetGlitchConfig,

    /// Dump captured ADC samples ('di')
    DisplayAdc,

    /// Reset the board ('r')
    Reset,

    /// Toggle the auxiliary GPIO ('t')
    ToggleGpio,

    /// Fast trigger mode ('f')
    FastTrigger,

    /// Configure the fast trigger ('fa')
    FastTriggerConfig,

    /// Use the internal high-voltage pulse source ('ih')
    InternalHvp,

    /// Use an external high-voltage pulse source ('eh')
    ExternalHvp,
}

impl DeviceCommand {
    /// Every command, in help-table order
    pub const ALL: [DeviceCommand; 18] = [
        DeviceCommand::Arm,
        DeviceCommand::Disarm,
        DeviceCommand::Pulse,
        DeviceCommand::Status,
        DeviceCommand::Help,
        DeviceCommand::ExecuteGlitch,
        DeviceCommand::JtagScan,
        DeviceCommand::Configure,
        DeviceCommand::EnterGlitchConfig,
        DeviceCommand::EnterAdcConfig,
        DeviceCommand::GetGlitchConfig,
        DeviceCommand::DisplayAdc,
        DeviceCommand::Reset,
        DeviceCommand::ToggleGpio,
        DeviceCommand::FastTrigger,
        DeviceCommand::FastTriggerConfig,
        DeviceCommand::InternalHvp,
        DeviceCommand::ExternalHvp,
    ];

    /// The text sent on the wire (without terminator)
    pub fn token(&self) -> &'static str {
        match self {
            DeviceCommand::Arm => "a",
            DeviceCommand::Disarm => "d",
            DeviceCommand::Pulse => "p",
            DeviceCommand::Status => "s",
            DeviceCommand::Help => "h",
            DeviceCommand::ExecuteGlitch => "g",
            DeviceCommand::JtagScan => "j",
            DeviceCommand::Configure => "c",
            DeviceCommand::EnterGlitchConfig => "co",
            DeviceCommand::EnterAdcConfig => "con",
            DeviceCommand::GetGlitchConfig => "gl",
            DeviceCommand::DisplayAdc => "di",
            DeviceCommand::Reset => "r",
            DeviceCommand::ToggleGpio => "t",
            DeviceCommand::FastTrigger => "f",
            DeviceCommand::FastTriggerConfig => "fa",
            DeviceCommand::InternalHvp => "ih",
            DeviceCommand::ExternalHvp => "eh",
        }
    }

    /// Look a command up by its wire token
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.token() == token)
    }

    /// How long to collect the reply for this command
    pub fn read_window(&self, config: &SessionConfig) -> Duration {
        let timings = &config.timings;
        let ms = match self {
            DeviceCommand::ExecuteGlitch => timings.execute_glitch_window_ms,
            DeviceCommand::EnterAdcConfig => timings.adc_step_window_ms,
            DeviceCommand::GetGlitchConfig => timings.verify_window_ms,
            DeviceCommand::DisplayAdc => timings.display_adc_window_ms,
            _ => config.default_read_window_ms,
        };
        Duration::from_millis(ms)
    }

    /// Build a [`Command`] with this command's read window
    pub fn to_command(&self, config: &SessionConfig) -> Command {
        Command::new(self.token(), self.read_window(config))
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// One command invocation: the text plus how long to wait for a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Line to write, without the terminator
    pub text: String,
    /// How long to collect the reply
    pub expected_read_window: Duration,
}

impl Command {
    /// Command with an explicit read window
    pub fn new(text: impl Into<String>, expected_read_window: Duration) -> Self {
        Self {
            text: text.into(),
            expected_read_window,
        }
    }
}

/// Reply collected for a [`Command`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    /// Command text as sent (without terminator)
    pub command: String,
    /// Everything the device sent within the window, possibly empty
    pub raw_response: String,
    /// When the write started
    pub issued_at: DateTime<Utc>,
}

/// Status words printed by the pulser firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoardStatus {
    /// High voltage output armed
    Armed,
    /// High voltage output disarmed
    Disarmed,
    /// Capacitor charged
    Charged,
    /// A pulse was fired
    Pulsed,
    /// Capacitor not charged yet
    NotCharged,
    /// Auto-disarm timeout running
    TimeoutActive,
    /// Auto-disarm timeout off
    TimeoutDeactivated,
    /// Reporting the HV pulse interval
    HvpInterval,
}

impl BoardStatus {
    /// Marker text for each status. Longer markers that contain a shorter
    /// one ("disarmed" contains "armed") come first.
    const MARKERS: [(&'static str, BoardStatus); 8] = [
        ("Not Charged", BoardStatus::NotCharged),
        ("Timeout deactivated", BoardStatus::TimeoutDeactivated),
        ("Timeout active", BoardStatus::TimeoutActive),
        ("HVP interval", BoardStatus::HvpInterval),
        ("disarmed", BoardStatus::Disarmed),
        ("armed", BoardStatus::Armed),
        ("charged", BoardStatus::Charged),
        ("pulsed", BoardStatus::Pulsed),
    ];

    /// The text the firmware prints for this status
    pub fn as_str(&self) -> &'static str {
        Self::MARKERS
            .iter()
            .find(|(_, status)| status == self)
            .map(|(text, _)| *text)
            .unwrap_or("")
    }

    /// Find the first status word in a free-text reply
    pub fn detect(text: &str) -> Option<Self> {
        Self::MARKERS
            .iter()
            .find(|(marker, _)| text.contains(marker))
            .map(|(_, status)| *status)
    }
}

impl fmt::Display for BoardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique() {
        for (i, a) in DeviceCommand::ALL.iter().enumerate() {
            for b in &DeviceCommand::ALL[i + 1..] {
                assert_ne!(a.token(), b.token(), "{:?} and {:?} share a token", a, b);
            }
        }
    }

    #[test]
    fn test_from_token() {
        assert_eq!(DeviceCommand::from_token("con"), Some(DeviceCommand::EnterAdcConfig));
        assert_eq!(DeviceCommand::from_token("co"), Some(DeviceCommand::EnterGlitchConfig));
        assert_eq!(DeviceCommand::from_token("x"), None);
    }

    #[test]
    fn test_read_windows() {
        let config = SessionConfig::default();
        assert_eq!(DeviceCommand::ExecuteGlitch.read_window(&config), Duration::from_millis(500));
        assert_eq!(DeviceCommand::DisplayAdc.read_window(&config), Duration::from_millis(1000));
        assert_eq!(DeviceCommand::EnterAdcConfig.read_window(&config), Duration::from_millis(200));
        assert_eq!(
            DeviceCommand::Arm.read_window(&config),
            Duration::from_millis(config.default_read_window_ms)
        );
    }

    #[test]
    fn test_status_detection_prefers_disarmed() {
        assert_eq!(BoardStatus::detect("Board disarmed\r\n"), Some(BoardStatus::Disarmed));
        assert_eq!(BoardStatus::detect("Board armed"), Some(BoardStatus::Armed));
        assert_eq!(BoardStatus::detect("HV Not Charged"), Some(BoardStatus::NotCharged));
        assert_eq!(BoardStatus::detect("garbage"), None);
    }

    #[test]
    fn test_status_display_round_trips_marker() {
        assert_eq!(BoardStatus::TimeoutActive.to_string(), "Timeout active");
        assert_eq!(BoardStatus::detect(BoardStatus::Pulsed.as_str()), Some(BoardStatus::Pulsed));
    }
}
