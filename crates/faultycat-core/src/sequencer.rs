//! Configuration sequencer
//!
//! Multi-value configuration is uploaded as an ordered list of steps. Each
//! step writes one line, collects the reply, and then waits out a fixed
//! settle delay before the next write. The firmware prompts for values one
//! at a time and has no "ready" signal, so pacing is by time only.
//!
//! A sequence either runs to the end or stops at the first failing step;
//! it is never resumed halfway. Callers re-run the whole sequence.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{SequenceTimings, SessionConfig};
use crate::protocol::{Command, CommandResult, DeviceCommand};
use crate::session::SessionError;

/// Largest accepted delay or pulse width, in cycles
pub const MAX_GLITCH_CYCLES: u32 = 10_000;

/// Accepted ADC sample counts
pub const ADC_SAMPLE_RANGE: std::ops::RangeInclusive<u32> = 100..=30_000;

/// Executes one step on behalf of a running sequence
pub trait StepRunner {
    /// Write the step's command and collect its reply
    fn run_step(&mut self, command: Command) -> impl Future<Output = Result<CommandResult, SessionError>> + Send;
}

/// One write in a sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Line to write
    pub command: String,
    /// How long to collect the reply
    pub read_window: Duration,
    /// Minimum time from this write to the next one
    pub settle: Duration,
}

impl Step {
    /// Step from its parts
    pub fn new(command: impl Into<String>, read_window: Duration, settle: Duration) -> Self {
        Self {
            command: command.into(),
            read_window,
            settle,
        }
    }
}

/// An ordered list of dependent writes plus an optional read-back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    /// Used in logs and the success message
    pub name: String,
    /// Writes in order
    pub steps: Vec<Step>,
    /// Issued after the last step; its reply is appended to the output
    pub verify: Option<Step>,
}

impl Sequence {
    /// Empty sequence
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            verify: None,
        }
    }

    /// Append a step
    pub fn step(mut self, command: impl Into<String>, read_window: Duration, settle: Duration) -> Self {
        self.steps.push(Step::new(command, read_window, settle));
        self
    }

    /// Set the read-back issued after the last step
    pub fn verify_with(mut self, command: impl Into<String>, read_window: Duration) -> Self {
        self.verify = Some(Step::new(command, read_window, Duration::ZERO));
        self
    }

    /// Commands in write order, verification included
    pub fn commands(&self) -> Vec<&str> {
        self.steps
            .iter()
            .chain(self.verify.iter())
            .map(|s| s.command.as_str())
            .collect()
    }

    /// Run every step in order through `runner`.
    ///
    /// The first failure aborts the sequence and is reported as
    /// [`SessionError::Configuration`] carrying the replies collected so far.
    pub async fn execute<R: StepRunner>(&self, runner: &mut R) -> Result<SequenceReport, SessionError> {
        info!(sequence = %self.name, steps = self.steps.len(), "running sequence");
        let mut report = SequenceReport {
            name: self.name.clone(),
            steps: Vec::with_capacity(self.steps.len()),
            verification: None,
            output: String::new(),
        };

        for (index, step) in self.steps.iter().chain(self.verify.iter()).enumerate() {
            let started = Instant::now();
            let result = match runner
                .run_step(Command::new(step.command.clone(), step.read_window))
                .await
            {
                Ok(result) => result,
                Err(cause) => {
                    warn!(sequence = %self.name, step = index, command = %step.command, error = %cause, "sequence aborted");
                    return Err(SessionError::Configuration {
                        step_index: index,
                        accumulated_output: report.output,
                        cause: Box::new(cause),
                    });
                }
            };

            report.output.push_str(&result.raw_response);
            let outcome = StepOutcome {
                index,
                command: result.command,
                response: result.raw_response,
                issued_at: result.issued_at,
            };
            if index < self.steps.len() {
                report.steps.push(outcome);
            } else {
                report.verification = Some(outcome);
            }

            let remaining = step.settle.saturating_sub(started.elapsed());
            if !remaining.is_zero() {
                debug!(step = index, settle_ms = remaining.as_millis() as u64, "settling");
                tokio::time::sleep(remaining).await;
            }
        }

        info!(sequence = %self.name, bytes = report.output.len(), "sequence complete");
        Ok(report)
    }
}

/// Reply to one executed step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    /// Position in the sequence, verification last
    pub index: usize,
    /// Command as written
    pub command: String,
    /// Reply within the step's window
    pub response: String,
    /// When the write started
    pub issued_at: chrono::DateTime<chrono::Utc>,
}

/// Everything a completed sequence produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceReport {
    /// Name of the sequence that ran
    pub name: String,
    /// Outcome of each step
    pub steps: Vec<StepOutcome>,
    /// Outcome of the read-back, if the sequence has one
    pub verification: Option<StepOutcome>,
    /// All replies concatenated in order
    pub output: String,
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

macro_rules! coded_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $what:literal {
            $($variant:ident = $code:literal, $label:literal;)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
        pub enum $name {
            #[default]
            $(#[doc = $label] $variant,)+
        }

        impl $name {
            /// Value typed at the firmware prompt
            pub fn code(&self) -> u8 {
                match self {
                    $($name::$variant => $code,)+
                }
            }

            /// Variant for a prompt value
            pub fn from_code(code: u8) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $($name::$variant => f.write_str($label),)+
                }
            }
        }

        impl FromStr for $name {
            type Err = SessionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if let Ok(code) = s.trim().parse::<u8>() {
                    return Self::from_code(code).ok_or_else(|| {
                        SessionError::InvalidParameter(format!("{} code out of range: {}", $what, code))
                    });
                }
                let wanted = normalize(s);
                $(
                    if wanted == normalize(stringify!($variant)) || wanted == normalize($label) {
                        return Ok($name::$variant);
                    }
                )+
                Err(SessionError::InvalidParameter(format!("unknown {}: {}", $what, s)))
            }
        }
    };
}

// The first variant listed is the default.
coded_enum! {
    /// Trigger condition that starts the glitch delay
    TriggerType, "trigger type" {
        None = 0, "None";
        High = 1, "High";
        Low = 2, "Low";
        RisingEdge = 3, "Rising Edge";
        FallingEdge = 4, "Falling Edge";
        PulsePositive = 5, "Pulse Positive";
        PulseNegative = 6, "Pulse Negative";
    }
}

coded_enum! {
    /// Internal pull on the trigger input
    TriggerPull, "trigger pull" {
        None = 0, "None";
        PullUp = 1, "Pull Up";
        PullDown = 2, "Pull Down";
    }
}

coded_enum! {
    /// Which MOSFET drives the glitch
    GlitchOutput, "glitch output" {
        None = 0, "None";
        LP = 1, "LP";
        HP = 2, "HP";
    }
}

/// Glitch parameters uploaded with `co`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GlitchConfig {
    /// What fires the glitch
    pub trigger_type: TriggerType,
    /// Pull resistor on the trigger input
    pub trigger_pull: TriggerPull,
    /// Which output drives the pulse
    pub glitch_output: GlitchOutput,
    /// Cycles between trigger and pulse
    pub delay_before_pulse: u32,
    /// Pulse length in cycles
    pub pulse_width: u32,
}

impl GlitchConfig {
    /// Check both cycle counts are within `0..=MAX_GLITCH_CYCLES`
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.delay_before_pulse > MAX_GLITCH_CYCLES {
            return Err(SessionError::InvalidParameter(format!(
                "delay_before_pulse must be 0..={}, got {}",
                MAX_GLITCH_CYCLES, self.delay_before_pulse
            )));
        }
        if self.pulse_width > MAX_GLITCH_CYCLES {
            return Err(SessionError::InvalidParameter(format!(
                "pulse_width must be 0..={}, got {}",
                MAX_GLITCH_CYCLES, self.pulse_width
            )));
        }
        Ok(())
    }

    /// Steps: `co`, trigger type, pull, output, delay, width, then `gl`
    pub fn sequence(&self, timings: &SequenceTimings) -> Result<Sequence, SessionError> {
        self.validate()?;
        let settle = timings.glitch_settle();
        let last = timings.pulse_width_settle();
        Ok(Sequence::new("glitch-config")
            .step(DeviceCommand::EnterGlitchConfig.token(), settle, settle)
            .step(self.trigger_type.code().to_string(), settle, settle)
            .step(self.trigger_pull.code().to_string(), settle, settle)
            .step(self.glitch_output.code().to_string(), settle, settle)
            .step(self.delay_before_pulse.to_string(), settle, settle)
            .step(self.pulse_width.to_string(), last, last)
            .verify_with(DeviceCommand::GetGlitchConfig.token(), timings.verify_window()))
    }

    /// Set one field from a `key=value` pair as typed at the console
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), SessionError> {
        let number = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|_| SessionError::InvalidParameter(format!("{} expects a number, got {}", key, v)))
        };
        match normalize(key).as_str() {
            "trigger" | "triggertype" => self.trigger_type = value.parse()?,
            "pull" | "triggerpull" => self.trigger_pull = value.parse()?,
            "output" | "glitchoutput" => self.glitch_output = value.parse()?,
            "delay" | "delaybeforepulse" => self.delay_before_pulse = number(value)?,
            "width" | "pulsewidth" => self.pulse_width = number(value)?,
            _ => return Err(SessionError::InvalidParameter(format!("unknown glitch field: {}", key))),
        }
        Ok(())
    }
}

/// ADC capture parameters uploaded with `con`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdcConfig {
    /// Samples captured per trigger
    pub sample_count: u32,
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self { sample_count: 1000 }
    }
}

impl AdcConfig {
    /// Check the count is within [`ADC_SAMPLE_RANGE`]
    pub fn validate(&self) -> Result<(), SessionError> {
        if !ADC_SAMPLE_RANGE.contains(&self.sample_count) {
            return Err(SessionError::InvalidParameter(format!(
                "sample_count must be {}..={}, got {}",
                ADC_SAMPLE_RANGE.start(),
                ADC_SAMPLE_RANGE.end(),
                self.sample_count
            )));
        }
        Ok(())
    }

    /// Steps: `con`, then the sample count
    pub fn sequence(&self, timings: &SequenceTimings) -> Result<Sequence, SessionError> {
        self.validate()?;
        let window = timings.adc_step_window();
        Ok(Sequence::new("adc-config")
            .step(DeviceCommand::EnterAdcConfig.token(), window, window)
            .step(self.sample_count.to_string(), window, window))
    }
}

/// Repeated pulses on an armed board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseTrain {
    /// Pulses to fire
    pub count: u32,
    /// Time between pulses
    pub interval: Duration,
}

impl Default for PulseTrain {
    fn default() -> Self {
        Self {
            count: 1,
            interval: Duration::from_secs(1),
        }
    }
}

impl PulseTrain {
    /// At least one pulse and a non-zero interval
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.count == 0 {
            return Err(SessionError::InvalidParameter("pulse count must be at least 1".into()));
        }
        if self.interval.is_zero() {
            return Err(SessionError::InvalidParameter("pulse interval must be positive".into()));
        }
        Ok(())
    }

    /// Steps: disarm, arm, `count` pulses, disarm
    pub fn sequence(&self, config: &SessionConfig) -> Result<Sequence, SessionError> {
        self.validate()?;
        let arm_settle = config.timings.pulse_train_arm_settle();
        let window = config.default_read_window();
        let pulse_window = window.min(self.interval);

        let mut sequence = Sequence::new("pulse-train")
            .step(DeviceCommand::Disarm.token(), window, arm_settle)
            .step(DeviceCommand::Arm.token(), window, arm_settle);
        for _ in 0..self.count {
            sequence = sequence.step(DeviceCommand::Pulse.token(), pulse_window, self.interval);
        }
        Ok(sequence.step(DeviceCommand::Disarm.token(), window, Duration::ZERO))
    }
}
