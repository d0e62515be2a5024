//! Device session
//!
//! Owns the one link to the board and enforces the connection lifecycle:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected
//! ```
//!
//! The device does not tag replies, so at most one protocol operation may be
//! in flight. Every operation holds the session's operation lock for its
//! whole duration; a second caller is rejected with
//! [`SessionError::SessionBusy`] or queued, per [`BusyPolicy`].
//! State, last message and transcript are readable without that lock.

mod error;

pub use error::SessionError;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use crate::config::{BusyPolicy, SessionConfig};
use crate::protocol::{
    filter_usb, list_ports, BoardStatus, ChannelCounters, Command, CommandChannel, CommandResult,
    DeviceCommand, PortInfo, ProtocolError, SerialTransport, Transport,
};
use crate::sequencer::{AdcConfig, GlitchConfig, PulseTrain, Sequence, SequenceReport, StepRunner};
use crate::transcript::Transcript;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionState {
    /// No link open
    #[default]
    Disconnected,
    /// Port open in progress
    Connecting,
    /// Link open and ready for commands
    Connected,
    /// Link close in progress
    Disconnecting,
}

/// Severity of a user-facing message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Routine outcome
    Info,
    /// An operation completed
    Success,
    /// Degraded but usable
    Warning,
    /// An operation failed
    Error,
}

/// One-line outcome of the last operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    /// How to render the message
    pub severity: Severity,
    /// One line for the user
    pub text: String,
}

/// Read-only view of a session for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Lifecycle state
    pub state: SessionState,
    /// Port in use, if any
    pub port_name: Option<String>,
    /// Outcome of the last operation
    pub last_message: Option<StatusMessage>,
    /// Device output, oldest first
    pub transcript: Vec<String>,
    /// Transcript entries dropped to respect the capacity
    pub evicted: u64,
    /// Traffic on the current link
    pub counters: ChannelCounters,
}

#[derive(Debug, Default)]
struct Status {
    state: SessionState,
    port_name: Option<String>,
    last_message: Option<StatusMessage>,
    counters: ChannelCounters,
}

/// Stays in the slot while blocking I/O runs, so an abandoned call cannot
/// lose it
type SharedChannel = Arc<Mutex<CommandChannel>>;
type Slot = Option<SharedChannel>;

/// The single session to one FaultyCat board
pub struct Session {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    /// Operation lock; holds the channel while connected
    channel: tokio::sync::Mutex<Slot>,
    status: Mutex<Status>,
    transcript: Mutex<Transcript>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn worker_error(e: JoinError) -> SessionError {
    SessionError::Worker(e.to_string())
}

impl Session {
    /// Create a disconnected session that opens ports through `transport`
    pub fn new(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        let transcript = Transcript::new(config.transcript_capacity);
        Self {
            transport,
            config,
            channel: tokio::sync::Mutex::new(None),
            status: Mutex::new(Status::default()),
            transcript: Mutex::new(transcript),
        }
    }

    /// Create a session backed by real serial ports
    pub fn serial(config: SessionConfig) -> Self {
        let transport = SerialTransport::new(config.baud_rate, config.poll_interval());
        Self::new(Arc::new(transport), config)
    }

    /// List available serial ports
    pub fn list_ports() -> Vec<PortInfo> {
        list_ports()
    }

    /// List available USB serial ports
    pub fn usb_ports() -> Vec<PortInfo> {
        filter_usb(list_ports())
    }

    /// Settings this session was built with
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        lock(&self.status).state
    }

    /// Port being opened or in use
    pub fn port_name(&self) -> Option<String> {
        lock(&self.status).port_name.clone()
    }

    /// Outcome of the last operation
    pub fn last_message(&self) -> Option<StatusMessage> {
        lock(&self.status).last_message.clone()
    }

    /// Device output of this session, oldest first
    pub fn transcript(&self) -> Vec<String> {
        lock(&self.transcript).snapshot()
    }

    /// Drop all transcript entries
    pub fn clear_transcript(&self) {
        lock(&self.transcript).clear();
    }

    /// Everything a display needs, taken at once
    pub fn snapshot(&self) -> SessionSnapshot {
        let (transcript, evicted) = {
            let t = lock(&self.transcript);
            (t.snapshot(), t.evicted())
        };
        let status = lock(&self.status);
        SessionSnapshot {
            state: status.state,
            port_name: status.port_name.clone(),
            last_message: status.last_message.clone(),
            transcript,
            evicted,
            counters: status.counters,
        }
    }

    fn set_state(&self, state: SessionState, port_name: Option<String>) {
        let mut status = lock(&self.status);
        debug!(from = ?status.state, to = ?state, "session state change");
        status.state = state;
        status.port_name = port_name;
    }

    fn set_message(&self, severity: Severity, text: impl Into<String>) {
        lock(&self.status).last_message = Some(StatusMessage {
            severity,
            text: text.into(),
        });
    }

    /// Record the outcome of a public operation as the last message
    fn record<T>(&self, result: Result<T, SessionError>) -> Result<T, SessionError> {
        if let Err(e) = &result {
            self.set_message(Severity::Error, e.to_string());
        }
        result
    }

    async fn acquire(&self) -> Result<tokio::sync::MutexGuard<'_, Slot>, SessionError> {
        match self.config.busy_policy {
            BusyPolicy::Reject => self.channel.try_lock().map_err(|_| SessionError::SessionBusy),
            BusyPolicy::Queue => Ok(self.channel.lock().await),
        }
    }

    fn ensure_connected(&self) -> Result<(), SessionError> {
        if self.state() == SessionState::Connected {
            Ok(())
        } else {
            Err(SessionError::NotConnected)
        }
    }

    /// Open `port_name`. Valid only while disconnected.
    pub async fn connect(&self, port_name: &str) -> Result<(), SessionError> {
        let result = self.connect_inner(port_name).await;
        self.record(result)
    }

    async fn connect_inner(&self, port_name: &str) -> Result<(), SessionError> {
        let mut slot = self.acquire().await?;
        if slot.is_some() || self.state() != SessionState::Disconnected {
            return Err(SessionError::AlreadyConnected);
        }

        info!(port = port_name, "connecting");
        self.set_state(SessionState::Connecting, Some(port_name.to_string()));
        let reset = ResetOnDrop::new(self);

        let transport = Arc::clone(&self.transport);
        let name = port_name.to_string();
        let opened = tokio::task::spawn_blocking(move || transport.open(&name))
            .await
            .map_err(worker_error)
            .and_then(|r| r.map_err(SessionError::from));

        match opened {
            Ok(link) => {
                reset.disarm();
                let channel = CommandChannel::new(link, self.config.line_terminator.clone());
                *slot = Some(Arc::new(Mutex::new(channel)));
                self.clear_transcript();
                lock(&self.status).counters = ChannelCounters::default();
                self.set_state(SessionState::Connected, Some(port_name.to_string()));
                self.set_message(Severity::Success, format!("Connected to {}", port_name));
                info!(port = port_name, "connected");
                Ok(())
            }
            Err(e) => {
                warn!(port = port_name, error = %e, "connect failed");
                Err(e)
            }
        }
    }

    /// Close the link and clear the transcript. A no-op when already
    /// disconnected.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let result = self.disconnect_inner().await;
        self.record(result)
    }

    async fn disconnect_inner(&self) -> Result<(), SessionError> {
        let mut slot = self.acquire().await?;
        let channel = slot.take();
        self.clear_transcript();

        let Some(channel) = channel else {
            self.set_state(SessionState::Disconnected, None);
            return Ok(());
        };

        let port = self.port_name();
        self.set_state(SessionState::Disconnecting, port.clone());
        let _reset = ResetOnDrop::new(self);
        match tokio::task::spawn_blocking(move || lock(&channel).close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "error while closing port"),
            Err(e) => warn!(error = %e, "close task failed"),
        }
        self.set_state(SessionState::Disconnected, None);
        self.set_message(Severity::Info, "Disconnected");
        info!(port = port.as_deref().unwrap_or(""), "disconnected");
        Ok(())
    }

    /// Tear down after a transport failure; the device must be reconnected
    fn force_disconnect(&self, slot: &mut Slot, cause: &SessionError) {
        warn!(error = %cause, "transport failure, dropping connection");
        if let Some(shared) = slot.take() {
            let closed = match shared.try_lock() {
                Ok(mut channel) => channel.close(),
                Err(TryLockError::Poisoned(p)) => p.into_inner().close(),
                // An abandoned call still owns it; the link closes when that call ends
                Err(TryLockError::WouldBlock) => Ok(()),
            };
            if let Err(e) = closed {
                debug!(error = %e, "close after failure also failed");
            }
        }
        self.set_state(SessionState::Disconnected, None);
    }

    /// Run `op` against the channel on the blocking pool. Waits for any
    /// abandoned call still using the channel, so writes never interleave.
    async fn with_channel<T, F>(&self, slot: &mut Slot, op: F) -> Result<T, SessionError>
    where
        T: Send + 'static,
        F: FnOnce(&mut CommandChannel) -> Result<T, ProtocolError> + Send + 'static,
    {
        let shared = Arc::clone(slot.as_ref().ok_or(SessionError::NotConnected)?);
        let joined = tokio::task::spawn_blocking(move || {
            let mut channel = lock(&shared);
            let result = op(&mut *channel);
            (result, channel.counters())
        })
        .await;

        let err = match joined {
            Ok((Ok(value), counters)) => {
                lock(&self.status).counters = counters;
                return Ok(value);
            }
            Ok((Err(e), _)) => SessionError::from(e),
            Err(e) => worker_error(e),
        };
        self.force_disconnect(slot, &err);
        Err(err)
    }

    /// Send and collect one reply; caller holds the operation lock
    async fn issue_locked(&self, slot: &mut Slot, command: Command) -> Result<CommandResult, SessionError> {
        let issued_at = Utc::now();
        let text = command.text.clone();
        let window = command.expected_read_window;
        let response = self
            .with_channel(slot, move |channel| channel.send_and_wait(&text, window))
            .await?;

        // Silence is a valid reply but leaves nothing to show
        if !response.is_empty() {
            lock(&self.transcript).append(response.clone());
        }
        Ok(CommandResult {
            command: command.text,
            raw_response: response,
            issued_at,
        })
    }

    /// Issue `command` and collect its reply within its read window
    pub async fn issue(&self, command: Command) -> Result<CommandResult, SessionError> {
        let result: Result<CommandResult, SessionError> = async {
            self.ensure_connected()?;
            let mut slot = self.acquire().await?;
            self.issue_locked(&mut *slot, command).await
        }
        .await;
        self.record(result)
    }

    /// Write `text` without reading a reply
    pub async fn send(&self, text: &str) -> Result<(), SessionError> {
        let result: Result<(), SessionError> = async {
            self.ensure_connected()?;
            let mut slot = self.acquire().await?;
            let line = text.to_string();
            self.with_channel(&mut *slot, move |channel| channel.send(&line)).await
        }
        .await;
        self.record(result)
    }

    /// Issue a known device command with its configured read window
    pub async fn execute(&self, command: DeviceCommand) -> Result<CommandResult, SessionError> {
        self.issue(command.to_command(&self.config)).await
    }

    /// Issue `s` and pick the status word out of the reply
    pub async fn status(&self) -> Result<(CommandResult, Option<BoardStatus>), SessionError> {
        let result = self.execute(DeviceCommand::Status).await?;
        let status = BoardStatus::detect(&result.raw_response);
        Ok((result, status))
    }

    /// Fire the configured glitch (`g`)
    pub async fn execute_glitch(&self) -> Result<CommandResult, SessionError> {
        self.execute(DeviceCommand::ExecuteGlitch).await
    }

    /// Dump captured ADC samples (`di`)
    pub async fn display_adc(&self) -> Result<CommandResult, SessionError> {
        self.execute(DeviceCommand::DisplayAdc).await
    }

    /// Run `sequence` as one operation
    pub async fn run_sequence(&self, sequence: &Sequence) -> Result<SequenceReport, SessionError> {
        let result: Result<SequenceReport, SessionError> = async {
            self.ensure_connected()?;
            let mut slot = self.acquire().await?;
            if slot.is_none() {
                return Err(SessionError::NotConnected);
            }
            let mut runner = LockedRunner {
                session: self,
                slot: &mut *slot,
            };
            sequence.execute(&mut runner).await
        }
        .await;

        if let Ok(report) = &result {
            self.set_message(Severity::Success, format!("{} applied", report.name));
        }
        self.record(result)
    }

    /// Upload glitch parameters and read them back
    pub async fn apply_glitch(&self, config: &GlitchConfig) -> Result<SequenceReport, SessionError> {
        let sequence = self.record(config.sequence(&self.config.timings))?;
        self.run_sequence(&sequence).await
    }

    /// Upload the ADC sample count
    pub async fn apply_adc(&self, config: &AdcConfig) -> Result<SequenceReport, SessionError> {
        let sequence = self.record(config.sequence(&self.config.timings))?;
        self.run_sequence(&sequence).await
    }

    /// Arm, pulse `count` times, disarm
    pub async fn pulse_train(&self, train: &PulseTrain) -> Result<SequenceReport, SessionError> {
        let sequence = self.record(train.sequence(&self.config))?;
        self.run_sequence(&sequence).await
    }

    /// `connect_serial` verb: open the port and report the outcome as text
    pub async fn connect_serial(&self, port_name: &str) -> Result<String, SessionError> {
        self.connect(port_name).await?;
        Ok(format!("Connected to {}", port_name))
    }

    /// `disconnect_serial` verb
    pub async fn disconnect_serial(&self) -> Result<String, SessionError> {
        self.disconnect().await?;
        Ok("Disconnected".to_string())
    }

    /// `send_command` verb: write only
    pub async fn send_command(&self, text: &str) -> Result<String, SessionError> {
        self.send(text).await?;
        Ok(format!("Sent command: {}", text))
    }

    /// `send_command_with_read` verb: write, then read for `read_duration_ms`
    pub async fn send_command_with_read(&self, text: &str, read_duration_ms: u64) -> Result<String, SessionError> {
        let command = Command::new(text, std::time::Duration::from_millis(read_duration_ms));
        Ok(self.issue(command).await?.raw_response)
    }
}

/// Returns the session to `Disconnected` if a lifecycle transition is
/// abandoned before it finishes
struct ResetOnDrop<'a> {
    session: &'a Session,
    armed: bool,
}

impl<'a> ResetOnDrop<'a> {
    fn new(session: &'a Session) -> Self {
        Self { session, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed && self.session.state() != SessionState::Disconnected {
            self.session.set_state(SessionState::Disconnected, None);
        }
    }
}

/// Runs sequence steps on the channel held by an in-flight operation
struct LockedRunner<'a> {
    session: &'a Session,
    slot: &'a mut Slot,
}

impl StepRunner for LockedRunner<'_> {
    async fn run_step(&mut self, command: Command) -> Result<CommandResult, SessionError> {
        self.session.issue_locked(self.slot, command).await
    }
}
