//! Command channel
//!
//! Frames outgoing commands and collects the reply inside a caller-chosen
//! window. The device offers no framing, so a reply is simply "whatever
//! arrived before the window closed".

use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::{Link, ProtocolError};

/// Cumulative traffic through one channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelCounters {
    /// Bytes written, terminators included
    pub tx_bytes: u64,
    /// Bytes read
    pub rx_bytes: u64,
    /// Commands written
    pub tx_commands: u64,
    /// Reads that returned at least one byte
    pub rx_replies: u64,
}

/// Serialized write/read access to one open [`Link`]
pub struct CommandChannel {
    link: Box<dyn Link>,
    terminator: String,
    counters: ChannelCounters,
}

impl CommandChannel {
    /// Wrap an open link; `terminator` follows every command
    pub fn new(link: Box<dyn Link>, terminator: impl Into<String>) -> Self {
        Self {
            link,
            terminator: terminator.into(),
            counters: ChannelCounters::default(),
        }
    }

    /// Traffic so far
    pub fn counters(&self) -> ChannelCounters {
        self.counters
    }

    /// Write `command` plus the line terminator without reading a reply
    pub fn send(&mut self, command: &str) -> Result<(), ProtocolError> {
        let mut frame = Vec::with_capacity(command.len() + self.terminator.len());
        frame.extend_from_slice(command.as_bytes());
        frame.extend_from_slice(self.terminator.as_bytes());

        self.link.write_all(&frame)?;
        self.counters.tx_bytes = self.counters.tx_bytes.saturating_add(frame.len() as u64);
        self.counters.tx_commands = self.counters.tx_commands.saturating_add(1);
        debug!(command, bytes = frame.len(), "command written");
        Ok(())
    }

    /// Write `command`, then perform exactly one read bounded by `window`.
    ///
    /// An empty reply is a valid result.
    pub fn send_and_wait(&mut self, command: &str, window: Duration) -> Result<String, ProtocolError> {
        self.send(command)?;
        let bytes = self.link.read(window)?;
        self.counters.rx_bytes = self.counters.rx_bytes.saturating_add(bytes.len() as u64);
        if !bytes.is_empty() {
            self.counters.rx_replies = self.counters.rx_replies.saturating_add(1);
        }
        debug!(command, bytes = bytes.len(), window_ms = window.as_millis() as u64, "reply collected");
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Release the link
    pub fn close(&mut self) -> Result<(), ProtocolError> {
        self.link.close()
    }
}
