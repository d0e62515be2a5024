//! Serial Protocol Communication
//!
//! Implements the FaultyCat line protocol: short ASCII tokens terminated by a
//! newline, answered by free text with no framing or acknowledgement.

mod channel;
pub mod commands;
mod error;
pub mod serial;
pub mod transport;

pub use channel::{ChannelCounters, CommandChannel};
pub use commands::{BoardStatus, Command, CommandResult, DeviceCommand};
pub use error::ProtocolError;
pub use serial::{filter_usb, list_ports, PortInfo, SerialTransport};
pub use transport::{Link, Transport};

/// Default baud rate for the FaultyCat USB CDC port
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Line terminator the firmware expects after every command
pub const DEFAULT_LINE_TERMINATOR: &str = "\n";

/// Read window for commands without a device-specific one, in milliseconds
pub const DEFAULT_READ_WINDOW_MS: u64 = 500;

/// Largest single read accepted from the device
pub const MAX_READ_SIZE: usize = 64 * 1024;
