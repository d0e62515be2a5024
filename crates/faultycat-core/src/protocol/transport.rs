//! Transport boundary
//!
//! The session never talks to a serial port directly. It asks a [`Transport`]
//! to open a named port and then drives the returned [`Link`]. Both calls are
//! blocking; the session runs them on the blocking thread pool.

use std::time::Duration;

use super::ProtocolError;

/// Opens links to named ports.
pub trait Transport: Send + Sync {
    /// Open the port called `port_name`.
    fn open(&self, port_name: &str) -> Result<Box<dyn Link>, ProtocolError>;
}

/// One open, exclusively owned connection to a device.
pub trait Link: Send {
    /// Write every byte of `data`.
    fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError>;

    /// Collect whatever the device sends within `window`.
    ///
    /// Returning no bytes is not an error: many commands echo nothing, or
    /// echo later than the window allows.
    fn read(&mut self, window: Duration) -> Result<Vec<u8>, ProtocolError>;

    /// Release the underlying handle.
    fn close(&mut self) -> Result<(), ProtocolError>;
}
