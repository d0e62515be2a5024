//! Protocol errors

use thiserror::Error;

/// Errors raised by the transport layer underneath a session
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The serial driver rejected an operation
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// No device behind the port name
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// The link broke while in use
    #[error("Connection to device lost: {0}")]
    ConnectionLost(String),

    /// Underlying read or write failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<serialport::Error> for ProtocolError {
    fn from(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::NoDevice => ProtocolError::PortNotFound(err.description),
            _ => ProtocolError::SerialError(err.description),
        }
    }
}
