//! Session errors

use thiserror::Error;

use crate::protocol::ProtocolError;

/// Errors returned by [`super::Session`] operations
#[derive(Error, Debug)]
pub enum SessionError {
    /// The port could not be opened, written or read. The session is
    /// `Disconnected` afterwards.
    #[error("Transport error: {0}")]
    Transport(#[from] ProtocolError),

    /// Issued while the session is not `Connected`
    #[error("Not connected to a device")]
    NotConnected,

    /// Another operation holds the session
    #[error("Session busy: another operation is in progress")]
    SessionBusy,

    /// `connect` while not `Disconnected`
    #[error("Already connected")]
    AlreadyConnected,

    /// A sequence stopped at `step_index` (0-based); nothing after it was
    /// sent and the configuration is not applied.
    #[error("Configuration failed at step {step_index}: {cause}")]
    Configuration {
        /// Failing step
        step_index: usize,
        /// Replies of the steps before it
        accumulated_output: String,
        /// Why the step failed
        cause: Box<SessionError>,
    },

    /// A value outside what the firmware accepts; nothing was sent
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The blocking I/O task died. The session is `Disconnected` afterwards.
    #[error("I/O worker failed: {0}")]
    Worker(String),
}

impl SessionError {
    /// Whether this failure means the link is gone
    pub fn is_transport(&self) -> bool {
        match self {
            SessionError::Transport(_) | SessionError::Worker(_) => true,
            SessionError::Configuration { cause, .. } => cause.is_transport(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display_includes_cause() {
        let err = SessionError::Configuration {
            step_index: 3,
            accumulated_output: "co\r\n".into(),
            cause: Box::new(ProtocolError::ConnectionLost("broken pipe".into()).into()),
        };
        let text = err.to_string();
        assert!(text.contains("step 3"));
        assert!(text.contains("broken pipe"));
        assert!(err.is_transport());
    }

    #[test]
    fn test_contract_errors_are_not_transport() {
        assert!(!SessionError::NotConnected.is_transport());
        assert!(!SessionError::SessionBusy.is_transport());
        assert!(!SessionError::InvalidParameter("x".into()).is_transport());
    }
}
