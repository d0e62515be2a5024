//! # FaultyCat Core Library
//!
//! Session controller for the FaultyCat fault-injection board.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Serial port enumeration and a blocking serial transport
//! - A single-device session with an enforced connection lifecycle
//! - Serialized command issue with per-command read windows
//! - Paced multi-step configuration uploads (glitch, ADC, pulse trains)
//! - A bounded transcript of device output
//!
//! ## Example
//!
//! ```rust,ignore
//! use faultycat_core::prelude::*;
//!
//! let session = Session::serial(SessionConfig::default());
//! session.connect("/dev/ttyACM0").await?;
//!
//! let glitch = GlitchConfig {
//!     trigger_type: TriggerType::RisingEdge,
//!     glitch_output: GlitchOutput::LP,
//!     delay_before_pulse: 1000,
//!     pulse_width: 2500,
//!     ..Default::default()
//! };
//! let report = session.apply_glitch(&glitch).await?;
//! println!("{}", report.output);
//! ```

pub mod config;
pub mod protocol;
pub mod sequencer;
pub mod session;
pub mod transcript;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{BusyPolicy, SequenceTimings, SessionConfig};
    pub use crate::protocol::{
        filter_usb, list_ports, BoardStatus, Command, CommandResult, DeviceCommand, Link, PortInfo,
        ProtocolError, Transport,
    };
    pub use crate::sequencer::{
        AdcConfig, GlitchConfig, GlitchOutput, PulseTrain, Sequence, SequenceReport, TriggerPull,
        TriggerType,
    };
    pub use crate::session::{Session, SessionError, SessionSnapshot, SessionState, Severity, StatusMessage};
    pub use crate::transcript::Transcript;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
