//! Error types for the fluidics controller.
//!
//! Two layers, mirroring the two layers of the hardware stack:
//!
//! - **`TransportError`**: failures of a raw byte channel (the serial line or the
//!   mux controller's telnet link). Write failure, read timeout and a missing
//!   expected substring are kept distinct so callers can tell a dead cable from
//!   a device that answered with the wrong thing.
//! - **`FluidicsError`**: everything the rest of the crate reports. A transport
//!   `ExpectNotFound` is promoted to `ProtocolMismatch` on the way up, tagged
//!   with the device that was being addressed.
//!
//! None of these are retried. The only non-fatal condition in the system, a
//! temperature ramp that misses its deadline, is not an error at all; it is
//! reported as [`crate::thermal::SteadyState::TimedOut`].

use crate::config::ConfigError;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the fluidics error type.
pub type AppResult<T> = std::result::Result<T, FluidicsError>;

/// Failure of a byte-oriented channel.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Write to {port} failed: {source}")]
    Write {
        port: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Read from {port} failed: {source}")]
    Read {
        port: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Read from {port} timed out after {timeout:?}")]
    ReadTimeout { port: String, timeout: Duration },

    #[error("Expected {expected:?} in reply to {command:?}, got {response:?}")]
    ExpectNotFound {
        command: String,
        expected: String,
        response: String,
    },

    #[error("Cannot set baud rate {baud_rate} on {port}: {reason}")]
    BaudRate {
        port: String,
        baud_rate: u32,
        reason: String,
    },

    #[error("{0} is not connected")]
    NotConnected(String),

    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,
}

#[derive(Error, Debug)]
pub enum FluidicsError {
    #[error("Protocol mismatch on {device}: {detail}")]
    ProtocolMismatch { device: String, detail: String },

    #[error("Malformed response from {device}: {response:?}")]
    MalformedResponse { device: String, response: String },

    #[error("Transport failure on {device}: {source}")]
    Transport {
        device: String,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Volume {volume} ul is not an exact step count ({resolution} steps per {capacity} ul)")]
    InexactVolume {
        volume: u32,
        capacity: u32,
        resolution: u32,
    },

    #[error("{device} cannot be driven through a session opened for {session}")]
    WrongTarget { device: String, session: String },
}

impl FluidicsError {
    /// Attach device context to a transport failure.
    ///
    /// `ExpectNotFound` becomes `ProtocolMismatch`; every other transport
    /// failure is kept as-is under `Transport`.
    pub fn from_transport(device: impl Into<String>, err: TransportError) -> Self {
        let device = device.into();
        match err {
            TransportError::ExpectNotFound {
                command,
                expected,
                response,
            } => FluidicsError::ProtocolMismatch {
                device,
                detail: format!("expected {expected:?} in reply to {command:?}, got {response:?}"),
            },
            source => FluidicsError::Transport { device, source },
        }
    }

    /// True for errors that indicate the device said something other than what
    /// the protocol allows.
    pub fn is_protocol_mismatch(&self) -> bool {
        matches!(self, FluidicsError::ProtocolMismatch { .. })
    }
}
