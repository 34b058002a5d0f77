//! Error types for the ZNP driver
//!
//! # Error Recovery Strategies
//!
//! Different error types require different recovery approaches:
//!
//! ## Fatal Errors (Reconnect Required)
//!
//! - **`Disconnected`**: The serial link died or the bus was shut down. Every
//!   pending request fails with this error. The owning application may build a
//!   fresh driver (the reconnect supervisor does this automatically when
//!   enabled).
//!
//! - **`ThreadPanic`**: A bus thread panicked. Treated the same as a
//!   disconnect.
//!
//! ## Transient Errors (Retry Recommended)
//!
//! - **`Timeout`**: No SRSP or indication arrived before the deadline. The
//!   SREQ lane advances; the next request is unaffected.
//!
//! - **`CommandStatus`**: The firmware returned a non-success status. Some
//!   statuses (buffer full, channel access failure) go away on their own and
//!   the data-request path retries them automatically.
//!
//! ## Protocol Errors (Log and Continue)
//!
//! - **`Framing`**: A frame failed FCS or length validation. The codec drops
//!   it, bumps a counter and resynchronises; nothing propagates to callers.
//!
//! - **`Protocol`**: The firmware responded with something unexpected (SRSP
//!   header mismatch, undecodable field, unknown command). Surfaced to the
//!   affected waiter only; the bus keeps running.

use crate::frame::MtFrame;
use crate::types::Status;
use thiserror::Error;

/// Framing-level failures detected by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    /// FCS byte did not match the XOR of the frame contents
    BadFcs,
    /// Length field exceeded the 250-byte payload maximum
    BadLength,
    /// Stream ended inside a frame
    Truncated,
}

/// Protocol-level failures above the framing layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// An SRSP arrived whose header does not match the in-flight SREQ
    UnexpectedSrsp { expected: String, frame: String },
    /// The firmware rejected the command as unknown
    UnknownCommand { command: String },
    /// A frame payload could not be decoded into its typed fields
    FieldDecode { command: String, frame: String },
}

/// Errors that can occur in the ZNP driver
///
/// See module-level documentation for recovery strategies.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Framing error: {0:?}")]
    Framing(FramingError),

    #[error("Protocol error: {0:?}")]
    Protocol(ProtocolError),

    #[error("Timed out waiting for {command}")]
    Timeout { command: String },

    #[error("Request was cancelled")]
    Cancelled,

    #[error("Disconnected from the adapter")]
    Disconnected,

    #[error("Thread panic")]
    ThreadPanic,

    #[error("{command} failed with status {status:?}")]
    CommandStatus { command: String, status: Status },

    #[error("Invalid state transition: {0}")]
    State(String),

    #[error("NV item does not exist: {item}")]
    NvramMissing { item: String },

    #[error("NV item {item} read back differently after restore")]
    NvramMismatch { item: String },

    #[error("Backup error: {0}")]
    Backup(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Bootloader error: {0}")]
    Bootloader(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Build a `CommandStatus` error for a named command.
    pub fn command_status(command: &str, status: Status) -> Self {
        Error::CommandStatus {
            command: command.to_string(),
            status,
        }
    }

    /// Build a field-decode protocol error, rendering the offending frame.
    pub fn field_decode(command: &str, frame: &MtFrame) -> Self {
        Error::Protocol(ProtocolError::FieldDecode {
            command: command.to_string(),
            frame: frame.to_string(),
        })
    }

    /// Whether the bus is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Disconnected | Error::ThreadPanic | Error::Serial(_) | Error::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Fail with `CommandStatus` unless the firmware reported success.
pub fn ensure_success(command: &str, status: Status) -> Result<()> {
    if status == Status::Success {
        Ok(())
    } else {
        Err(Error::command_status(command, status))
    }
}
