//! Device-level error types

use thiserror::Error;

/// Errors surfaced by operations on a single device.
///
/// The allocation core itself never fails because a device behaved badly;
/// these errors propagate verbatim from device operations to the consumer.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device dropped off the bridge and could not be recovered
    #[error("device {0} is not available")]
    NotAvailable(String),

    /// Raised by the abort recovery installed on a hard shutdown
    #[error("aborted test session")]
    SessionAborted,

    /// A shell command on the device failed
    #[error("shell command failed on {serial}: {message}")]
    Shell { serial: String, message: String },
}

pub type Result<T> = std::result::Result<T, DeviceError>;
