//! Error types for bootflash.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for bootflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for bootflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The port could not be opened because another process holds it.
    #[error("Access to {port} denied: {reason}")]
    PortAccessDenied {
        /// Port name/path.
        port: String,
        /// Underlying platform error text.
        reason: String,
    },

    /// A reset pulse was sent but no new port appeared.
    #[error("Device did not re-enumerate within {waited:?}")]
    DeviceNotReenumerated {
        /// How long enumeration was polled before giving up.
        waited: Duration,
    },

    /// The platform or device does not support control-line assertion.
    #[error("Control-line reset not supported: {0}")]
    SignalUnsupported(String),

    /// The loader handshake never completed.
    #[error("Loader synchronization failed: {0}")]
    SynchronizationFailed(String),

    /// A segment write failed mid-flash. Earlier segments stay written; the
    /// device may be left in a non-bootable state.
    #[error(
        "Write failed for segment '{label}' at {address:#010x}: {reason}. \
         {written} of {total} segments were fully written and '{label}' may be \
         partially written; the device may be left in a non-bootable state"
    )]
    SegmentWriteFailed {
        /// Label of the segment that failed.
        label: String,
        /// Flash offset of the segment that failed.
        address: u32,
        /// Number of segments fully written before the failure.
        written: usize,
        /// Total number of segments in the job.
        total: usize,
        /// Underlying failure text.
        reason: String,
    },

    /// Full-chip erase failed.
    #[error("Flash erase failed: {0}")]
    EraseFailed(String),

    /// No device was chosen during port selection.
    #[error("No device selected")]
    UserCancelledSelection,

    /// A firmware payload could not be fetched.
    #[error("Failed to fetch {locator}: {reason}")]
    Fetch {
        /// URL or local path that failed.
        locator: String,
        /// Underlying failure text.
        reason: String,
    },

    /// A flash job failed validation before any device interaction.
    #[error("Invalid flash job: {0}")]
    InvalidJob(String),

    /// An operation was requested in a session state that cannot accept it.
    /// This rejects the request without disturbing the session.
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// Session state at the time of the request.
        state: String,
    },
}

impl Error {
    /// Operator guidance matched to the error kind, for pairing with the
    /// summary notification a presentation layer shows.
    #[must_use]
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::PortAccessDenied { .. } => Some(
                "The port may be in use by another application (IDE, serial \
                 monitor). Close it and try again.",
            ),
            Self::DeviceNotReenumerated { .. } => Some(
                "Enter bootloader mode manually: hold BOOT, press and release \
                 RESET, release BOOT, then connect.",
            ),
            Self::SignalUnsupported(_) => Some(
                "This platform or adapter cannot drive DTR/RTS. Use the touch \
                 reset or enter bootloader mode manually.",
            ),
            Self::SynchronizationFailed(_) => Some(
                "Re-trigger bootloader entry, or enter bootloader mode \
                 manually and make sure no other program is using the port.",
            ),
            Self::SegmentWriteFailed { .. } => Some(
                "The device may not boot until a full flash succeeds. Keep it \
                 powered, reconnect and re-run the complete flash.",
            ),
            Self::EraseFailed(_) => Some("Reconnect and retry the erase."),
            Self::UserCancelledSelection => {
                Some("Select the device's serial port to continue.")
            },
            _ => None,
        }
    }

    /// Whether this error leaves the device at risk of holding a partial
    /// firmware image.
    #[must_use]
    pub fn is_partial_flash(&self) -> bool {
        matches!(self, Self::SegmentWriteFailed { .. })
    }
}

/// Reclassify a failed port open so remediation can distinguish "another
/// process holds the port" from other serial failures.
#[cfg(feature = "native")]
pub(crate) fn classify_open_failure(port: &str, err: Error) -> Error {
    match err {
        Error::Serial(e) if is_access_denied(&e) => Error::PortAccessDenied {
            port: port.to_string(),
            reason: e.to_string(),
        },
        other => other,
    }
}

#[cfg(not(feature = "native"))]
pub(crate) fn classify_open_failure(_port: &str, err: Error) -> Error {
    err
}

#[cfg(feature = "native")]
fn is_access_denied(err: &serialport::Error) -> bool {
    match err.kind() {
        serialport::ErrorKind::Io(kind) => matches!(
            kind,
            io::ErrorKind::PermissionDenied | io::ErrorKind::ResourceBusy
        ),
        _ => {
            let text = err.to_string().to_lowercase();
            text.contains("busy") || text.contains("denied") || text.contains("in use")
        },
    }
}
