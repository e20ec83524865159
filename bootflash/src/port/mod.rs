//! Serial port abstraction.
//!
//! The core never performs raw byte I/O itself; it opens, closes and
//! configures ports and hands them to the loader protocol. The `Port` trait
//! keeps everything above it platform-agnostic:
//!
//! ```text
//! +---------------------+
//! |  Session / Loader   |
//! +----------+----------+
//!            |
//!            v
//! +----------+----------+
//! |     Port trait      |
//! +----------+----------+
//!            |
//!            v
//! +----------+----------+
//! |  Native SerialPort  |
//! |    (serialport)     |
//! +---------------------+
//! ```
//!
//! A port handle is exclusively owned: only one open handle per physical
//! device exists at a time, and ownership transfer between components is
//! close-then-reopen, never sharing.

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Default read/write timeout for freshly opened ports.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_millis(1000);

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information as reported by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Build a bare entry carrying only a port name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }
}

/// An exclusively-owned, open serial port handle.
pub trait Port: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Set the baud rate.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()>;

    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Set DTR (Data Terminal Ready) line state.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Set RTS (Request To Send) line state.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Clear input/output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Whether the handle still holds the underlying device.
    fn is_open(&self) -> bool;

    /// Close the port and release the device.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;
}

/// Platform entry points for port enumeration, selection and opening.
///
/// This is the boundary to the host's serial stack; everything above it is
/// testable without hardware.
pub trait SerialHost {
    /// List all serial ports the process may access. Never blocks on device
    /// I/O beyond the enumeration query itself.
    fn list_ports(&self) -> Result<Vec<PortInfo>>;

    /// Ask for the port the operator wants to target.
    ///
    /// Returns [`crate::Error::UserCancelledSelection`] when nothing was
    /// chosen.
    fn request_user_port(&self) -> Result<PortInfo>;

    /// Open a port for exclusive use.
    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Port>>;
}

// Re-export the native implementation
#[cfg(feature = "native")]
pub use native::{NativeHost, NativePort, UsbBridge};
