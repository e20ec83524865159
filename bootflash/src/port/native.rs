//! Native serial port implementation using the `serialport` crate.
//!
//! Provides the serial stack for desktop platforms (Linux, macOS, Windows),
//! including USB-bridge classification used to pick a likely device port when
//! no interactive selector is installed.

use std::io::{Read, Write};
use std::time::Duration;

use log::{debug, info, trace};
use serialport::ClearBuffer;

use crate::error::{Error, Result};
use crate::port::{Port, PortInfo, SerialConfig, SerialHost};

/// Known USB-to-UART bridges found on common development boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbBridge {
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// FTDI FT232/FT2232/FT4232 USB-to-Serial converter.
    Ftdi,
    /// Espressif native USB (built-in USB-CDC on recent chips).
    EspressifUsb,
    /// Unknown device.
    Unknown,
}

impl UsbBridge {
    /// Classify a vendor ID.
    #[must_use]
    pub fn from_vid(vid: u16) -> Self {
        match vid {
            // CH340/CH341 family
            0x1A86 => Self::Ch340,
            // Silicon Labs CP210x family
            0x10C4 => Self::Cp210x,
            // FTDI family
            0x0403 => Self::Ftdi,
            // Espressif native USB-CDC
            0x303A => Self::EspressifUsb,
            _ => Self::Unknown,
        }
    }

    /// Get a human-readable name for the bridge.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::EspressifUsb => "Espressif USB",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known/expected bridge type.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Native serial port implementation.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    baud_rate: u32,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        trace!(
            "Opening {} at {} baud",
            config.port_name, config.baud_rate
        );
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .open()?;

        Ok(Self {
            port: Some(port),
            name: config.port_name.clone(),
            baud_rate: config.baud_rate,
        })
    }
}

impl Port for NativePort {
    fn name(&self) -> &str {
        &self.name
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.set_baud_rate(baud_rate)?;
        }
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.set_timeout(timeout)?;
        }
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        trace!("Setting DTR to {level}");
        if let Some(ref mut p) = self.port {
            p.write_data_terminal_ready(level)?;
        }
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        trace!("Setting RTS to {level}");
        if let Some(ref mut p) = self.port {
            p.write_request_to_send(level)?;
        }
        Ok(())
    }

    fn clear_buffers(&mut self) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.clear(ClearBuffer::All)?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn close(&mut self) -> Result<()> {
        // Take ownership of the port and let it drop (close)
        self.port.take();
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(|p| p.read(buf))
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(|p| p.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(std::io::Write::flush)
    }
}

/// Callback deciding which of the enumerated ports to target.
pub type PortSelector = dyn Fn(&[PortInfo]) -> Option<PortInfo>;

/// Native serial host backed by the `serialport` crate.
///
/// Without a selector installed, [`SerialHost::request_user_port`] picks the
/// most likely device port automatically: native USB first, then known
/// USB-UART bridges, then the first available port.
#[derive(Default)]
pub struct NativeHost {
    selector: Option<Box<PortSelector>>,
}

impl NativeHost {
    /// Create a host with automatic port selection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install an interactive selector (e.g., a terminal prompt) consulted
    /// whenever a port must be chosen. Returning `None` means the operator
    /// cancelled.
    #[must_use]
    pub fn with_selector(
        mut self,
        selector: impl Fn(&[PortInfo]) -> Option<PortInfo> + 'static,
    ) -> Self {
        self.selector = Some(Box::new(selector));
        self
    }
}

impl SerialHost for NativeHost {
    fn list_ports(&self) -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports().map_err(Error::Serial)?;

        Ok(ports
            .into_iter()
            .map(|p| {
                let mut info = PortInfo::named(p.port_name);
                if let serialport::SerialPortType::UsbPort(usb) = p.port_type {
                    trace!(
                        "Found USB port: {} (VID: {:04X}, PID: {:04X})",
                        info.name, usb.vid, usb.pid
                    );
                    info.vid = Some(usb.vid);
                    info.pid = Some(usb.pid);
                    info.manufacturer = usb.manufacturer;
                    info.product = usb.product;
                    info.serial_number = usb.serial_number;
                }
                info
            })
            .collect())
    }

    fn request_user_port(&self) -> Result<PortInfo> {
        let ports = self.list_ports().unwrap_or_else(|e| {
            debug!("Port enumeration failed during selection: {e}");
            Vec::new()
        });

        if let Some(selector) = &self.selector {
            return selector(&ports).ok_or(Error::UserCancelledSelection);
        }

        // Native USB device ports first
        if let Some(port) = ports
            .iter()
            .find(|p| p.vid.is_some_and(|vid| UsbBridge::from_vid(vid) == UsbBridge::EspressifUsb))
        {
            info!("Auto-selected native USB device: {}", port.name);
            return Ok(port.clone());
        }

        // Then known USB-UART bridges
        if let Some(port) = ports
            .iter()
            .find(|p| p.vid.is_some_and(|vid| UsbBridge::from_vid(vid).is_known()))
        {
            let bridge = port.vid.map_or(UsbBridge::Unknown, UsbBridge::from_vid);
            info!(
                "Auto-selected {} USB-UART bridge: {}",
                bridge.name(),
                port.name
            );
            return Ok(port.clone());
        }

        // Finally any available port
        if let Some(port) = ports.into_iter().next() {
            info!("Using first available port: {}", port.name);
            return Ok(port);
        }

        Err(Error::UserCancelledSelection)
    }

    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Port>> {
        Ok(Box::new(NativePort::open(config)?))
    }
}
