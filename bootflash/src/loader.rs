//! Loader session adapter.
//!
//! The device-side ROM loader protocol (framing, chip identification,
//! synchronization, raw flash commands) lives in an external library. This
//! module defines the black-box contract that library must satisfy and a
//! thin stateful wrapper (open the transport, synchronize, record the chip
//! identity, expose write/erase/reset) so the rest of the core never sees
//! protocol details.

use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Result, classify_open_failure};
use crate::port::{Port, SerialConfig, SerialHost};

/// Settle time between the collaborator's reset command and the redundant
/// control-line pulse.
const RESET_SETTLE: Duration = Duration::from_millis(100);

/// Hold time for the redundant control-line reset pulse.
const RESET_PULSE_HOLD: Duration = Duration::from_millis(100);

/// An unsynchronized-to-synchronized control channel to a device's
/// ROM-resident update agent.
///
/// Implemented by the external loader-protocol library; this core treats it
/// as a black box.
pub trait LoaderSession {
    /// Perform the synchronization handshake and return the chip identity.
    ///
    /// Implementations must fail with
    /// [`crate::Error::SynchronizationFailed`] when the handshake never
    /// completes within their own timeout, so callers can distinguish it
    /// from transport-level failures.
    fn synchronize(&mut self) -> Result<String>;

    /// Write one segment to flash, reporting `(written, total)` bytes.
    fn write_segment(
        &mut self,
        address: u32,
        data: &[u8],
        on_progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()>;

    /// Erase the entire flash. Long-running and non-cancelable from this
    /// layer's perspective.
    fn erase_flash(&mut self) -> Result<()>;

    /// Issue the loader's reset command.
    fn hard_reset(&mut self) -> Result<()>;

    /// Access the underlying transport, for control-line pulses layered on
    /// top of the protocol.
    fn port_mut(&mut self) -> &mut dyn Port;

    /// Release the transport. The session cannot be used afterwards.
    fn close(&mut self);
}

/// Factory binding an opened port to a new, unsynchronized loader session.
pub trait LoaderProtocol {
    /// Construct a session over the given transport.
    fn bind(&self, port: Box<dyn Port>) -> Result<Box<dyn LoaderSession>>;
}

/// State wrapper around an open, synchronized loader session.
pub struct LoaderHandle {
    session: Box<dyn LoaderSession>,
    chip: String,
    port_name: String,
}

impl LoaderHandle {
    /// Open the transport on `port_name`, synchronize, and record the chip
    /// identity.
    ///
    /// Fails when the port cannot be opened at all (classified so a busy
    /// port is distinguishable) or when synchronization never completes.
    pub fn open(
        protocol: &dyn LoaderProtocol,
        host: &dyn SerialHost,
        port_name: &str,
        baud_rate: u32,
    ) -> Result<Self> {
        debug!("Opening loader transport on {port_name} at {baud_rate} baud");
        let config = SerialConfig::new(port_name, baud_rate);
        let port = host
            .open(&config)
            .map_err(|e| classify_open_failure(port_name, e))?;

        let mut session = protocol.bind(port)?;
        let chip = match session.synchronize() {
            Ok(chip) => chip,
            Err(e) => {
                session.close();
                return Err(e);
            },
        };
        info!("Loader session open on {port_name}: {chip}");

        Ok(Self {
            session,
            chip,
            port_name: port_name.to_string(),
        })
    }

    /// Chip identity negotiated during synchronization.
    pub fn chip(&self) -> &str {
        &self.chip
    }

    /// Name of the port the session is bound to.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Write one segment, passing collaborator errors through untouched.
    pub fn write_segment(
        &mut self,
        address: u32,
        data: &[u8],
        on_progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()> {
        debug!(
            "Writing {} bytes to {:#010x}",
            data.len(),
            address
        );
        self.session.write_segment(address, data, on_progress)
    }

    /// Erase the entire flash.
    pub fn erase_all(&mut self) -> Result<()> {
        info!("Erasing entire flash");
        self.session
            .erase_flash()
            .map_err(|e| crate::Error::EraseFailed(e.to_string()))
    }

    /// Reset the device out of bootloader mode.
    ///
    /// Runs the collaborator's reset command and then independently pulses
    /// the control lines, because the command alone does not work on every
    /// board revision. Neither path is fatal; firmware is already written
    /// by the time this runs.
    pub fn hard_reset(&mut self) {
        info!("Resetting device");
        if let Err(e) = self.session.hard_reset() {
            warn!("Loader reset command failed: {e}");
        }

        thread::sleep(RESET_SETTLE);
        if let Err(e) = pulse_reset_lines(self.session.port_mut()) {
            warn!("Control-line reset failed: {e}");
            warn!("Automatic reset may not have worked; press RESET on the device");
        }
    }

    /// Close the session and release the port.
    pub fn close(&mut self) {
        debug!("Closing loader session on {}", self.port_name);
        self.session.close();
    }
}

/// Redundant hardware reset: assert RTS with DTR deasserted, hold, clear
/// both.
fn pulse_reset_lines(port: &mut dyn Port) -> Result<()> {
    port.set_rts(true)?;
    port.set_dtr(false)?;
    thread::sleep(RESET_PULSE_HOLD);
    port.set_rts(false)?;
    port.set_dtr(false)?;
    Ok(())
}
