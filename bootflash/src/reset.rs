//! Device-reset strategies for entering bootloader mode.
//!
//! Each strategy is a distinct, independently invokable action; nothing here
//! retries or advances to another strategy automatically. "Success" means
//! only that the host accepted the pulse sequence; whether the device
//! actually reset is verified downstream by port re-enumeration.

use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Error, Result, classify_open_failure};
use crate::port::{Port, SerialConfig, SerialHost};

/// Baud rate reserved by convention to signal "enter bootloader" when opened.
pub const TOUCH_BAUD: u32 = 1200;

/// Default data baud rate for the control-line reset pulse.
pub const SIGNAL_BAUD: u32 = 115_200;

/// How long the touch-reset open is held before closing.
const TOUCH_HOLD: Duration = Duration::from_millis(100);

/// Hold after asserting the reset line.
const SIGNAL_HOLD_RESET: Duration = Duration::from_millis(100);

/// Hold after asserting the boot-select line.
const SIGNAL_HOLD_BOOT: Duration = Duration::from_millis(50);

/// Discriminant of a reset strategy, recorded for diagnostics so failure
/// guidance matches what was actually attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StrategyKind {
    /// 1200-baud touch reset.
    Touch,
    /// DTR/RTS pulse reset.
    SignalToggle,
    /// Operator asserts the device is already in bootloader mode.
    Manual,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Touch => write!(f, "touch"),
            Self::SignalToggle => write!(f, "signal-toggle"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// A way of getting the device into bootloader mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetStrategy {
    /// Open the port at a distinguished low baud rate, hold briefly, close.
    Touch {
        /// Baud rate used for the touch open.
        baud: u32,
    },
    /// Open at a data baud rate and drive DTR/RTS through the
    /// reset-into-bootloader pulse pattern.
    SignalToggle {
        /// Baud rate used while pulsing the control lines.
        baud: u32,
    },
    /// No device interaction; the operator has already put the device in
    /// bootloader mode by hand and selects the target port at connect time.
    Manual,
}

impl ResetStrategy {
    /// Touch reset at the conventional baud rate.
    pub fn touch() -> Self {
        Self::Touch { baud: TOUCH_BAUD }
    }

    /// Control-line reset at the default data baud rate.
    pub fn signal_toggle() -> Self {
        Self::SignalToggle { baud: SIGNAL_BAUD }
    }

    /// The strategy's discriminant.
    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Touch { .. } => StrategyKind::Touch,
            Self::SignalToggle { .. } => StrategyKind::SignalToggle,
            Self::Manual => StrategyKind::Manual,
        }
    }

    /// Whether this strategy skips re-enumeration detection and requires the
    /// operator to pick the target port explicitly at connect time.
    pub fn requires_user_port_selection(&self) -> bool {
        matches!(self, Self::Manual)
    }

    /// Execute the reset against the given port.
    ///
    /// Port-open refusals classify as [`Error::PortAccessDenied`]; control
    /// line refusals as [`Error::SignalUnsupported`]. `Manual` touches no
    /// hardware and always succeeds.
    pub fn attempt(&self, host: &dyn SerialHost, port_name: &str) -> Result<()> {
        match self {
            Self::Touch { baud } => touch_reset(host, port_name, *baud),
            Self::SignalToggle { baud } => signal_toggle_reset(host, port_name, *baud),
            Self::Manual => {
                info!("Manual bootloader entry asserted; no reset sent");
                Ok(())
            },
        }
    }
}

fn open_for_reset(host: &dyn SerialHost, port_name: &str, baud: u32) -> Result<Box<dyn Port>> {
    host.open(&SerialConfig::new(port_name, baud))
        .map_err(|e| classify_open_failure(port_name, e))
}

/// Open at the touch baud, hold, close. The open/close sequence completing is
/// the entire success condition.
fn touch_reset(host: &dyn SerialHost, port_name: &str, baud: u32) -> Result<()> {
    info!("Performing {baud}-bps touch reset on {port_name}");

    let mut port = open_for_reset(host, port_name, baud)?;
    thread::sleep(TOUCH_HOLD);
    if let Err(e) = port.close() {
        warn!("Close after touch reset failed: {e}");
    }

    debug!("Touch reset sequence sent");
    Ok(())
}

/// Replicate the hardware reset-into-bootloader pulse on DTR/RTS:
/// assert reset (RTS) with boot-select (DTR) clear, then swap to latch the
/// boot pin while releasing reset, then release everything.
fn signal_toggle_reset(host: &dyn SerialHost, port_name: &str, baud: u32) -> Result<()> {
    info!("Performing control-line reset on {port_name}");

    let mut port = open_for_reset(host, port_name, baud)?;
    let result = pulse_bootloader_lines(port.as_mut());
    if let Err(e) = port.close() {
        warn!("Close after control-line reset failed: {e}");
    }
    result
}

fn pulse_bootloader_lines(port: &mut dyn Port) -> Result<()> {
    let sequence: &[(&str, bool, bool, Duration)] = &[
        ("assert reset", false, true, SIGNAL_HOLD_RESET),
        ("latch boot select", true, false, SIGNAL_HOLD_BOOT),
        ("release", false, false, Duration::ZERO),
    ];

    for (step, dtr, rts, hold) in sequence {
        debug!("Reset pulse: {step} (DTR={dtr}, RTS={rts})");
        port.set_dtr(*dtr)
            .and_then(|()| port.set_rts(*rts))
            .map_err(|e| Error::SignalUnsupported(e.to_string()))?;
        if !hold.is_zero() {
            thread::sleep(*hold);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockHost;

    #[test]
    fn test_kinds_and_selection_requirements() {
        assert_eq!(ResetStrategy::touch().kind(), StrategyKind::Touch);
        assert_eq!(
            ResetStrategy::signal_toggle().kind(),
            StrategyKind::SignalToggle
        );
        assert_eq!(ResetStrategy::Manual.kind(), StrategyKind::Manual);

        assert!(!ResetStrategy::touch().requires_user_port_selection());
        assert!(ResetStrategy::Manual.requires_user_port_selection());
    }

    #[test]
    fn test_touch_reset_opens_at_touch_baud_and_closes() {
        let host = MockHost::new();
        let result = ResetStrategy::touch().attempt(&host, "/dev/ttyACM0");
        assert!(result.is_ok());

        let opened = host.opened();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0], ("/dev/ttyACM0".to_string(), TOUCH_BAUD));

        let events = host.port_events();
        assert_eq!(events.last().map(String::as_str), Some("close"));
    }

    #[test]
    fn test_touch_reset_classifies_busy_port() {
        let host = MockHost::new();
        host.fail_next_open(Error::PortAccessDenied {
            port: "/dev/ttyACM0".to_string(),
            reason: "resource busy".to_string(),
        });

        let result = ResetStrategy::touch().attempt(&host, "/dev/ttyACM0");
        assert!(matches!(result, Err(Error::PortAccessDenied { .. })));
        // No other strategy gets attempted behind the caller's back.
        assert_eq!(host.opened().len(), 1);
    }

    #[test]
    fn test_signal_toggle_drives_expected_line_sequence() {
        let host = MockHost::new();
        let result = ResetStrategy::signal_toggle().attempt(&host, "COM7");
        assert!(result.is_ok());

        let opened = host.opened();
        assert_eq!(opened[0], ("COM7".to_string(), SIGNAL_BAUD));

        let events = host.port_events();
        let expected = vec![
            "dtr=false",
            "rts=true",
            "dtr=true",
            "rts=false",
            "dtr=false",
            "rts=false",
            "close",
        ];
        assert_eq!(
            events.iter().map(String::as_str).collect::<Vec<_>>(),
            expected
        );
    }

    #[test]
    fn test_signal_toggle_reports_unsupported_control_lines() {
        let host = MockHost::new();
        host.fail_signals();

        let result = ResetStrategy::signal_toggle().attempt(&host, "COM7");
        assert!(matches!(result, Err(Error::SignalUnsupported(_))));
    }

    #[test]
    fn test_manual_touches_no_hardware() {
        let host = MockHost::new();
        let result = ResetStrategy::Manual.attempt(&host, "ignored");
        assert!(result.is_ok());
        assert!(host.opened().is_empty());
    }
}
