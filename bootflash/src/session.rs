//! Top-level flashing session state machine.
//!
//! A [`SessionController`] is an owned, constructible value; callers
//! instantiate and hold it; there are no ambient globals. It ties the reset
//! strategies, the port registry, the loader adapter and the orchestrator
//! together behind a small set of commands: `enter_bootloader`, `connect`,
//! `flash`, `erase_and_flash`, `disconnect`.
//!
//! One controller drives one logical session. Only one command is in flight
//! at a time; starting a new top-level action first force-releases resources
//! a previous attempt left behind. No command retries by itself: every
//! retry is a fresh, operator-triggered invocation.

use std::time::Duration;

use log::{error, info};

use crate::error::{Error, Result};
use crate::job::FlashJob;
use crate::loader::{LoaderHandle, LoaderProtocol};
use crate::orchestrator::FlashOrchestrator;
use crate::port::{PortInfo, SerialHost};
use crate::progress::EventSink;
use crate::registry::{DEFAULT_POLL_INTERVAL, PortRegistry};
use crate::reset::{ResetStrategy, StrategyKind};
use crate::source::FirmwareSource;

/// Baud rate used for the loader session.
pub const DEFAULT_SESSION_BAUD: u32 = 115_200;

/// How long to wait for the device to re-enumerate after a reset pulse.
pub const DEFAULT_RECONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionState {
    /// Nothing in progress; the starting and resting state.
    Idle,
    /// Waiting for a target port to be chosen.
    SelectingDevice,
    /// A reset strategy is executing.
    ResetTriggered,
    /// Waiting for the device to re-enumerate after a reset.
    AwaitingReconnect,
    /// Bootloader entry finished; ready to open a loader session.
    Connecting,
    /// Loader session open and synchronized.
    Connected,
    /// A flash job is running.
    Flashing,
    /// Session torn down; transitions straight back to `Idle`.
    Disconnected,
}

impl SessionState {
    /// Stable name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::SelectingDevice => "SelectingDevice",
            Self::ResetTriggered => "ResetTriggered",
            Self::AwaitingReconnect => "AwaitingReconnect",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Flashing => "Flashing",
            Self::Disconnected => "Disconnected",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a bootloader-entry attempt.
#[derive(Debug, Clone)]
pub struct BootloaderEntry {
    /// The re-enumerated port, when one was detected.
    pub port: Option<PortInfo>,
    /// Whether the operator must pick the port at connect time (manual
    /// strategy, or re-enumeration timed out).
    pub manual_selection_required: bool,
    /// Which strategy produced this outcome.
    pub strategy: StrategyKind,
}

/// Owned session state machine over a serial host and a loader protocol.
pub struct SessionController<H: SerialHost, L: LoaderProtocol> {
    host: H,
    protocol: L,
    state: SessionState,
    pending_port: Option<PortInfo>,
    loader: Option<LoaderHandle>,
    chip: Option<String>,
    last_strategy: Option<StrategyKind>,
    last_error: Option<String>,
    session_baud: u32,
    reconnect_timeout: Duration,
    poll_interval: Duration,
}

impl<H: SerialHost, L: LoaderProtocol> SessionController<H, L> {
    /// Create a controller in `Idle` over the given platform and protocol.
    pub fn new(host: H, protocol: L) -> Self {
        Self {
            host,
            protocol,
            state: SessionState::Idle,
            pending_port: None,
            loader: None,
            chip: None,
            last_strategy: None,
            last_error: None,
            session_baud: DEFAULT_SESSION_BAUD,
            reconnect_timeout: DEFAULT_RECONNECT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the loader session baud rate.
    #[must_use]
    pub fn with_session_baud(mut self, baud: u32) -> Self {
        self.session_baud = baud;
        self
    }

    /// Override the re-enumeration timeout.
    #[must_use]
    pub fn with_reconnect_timeout(mut self, timeout: Duration) -> Self {
        self.reconnect_timeout = timeout;
        self
    }

    /// Override the enumeration poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Chip identity, once a session has been opened.
    pub fn chip_identity(&self) -> Option<&str> {
        self.chip.as_deref()
    }

    /// The reset strategy last attempted, for matching diagnostics to it.
    pub fn last_strategy(&self) -> Option<StrategyKind> {
        self.last_strategy
    }

    /// Text of the most recent failure, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Drive the device into bootloader mode with the given strategy.
    ///
    /// Non-manual strategies choose a target port, snapshot the visible
    /// ports, fire the reset and wait for re-enumeration. A timeout is not
    /// a failure: the entry still moves forward, flagged so the caller knows
    /// the operator must pick the port at connect time. The manual strategy
    /// skips all device interaction.
    pub fn enter_bootloader(
        &mut self,
        strategy: &ResetStrategy,
        sink: &mut dyn EventSink,
    ) -> Result<BootloaderEntry> {
        if self.state == SessionState::Flashing {
            return Err(self.reject("enter bootloader"));
        }

        // A new top-level action releases whatever the previous one held.
        self.teardown();
        self.state = SessionState::Idle;
        self.last_strategy = Some(strategy.kind());

        if strategy.requires_user_port_selection() {
            sink.on_log(
                "Assuming the device is already in bootloader mode; select its port when connecting",
            );
            self.state = SessionState::Connecting;
            return Ok(BootloaderEntry {
                port: None,
                manual_selection_required: true,
                strategy: strategy.kind(),
            });
        }

        self.state = SessionState::SelectingDevice;
        sink.on_log("Select the device to update");
        let target = match self.host.request_user_port() {
            Ok(port) => port,
            Err(e) => return Err(self.fail(sink, e)),
        };

        let baseline = PortRegistry::new(&self.host)
            .with_poll_interval(self.poll_interval)
            .snapshot();

        self.state = SessionState::ResetTriggered;
        sink.on_log(&format!(
            "Triggering {} reset on {}",
            strategy.kind(),
            target.name
        ));
        if let Err(e) = strategy.attempt(&self.host, &target.name) {
            return Err(self.fail(sink, e));
        }
        sink.on_log("Reset signal sent");

        self.state = SessionState::AwaitingReconnect;
        sink.on_log("Waiting for the device to reconnect in bootloader mode...");
        let found = PortRegistry::new(&self.host)
            .with_poll_interval(self.poll_interval)
            .wait_for_new_port(&baseline, self.reconnect_timeout);

        let entry = match found {
            Some(port) => {
                sink.on_log(&format!("New port detected: {}", port.name));
                self.pending_port = Some(port.clone());
                BootloaderEntry {
                    port: Some(port),
                    manual_selection_required: false,
                    strategy: strategy.kind(),
                }
            },
            None => {
                let timed_out = Error::DeviceNotReenumerated {
                    waited: self.reconnect_timeout,
                };
                sink.on_log(&timed_out.to_string());
                if let Some(hint) = timed_out.remediation() {
                    sink.on_log(hint);
                }
                BootloaderEntry {
                    port: None,
                    manual_selection_required: true,
                    strategy: strategy.kind(),
                }
            },
        };

        self.state = SessionState::Connecting;
        Ok(entry)
    }

    /// Open a loader session on the port found during bootloader entry, or
    /// on an operator-selected port when entry flagged manual selection.
    ///
    /// Returns the chip identity. Failure classifies, logs and resets the
    /// session to `Idle`.
    pub fn connect(&mut self, sink: &mut dyn EventSink) -> Result<String> {
        if self.state == SessionState::Flashing {
            return Err(self.reject("connect"));
        }

        if self.loader.is_some() {
            sink.on_log("Closing existing session first");
            self.teardown();
        }

        let target = match self.pending_port.take() {
            Some(port) => {
                sink.on_log(&format!(
                    "Using previously detected bootloader port {}",
                    port.name
                ));
                port
            },
            None => {
                self.state = SessionState::SelectingDevice;
                match self.host.request_user_port() {
                    Ok(port) => port,
                    Err(e) => return Err(self.fail(sink, e)),
                }
            },
        };

        self.state = SessionState::Connecting;
        sink.on_log(&format!(
            "Opening loader session on {} at {} baud",
            target.name, self.session_baud
        ));

        match LoaderHandle::open(&self.protocol, &self.host, &target.name, self.session_baud) {
            Ok(handle) => {
                let chip = handle.chip().to_string();
                info!("Connected to {chip}");
                sink.on_log(&format!("Connected to {chip}"));
                self.chip = Some(chip.clone());
                self.loader = Some(handle);
                self.state = SessionState::Connected;
                Ok(chip)
            },
            Err(e) => Err(self.fail(sink, e)),
        }
    }

    /// Run a flash job on the connected session.
    ///
    /// Rejected (without disturbing anything) unless the session is
    /// `Connected`. Whether the job completes or fails, the session returns
    /// to `Connected`: the device link is still up and the operator may
    /// retry; job failures are logged and surfaced, not hidden.
    pub fn flash(
        &mut self,
        job: FlashJob,
        source: &mut dyn FirmwareSource,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        if self.state != SessionState::Connected {
            return Err(self.reject("flash"));
        }
        let Some(loader) = self.loader.as_mut() else {
            return Err(self.reject("flash"));
        };

        self.state = SessionState::Flashing;
        sink.on_log("Starting firmware flash");

        let result = FlashOrchestrator::new(loader, source).run(job, sink);
        self.state = SessionState::Connected;

        match result {
            Ok(()) => {
                sink.on_log("Firmware flashed successfully");
                Ok(())
            },
            Err(e) => {
                error!("Flash failed: {e}");
                sink.on_log(&format!("Error: {e}"));
                if let Some(hint) = e.remediation() {
                    sink.on_log(hint);
                }
                self.last_error = Some(e.to_string());
                Err(e)
            },
        }
    }

    /// Erase the entire flash, then write the job from scratch.
    ///
    /// This is [`Self::flash`] with the erase-first policy forced on; it is
    /// safe to invoke repeatedly, each run re-erasing and re-writing.
    pub fn erase_and_flash(
        &mut self,
        job: FlashJob,
        source: &mut dyn FirmwareSource,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        self.flash(job.with_erase_first(true), source, sink)
    }

    /// Tear the session down and release the port handle unconditionally.
    ///
    /// Valid from any state and never fails; always lands in `Idle`.
    pub fn disconnect(&mut self, sink: &mut dyn EventSink) {
        self.state = SessionState::Disconnected;
        self.teardown();
        self.state = SessionState::Idle;
        sink.on_log("Disconnected");
    }

    /// Reject an operation the current state cannot accept, without touching
    /// session resources.
    fn reject(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            operation,
            state: self.state.name().to_string(),
        }
    }

    /// Classify-and-log path for operation failures: record, notify, release
    /// everything and return to `Idle`. The operator restarts from a reset
    /// or connect action; there is no automatic resume.
    fn fail(&mut self, sink: &mut dyn EventSink, err: Error) -> Error {
        error!("{err}");
        sink.on_log(&format!("Error: {err}"));
        if let Some(hint) = err.remediation() {
            sink.on_log(hint);
        }
        self.last_error = Some(err.to_string());
        self.teardown();
        self.state = SessionState::Idle;
        err
    }

    fn teardown(&mut self) {
        if let Some(mut loader) = self.loader.take() {
            loader.close();
        }
        self.pending_port = None;
        self.chip = None;
    }
}
