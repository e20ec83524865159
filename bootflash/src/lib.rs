//! # bootflash
//!
//! A library for driving microcontrollers into firmware-update mode over a
//! serial link and flashing binary images to fixed flash offsets.
//!
//! The crate owns the parts with real sequencing, timing and
//! failure-recovery design:
//!
//! - Bootloader-entry reset strategies (1200-bps touch reset, DTR/RTS pulse
//!   reset, manual entry)
//! - Re-enumeration detection via port snapshot diffing
//! - Flash orchestration with ordered segments, progress banding and an
//!   erase-then-flash variant
//! - A session state machine tying it all together behind a small command
//!   set
//!
//! The ROM-loader wire protocol itself (framing, chip identification,
//! synchronization, raw flash commands) is consumed as a black box through
//! the [`LoaderSession`]/[`LoaderProtocol`] traits and lives in an external
//! library.
//!
//! ## Supported Platforms
//!
//! - **Native** (default): Linux, macOS, Windows via the `serialport` crate
//!
//! ## Features
//!
//! - `native` (default): native serial port and HTTP firmware-fetch support
//! - `serde`: serialization support for reportable data types
//!
//! ## Example
//!
//! ```rust,ignore
//! use bootflash::{
//!     FirmwareSegment, FlashJob, NativeHost, NativeSource, NullSink,
//!     ResetStrategy, SessionController,
//! };
//!
//! // `EspRomProtocol` is the external ROM-loader library implementing
//! // bootflash's LoaderProtocol trait.
//! let mut session = SessionController::new(NativeHost::new(), EspRomProtocol::default());
//! let mut sink = NullSink;
//!
//! session.enter_bootloader(&ResetStrategy::touch(), &mut sink)?;
//! session.connect(&mut sink)?;
//!
//! let job = FlashJob::new(vec![
//!     FirmwareSegment::remote(0x0, "https://example.com/bootloader.bin"),
//!     FirmwareSegment::remote(0x8000, "https://example.com/partitions.bin"),
//!     FirmwareSegment::remote(0x10000, "https://example.com/app.bin"),
//! ])?;
//! session.flash(job, &mut NativeSource::new(), &mut sink)?;
//! session.disconnect(&mut sink);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod job;
pub mod loader;
pub mod orchestrator;
pub mod port;
pub mod progress;
pub mod registry;
pub mod reset;
pub mod session;
pub mod source;

// Re-exports for convenience
// Native-specific re-exports
#[cfg(feature = "native")]
pub use port::{NativeHost, NativePort, UsbBridge};
#[cfg(feature = "native")]
pub use source::NativeSource;
pub use {
    error::{Error, Result},
    job::{FirmwareSegment, FlashJob, SegmentPayload},
    loader::{LoaderHandle, LoaderProtocol, LoaderSession},
    orchestrator::FlashOrchestrator,
    port::{Port, PortInfo, SerialConfig, SerialHost},
    progress::{EventSink, NullSink, ProgressReport},
    registry::{PortRegistry, PortSnapshot, close_all_open},
    reset::{ResetStrategy, StrategyKind},
    session::{BootloaderEntry, SessionController, SessionState},
    source::FirmwareSource,
};

#[cfg(test)]
pub(crate) mod testutil {
    //! Shared mocks: a scriptable serial host, an in-memory loader protocol
    //! and recording sinks/sources for exercising the state machine without
    //! hardware.

    use std::collections::{HashMap, VecDeque};
    use std::io::{Read, Write};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::error::{Error, Result};
    use crate::loader::{LoaderProtocol, LoaderSession};
    use crate::port::{Port, PortInfo, SerialConfig, SerialHost};
    use crate::progress::EventSink;
    use crate::source::FirmwareSource;

    fn mock_io_err(what: &str) -> Error {
        Error::Io(std::io::Error::other(what.to_string()))
    }

    /// In-memory port recording control-line transitions and closes.
    pub struct MockPort {
        name: String,
        baud: u32,
        open: bool,
        fail_signals: bool,
        fail_close: bool,
        events: Arc<Mutex<Vec<String>>>,
    }

    impl MockPort {
        pub fn new(name: &str, baud: u32) -> Self {
            Self {
                name: name.to_string(),
                baud,
                open: true,
                fail_signals: false,
                fail_close: false,
                events: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn with_events(mut self, events: Arc<Mutex<Vec<String>>>) -> Self {
            self.events = events;
            self
        }

        pub fn with_failing_signals(mut self) -> Self {
            self.fail_signals = true;
            self
        }

        pub fn with_close_error(mut self) -> Self {
            self.fail_close = true;
            self
        }

        pub fn events(&self) -> Arc<Mutex<Vec<String>>> {
            Arc::clone(&self.events)
        }

        fn record(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl Port for MockPort {
        fn name(&self) -> &str {
            &self.name
        }

        fn baud_rate(&self) -> u32 {
            self.baud
        }

        fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
            self.baud = baud_rate;
            Ok(())
        }

        fn set_timeout(&mut self, _timeout: Duration) -> Result<()> {
            Ok(())
        }

        fn set_dtr(&mut self, level: bool) -> Result<()> {
            if self.fail_signals {
                return Err(mock_io_err("DTR not supported"));
            }
            self.record(format!("dtr={level}"));
            Ok(())
        }

        fn set_rts(&mut self, level: bool) -> Result<()> {
            if self.fail_signals {
                return Err(mock_io_err("RTS not supported"));
            }
            self.record(format!("rts={level}"));
            Ok(())
        }

        fn clear_buffers(&mut self) -> Result<()> {
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn close(&mut self) -> Result<()> {
            if self.fail_close {
                return Err(mock_io_err("close refused"));
            }
            self.open = false;
            self.record("close".to_string());
            Ok(())
        }
    }

    impl Read for MockPort {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"))
        }
    }

    impl Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Scriptable serial host.
    ///
    /// Enumeration listings are consumed from a queue (the last one repeats
    /// once the queue drains); opens succeed with recording ports unless a
    /// failure is armed.
    pub struct MockHost {
        listings: Mutex<VecDeque<Option<Vec<PortInfo>>>>,
        last_listing: Mutex<Vec<PortInfo>>,
        user_port: Mutex<Option<PortInfo>>,
        open_failure: Mutex<Option<Error>>,
        fail_signals: AtomicBool,
        opened: Mutex<Vec<(String, u32)>>,
        port_events: Arc<Mutex<Vec<String>>>,
    }

    impl MockHost {
        pub fn new() -> Self {
            Self {
                listings: Mutex::new(VecDeque::new()),
                last_listing: Mutex::new(Vec::new()),
                user_port: Mutex::new(None),
                open_failure: Mutex::new(None),
                fail_signals: AtomicBool::new(false),
                opened: Mutex::new(Vec::new()),
                port_events: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn push_listing(&self, ports: Vec<PortInfo>) {
            self.listings.lock().unwrap().push_back(Some(ports));
        }

        pub fn push_listing_error(&self) {
            self.listings.lock().unwrap().push_back(None);
        }

        pub fn set_user_port(&self, port: PortInfo) {
            *self.user_port.lock().unwrap() = Some(port);
        }

        pub fn fail_next_open(&self, err: Error) {
            *self.open_failure.lock().unwrap() = Some(err);
        }

        pub fn fail_signals(&self) {
            self.fail_signals.store(true, Ordering::Relaxed);
        }

        pub fn opened(&self) -> Vec<(String, u32)> {
            self.opened.lock().unwrap().clone()
        }

        pub fn port_events(&self) -> Vec<String> {
            self.port_events.lock().unwrap().clone()
        }
    }

    impl SerialHost for MockHost {
        fn list_ports(&self) -> Result<Vec<PortInfo>> {
            let next = self.listings.lock().unwrap().pop_front();
            match next {
                Some(Some(ports)) => {
                    *self.last_listing.lock().unwrap() = ports.clone();
                    Ok(ports)
                },
                Some(None) => Err(mock_io_err("enumeration failed")),
                None => Ok(self.last_listing.lock().unwrap().clone()),
            }
        }

        fn request_user_port(&self) -> Result<PortInfo> {
            self.user_port
                .lock()
                .unwrap()
                .clone()
                .ok_or(Error::UserCancelledSelection)
        }

        fn open(&self, config: &SerialConfig) -> Result<Box<dyn Port>> {
            self.opened
                .lock()
                .unwrap()
                .push((config.port_name.clone(), config.baud_rate));

            if let Some(err) = self.open_failure.lock().unwrap().take() {
                return Err(err);
            }

            let mut port = MockPort::new(&config.port_name, config.baud_rate)
                .with_events(Arc::clone(&self.port_events));
            if self.fail_signals.load(Ordering::Relaxed) {
                port = port.with_failing_signals();
            }
            Ok(Box::new(port))
        }
    }

    /// Scriptable loader protocol; every bound session shares the same
    /// counters so tests can assert across open/close cycles.
    pub struct MockLoaderProtocol {
        chip: String,
        sync_failure: Mutex<Option<String>>,
        fail_write_at: Mutex<Option<usize>>,
        fail_erase: AtomicBool,
        fail_reset: AtomicBool,
        writes: Arc<Mutex<Vec<(u32, usize)>>>,
        erase_count: Arc<Mutex<usize>>,
        reset_count: Arc<Mutex<usize>>,
        close_count: Arc<Mutex<usize>>,
    }

    impl MockLoaderProtocol {
        pub fn new(chip: &str) -> Self {
            Self {
                chip: chip.to_string(),
                sync_failure: Mutex::new(None),
                fail_write_at: Mutex::new(None),
                fail_erase: AtomicBool::new(false),
                fail_reset: AtomicBool::new(false),
                writes: Arc::new(Mutex::new(Vec::new())),
                erase_count: Arc::new(Mutex::new(0)),
                reset_count: Arc::new(Mutex::new(0)),
                close_count: Arc::new(Mutex::new(0)),
            }
        }

        pub fn fail_synchronize(&self, reason: &str) {
            *self.sync_failure.lock().unwrap() = Some(reason.to_string());
        }

        pub fn fail_write_at(&self, index: usize) {
            *self.fail_write_at.lock().unwrap() = Some(index);
        }

        pub fn fail_erase(&self) {
            self.fail_erase.store(true, Ordering::Relaxed);
        }

        pub fn fail_hard_reset(&self) {
            self.fail_reset.store(true, Ordering::Relaxed);
        }

        pub fn writes(&self) -> Vec<(u32, usize)> {
            self.writes.lock().unwrap().clone()
        }

        pub fn writes_handle(&self) -> Arc<Mutex<Vec<(u32, usize)>>> {
            Arc::clone(&self.writes)
        }

        pub fn erase_count(&self) -> usize {
            *self.erase_count.lock().unwrap()
        }

        pub fn erase_count_handle(&self) -> Arc<Mutex<usize>> {
            Arc::clone(&self.erase_count)
        }

        pub fn reset_count(&self) -> usize {
            *self.reset_count.lock().unwrap()
        }

        pub fn close_count(&self) -> usize {
            *self.close_count.lock().unwrap()
        }

        pub fn close_count_handle(&self) -> Arc<Mutex<usize>> {
            Arc::clone(&self.close_count)
        }
    }

    impl LoaderProtocol for MockLoaderProtocol {
        fn bind(&self, port: Box<dyn Port>) -> Result<Box<dyn LoaderSession>> {
            Ok(Box::new(MockLoaderSession {
                chip: self.chip.clone(),
                sync_failure: self.sync_failure.lock().unwrap().clone(),
                fail_write_at: *self.fail_write_at.lock().unwrap(),
                fail_erase: self.fail_erase.load(Ordering::Relaxed),
                fail_reset: self.fail_reset.load(Ordering::Relaxed),
                writes: Arc::clone(&self.writes),
                erase_count: Arc::clone(&self.erase_count),
                reset_count: Arc::clone(&self.reset_count),
                close_count: Arc::clone(&self.close_count),
                port,
            }))
        }
    }

    struct MockLoaderSession {
        chip: String,
        sync_failure: Option<String>,
        fail_write_at: Option<usize>,
        fail_erase: bool,
        fail_reset: bool,
        writes: Arc<Mutex<Vec<(u32, usize)>>>,
        erase_count: Arc<Mutex<usize>>,
        reset_count: Arc<Mutex<usize>>,
        close_count: Arc<Mutex<usize>>,
        port: Box<dyn Port>,
    }

    impl LoaderSession for MockLoaderSession {
        fn synchronize(&mut self) -> Result<String> {
            if let Some(reason) = &self.sync_failure {
                return Err(Error::SynchronizationFailed(reason.clone()));
            }
            Ok(self.chip.clone())
        }

        fn write_segment(
            &mut self,
            address: u32,
            data: &[u8],
            on_progress: &mut dyn FnMut(usize, usize),
        ) -> Result<()> {
            let index = {
                let mut writes = self.writes.lock().unwrap();
                writes.push((address, data.len()));
                writes.len() - 1
            };

            let total = data.len();
            on_progress(0, total);
            on_progress(total / 2, total);
            if self.fail_write_at == Some(index) {
                return Err(mock_io_err("mock write failure"));
            }
            on_progress(total, total);
            Ok(())
        }

        fn erase_flash(&mut self) -> Result<()> {
            *self.erase_count.lock().unwrap() += 1;
            if self.fail_erase {
                return Err(mock_io_err("mock erase failure"));
            }
            Ok(())
        }

        fn hard_reset(&mut self) -> Result<()> {
            if self.fail_reset {
                return Err(mock_io_err("mock reset failure"));
            }
            *self.reset_count.lock().unwrap() += 1;
            Ok(())
        }

        fn port_mut(&mut self) -> &mut dyn Port {
            self.port.as_mut()
        }

        fn close(&mut self) {
            *self.close_count.lock().unwrap() += 1;
            let _ = self.port.close();
        }
    }

    /// Sink capturing every report and log line.
    pub struct RecordingSink {
        reports: Vec<(f32, String)>,
        logs: Vec<String>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self {
                reports: Vec::new(),
                logs: Vec::new(),
            }
        }

        pub fn reports(&self) -> &[(f32, String)] {
            &self.reports
        }

        pub fn logs(&self) -> &[String] {
            &self.logs
        }
    }

    impl EventSink for RecordingSink {
        fn on_progress(&mut self, percent: f32, label: &str) {
            self.reports.push((percent, label.to_string()));
        }

        fn on_log(&mut self, message: &str) {
            self.logs.push(message.to_string());
        }
    }

    /// In-memory firmware source keyed by locator.
    pub struct MapSource {
        blobs: HashMap<String, Vec<u8>>,
    }

    impl MapSource {
        pub fn new() -> Self {
            Self {
                blobs: HashMap::new(),
            }
        }

        pub fn insert(&mut self, locator: &str, data: Vec<u8>) {
            self.blobs.insert(locator.to_string(), data);
        }
    }

    impl FirmwareSource for MapSource {
        fn fetch(&mut self, locator: &str) -> Result<Vec<u8>> {
            self.blobs.get(locator).cloned().ok_or_else(|| Error::Fetch {
                locator: locator.to_string(),
                reason: "not present in source".to_string(),
            })
        }
    }
}
