//! Serial port registry: enumeration snapshots and re-enumeration detection.
//!
//! After a reset pulse the device drops off the bus and comes back as a
//! (possibly different) port. The registry captures a snapshot of visible
//! ports before the pulse and polls afterwards until a port not present in
//! the baseline appears, or a bounded timeout elapses.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::port::{Port, PortInfo, SerialHost};

/// Interval between enumeration polls while waiting for a new port.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// An immutable set of port names captured at a point in time.
///
/// Created fresh on each enumeration call and discarded after comparison.
#[derive(Debug, Clone, Default)]
pub struct PortSnapshot {
    names: Vec<String>,
}

impl PortSnapshot {
    /// Capture a snapshot from an enumeration listing.
    pub fn from_listing(ports: &[PortInfo]) -> Self {
        Self {
            names: ports.iter().map(|p| p.name.clone()).collect(),
        }
    }

    /// Whether the snapshot contains a port with the given name.
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Number of ports captured.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Registry over a serial host's enumeration capability.
pub struct PortRegistry<'h> {
    host: &'h dyn SerialHost,
    poll_interval: Duration,
}

impl<'h> PortRegistry<'h> {
    /// Create a registry over the given host.
    pub fn new(host: &'h dyn SerialHost) -> Self {
        Self {
            host,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the enumeration poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Capture a snapshot of all currently visible ports.
    ///
    /// A failed enumeration degrades to an empty snapshot; it is logged, not
    /// propagated.
    pub fn snapshot(&self) -> PortSnapshot {
        match self.host.list_ports() {
            Ok(ports) => {
                debug!("Snapshot: {} port(s) visible", ports.len());
                PortSnapshot::from_listing(&ports)
            },
            Err(e) => {
                debug!("Port enumeration failed, snapshot empty: {e}");
                PortSnapshot::default()
            },
        }
    }

    /// Poll until a port not present in `baseline` appears.
    ///
    /// Returns `None` when `timeout` elapses without a new port: an
    /// expected, common outcome the caller must handle, not an error. A
    /// transient enumeration failure counts as "no new port yet". Resolves
    /// within `timeout` plus one poll interval.
    pub fn wait_for_new_port(
        &self,
        baseline: &PortSnapshot,
        timeout: Duration,
    ) -> Option<PortInfo> {
        let start = Instant::now();

        loop {
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                debug!("No new port within {timeout:?}");
                return None;
            }
            thread::sleep(self.poll_interval.min(timeout - elapsed));

            let current = match self.host.list_ports() {
                Ok(ports) => ports,
                Err(e) => {
                    debug!("Enumeration poll failed (treating as no new port yet): {e}");
                    continue;
                },
            };

            if let Some(port) = current.into_iter().find(|p| !baseline.contains(&p.name)) {
                info!("New port detected: {}", port.name);
                return Some(port);
            }
        }
    }
}

/// Best-effort close of every open handle in the list.
///
/// Failures are logged, never propagated; a port held by another process is
/// expected and non-fatal.
pub fn close_all_open(ports: Vec<Box<dyn Port>>) {
    for mut port in ports {
        if !port.is_open() {
            continue;
        }
        debug!("Closing previously open port {}", port.name());
        if let Err(e) = port.close() {
            warn!("Failed to close {}: {e}", port.name());
        }
    }
}
