//! Flash job data model.
//!
//! A job is an ordered list of firmware segments plus the erase-first policy
//! flag. Segments are immutable once built and are consumed by the
//! orchestrator run; they are not retained after flashing.

use crate::error::{Error, Result};

/// Where a segment's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentPayload {
    /// Bytes already resident in memory.
    Resident(Vec<u8>),
    /// A locator (URL or local path) resolved through a
    /// [`crate::FirmwareSource`] at flash time.
    Remote(String),
}

/// A single firmware image destined for a fixed flash offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareSegment {
    address: u32,
    payload: SegmentPayload,
    label: String,
}

impl FirmwareSegment {
    /// Segment from bytes already in memory.
    pub fn resident(address: u32, data: Vec<u8>, label: impl Into<String>) -> Self {
        Self {
            address,
            payload: SegmentPayload::Resident(data),
            label: label.into(),
        }
    }

    /// Segment fetched from a locator at flash time; the locator doubles as
    /// the log label.
    pub fn remote(address: u32, locator: impl Into<String>) -> Self {
        let locator = locator.into();
        Self {
            address,
            label: locator.clone(),
            payload: SegmentPayload::Remote(locator),
        }
    }

    /// Flash offset the segment is written to.
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Label used in logs and progress reports.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The segment's payload.
    pub fn payload(&self) -> &SegmentPayload {
        &self.payload
    }

    pub(crate) fn into_parts(self) -> (u32, SegmentPayload, String) {
        (self.address, self.payload, self.label)
    }
}

/// An ordered sequence of firmware segments plus the erase-first policy.
///
/// Construction validates that the job is non-empty and that addresses are
/// distinct; range overlap is validated once payload sizes are known, before
/// any write. Segment order is preserved exactly; it drives both the write
/// sequence and progress banding.
#[derive(Debug, Clone)]
pub struct FlashJob {
    segments: Vec<FirmwareSegment>,
    erase_first: bool,
}

impl FlashJob {
    /// Build a job from segments in write order.
    pub fn new(segments: Vec<FirmwareSegment>) -> Result<Self> {
        if segments.is_empty() {
            return Err(Error::InvalidJob("no segments".to_string()));
        }

        for (i, seg) in segments.iter().enumerate() {
            if let Some(dup) = segments[..i].iter().find(|s| s.address == seg.address) {
                return Err(Error::InvalidJob(format!(
                    "segments '{}' and '{}' share address {:#010x}",
                    dup.label, seg.label, seg.address
                )));
            }
        }

        Ok(Self {
            segments,
            erase_first: false,
        })
    }

    /// Set the erase-first policy.
    #[must_use]
    pub fn with_erase_first(mut self, erase_first: bool) -> Self {
        self.erase_first = erase_first;
        self
    }

    /// Segments in write order.
    pub fn segments(&self) -> &[FirmwareSegment] {
        &self.segments
    }

    /// Whether the whole flash is erased before writing.
    pub fn erase_first(&self) -> bool {
        self.erase_first
    }

    pub(crate) fn into_parts(self) -> (bool, Vec<FirmwareSegment>) {
        (self.erase_first, self.segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_preserves_segment_order() {
        let job = FlashJob::new(vec![
            FirmwareSegment::resident(0x0, vec![0; 16], "bootloader.bin"),
            FirmwareSegment::resident(0x8000, vec![0; 16], "partitions.bin"),
            FirmwareSegment::resident(0x10000, vec![0; 16], "app.bin"),
        ])
        .unwrap();

        let addresses: Vec<u32> = job.segments().iter().map(FirmwareSegment::address).collect();
        assert_eq!(addresses, vec![0x0, 0x8000, 0x10000]);
        assert!(!job.erase_first());
    }

    #[test]
    fn test_job_rejects_empty() {
        let result = FlashJob::new(Vec::new());
        assert!(matches!(result, Err(Error::InvalidJob(_))));
    }

    #[test]
    fn test_job_rejects_duplicate_addresses() {
        let result = FlashJob::new(vec![
            FirmwareSegment::resident(0x1000, vec![1], "a.bin"),
            FirmwareSegment::resident(0x1000, vec![2], "b.bin"),
        ]);
        match result {
            Err(Error::InvalidJob(msg)) => {
                assert!(msg.contains("a.bin"));
                assert!(msg.contains("b.bin"));
            },
            other => panic!("expected InvalidJob, got {other:?}"),
        }
    }

    #[test]
    fn test_erase_first_flag() {
        let job = FlashJob::new(vec![FirmwareSegment::resident(0x0, vec![0], "a.bin")])
            .unwrap()
            .with_erase_first(true);
        assert!(job.erase_first());
    }

    #[test]
    fn test_remote_segment_label_defaults_to_locator() {
        let seg = FirmwareSegment::remote(0x10000, "https://example.com/app.bin");
        assert_eq!(seg.label(), "https://example.com/app.bin");
        assert!(matches!(seg.payload(), SegmentPayload::Remote(_)));
    }
}
