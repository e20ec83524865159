//! Flash orchestration: sequencing segments, progress banding, and the
//! erase-then-flash variant.
//!
//! The orchestrator owns no policy about what to write: it takes a
//! validated [`FlashJob`], drives the loader session, and folds per-segment
//! byte counts into one overall percentage. Any failure aborts the job
//! immediately; segments already written are not rolled back, and the
//! surfaced error says so.

use log::{error, info, warn};

use crate::error::{Error, Result};
use crate::job::{FlashJob, SegmentPayload};
use crate::loader::LoaderHandle;
use crate::progress::EventSink;
use crate::source::FirmwareSource;

/// Upper bound of the progress band occupied by a full-chip erase.
pub const ERASE_BAND_END: f32 = 20.0;

/// Fraction of the post-erase span spent resolving segment payloads.
const RESOLVE_SPAN_FRACTION: f32 = 0.2;

/// Progress emitter that never goes backwards.
///
/// Per-segment byte counts and phase boundaries are folded into one overall
/// percentage; rounding at band edges must not produce a visible regression.
struct MonotonicProgress {
    last: f32,
}

impl MonotonicProgress {
    fn new() -> Self {
        Self { last: 0.0 }
    }

    fn emit(&mut self, sink: &mut dyn EventSink, percent: f32, label: &str) {
        let clamped = percent.clamp(self.last, 100.0);
        self.last = clamped;
        sink.on_progress(clamped, label);
    }
}

/// Drives one flash job through an open loader session.
pub struct FlashOrchestrator<'a> {
    loader: &'a mut LoaderHandle,
    source: &'a mut dyn FirmwareSource,
}

impl<'a> FlashOrchestrator<'a> {
    /// Create an orchestrator over an open session and a payload source.
    pub fn new(loader: &'a mut LoaderHandle, source: &'a mut dyn FirmwareSource) -> Self {
        Self { loader, source }
    }

    /// Run the job to completion.
    ///
    /// Phases: optional full-chip erase (0–20 %), payload resolution, then
    /// segment writes in exact job order, each owning an equal band of the
    /// remaining percentage. Ends with a best-effort hard reset and a final
    /// report at exactly 100 %.
    ///
    /// Invoking `run` again with an equivalent job re-erases and re-writes
    /// from scratch; nothing is cached between runs.
    pub fn run(&mut self, job: FlashJob, sink: &mut dyn EventSink) -> Result<()> {
        let (erase_first, segments) = job.into_parts();
        let count = segments.len();

        let mut progress = MonotonicProgress::new();
        progress.emit(sink, 0.0, "Preparing to flash");

        let mut base = 0.0;
        if erase_first {
            sink.on_log("Erasing entire flash before writing");
            self.loader.erase_all()?;
            base = ERASE_BAND_END;
            progress.emit(sink, base, "Erase complete");
        }

        // Resolve every payload before the first write: a failed fetch must
        // never leave a partial image on the device.
        let resolve_span = (100.0 - base) * RESOLVE_SPAN_FRACTION;
        let mut resolved: Vec<(u32, Vec<u8>, String)> = Vec::with_capacity(count);
        for (i, segment) in segments.into_iter().enumerate() {
            let (address, payload, label) = segment.into_parts();
            progress.emit(
                sink,
                base + resolve_span * (i as f32 / count as f32),
                &format!("Loading {label}"),
            );

            let data = match payload {
                SegmentPayload::Resident(data) => data,
                SegmentPayload::Remote(locator) => self.source.fetch(&locator)?,
            };
            sink.on_log(&format!(
                "Prepared {label}: {} bytes at {address:#010x}",
                data.len()
            ));
            resolved.push((address, data, label));
        }

        check_no_overlap(&resolved)?;

        let write_base = base + resolve_span;
        let band = (100.0 - write_base) / count as f32;

        for (i, (address, data, label)) in resolved.iter().enumerate() {
            let band_start = write_base + band * i as f32;
            progress.emit(sink, band_start, &format!("Flashing {label}"));

            let write_result = {
                let progress = &mut progress;
                self.loader.write_segment(*address, data, &mut |written, total| {
                    let fraction = if total == 0 {
                        1.0
                    } else {
                        written as f32 / total as f32
                    };
                    progress.emit(
                        sink,
                        band_start + band * fraction,
                        &format!("Flashing {label}"),
                    );
                })
            };

            if let Err(e) = write_result {
                error!("Segment write failed on '{label}': {e}");
                warn!("{i} of {count} segments were written; device is partially flashed");
                return Err(Error::SegmentWriteFailed {
                    label: label.clone(),
                    address: *address,
                    written: i,
                    total: count,
                    reason: e.to_string(),
                });
            }
            sink.on_log(&format!("Wrote {label}"));
        }

        info!("All {count} segment(s) written");
        self.loader.hard_reset();
        progress.emit(sink, 100.0, "Flash complete");
        Ok(())
    }
}

/// Fail fast when resolved segment ranges overlap; writing them would
/// silently corrupt whichever came first.
fn check_no_overlap(resolved: &[(u32, Vec<u8>, String)]) -> Result<()> {
    let mut ranges: Vec<(u32, u64, &str)> = resolved
        .iter()
        .map(|(addr, data, label)| (*addr, data.len() as u64, label.as_str()))
        .collect();
    ranges.sort_by_key(|(addr, _, _)| *addr);

    for pair in ranges.windows(2) {
        let (addr_a, len_a, label_a) = pair[0];
        let (addr_b, _, label_b) = pair[1];
        if u64::from(addr_a) + len_a > u64::from(addr_b) {
            return Err(Error::InvalidJob(format!(
                "segment '{label_a}' at {addr_a:#010x} ({len_a} bytes) overlaps \
                 '{label_b}' at {addr_b:#010x}"
            )));
        }
    }
    Ok(())
}
