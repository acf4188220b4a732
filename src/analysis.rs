//! Frame analysis for offline inspection of a stream
//!
//! Two reports are offered:
//!
//! - a per-frame dump (size, metadata sequence and declared size, leading
//!   bytes, byte statistics and the stripe verdict) for the first few frames
//!   of a stream
//! - a brightness summary across many frames, used to compare captures taken
//!   with and without the illuminator running

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::frame_assembler::FrameReader;
use crate::frame_classifier::{neighbor_diff, INTERLEAVE_THRESHOLD, SAMPLE_WINDOW};
use crate::metadata::{parse_metadata_header, strip_metadata_header, MetadataHeader};
use crate::source::{PacketSource, SourceError};

/// Frames dumped when no count is given
pub const DEFAULT_DUMP_FRAMES: usize = 30;

/// Leading payload bytes shown per frame
pub const HEAD_BYTES: usize = 32;

/// Frames shorter than this get no statistics in the dump
pub const MIN_STATS_SIZE: usize = 100;

/// Frames shorter than this are left out of the brightness summary
pub const MIN_SUMMARY_SIZE: usize = 1000;

/// Mean above which a frame counts as illuminated
pub const BRIGHT_MEAN: u64 = 50;

/// Space-separated lowercase hex
pub fn hex_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Min, max and mean over a byte slice
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ByteStats {
    /// Smallest byte
    pub min: u8,
    /// Largest byte
    pub max: u8,
    /// Arithmetic mean
    pub mean: f64,
}

impl ByteStats {
    /// Statistics of `data`, `None` when empty
    pub fn of(data: &[u8]) -> Option<Self> {
        let (&first, _) = data.split_first()?;
        let (min, max, sum) = data
            .iter()
            .fold((first, first, 0u64), |(mn, mx, sum), &b| {
                (mn.min(b), mx.max(b), sum + b as u64)
            });
        Some(Self {
            min,
            max,
            mean: sum as f64 / data.len() as f64,
        })
    }
}

/// One line of the frame dump
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameReport {
    /// 1-based position in the dump
    pub index: usize,
    /// Size of the frame as reassembled, metadata included
    pub size: usize,
    /// Whether a metadata block was stripped
    pub metadata_present: bool,
    /// Decoded metadata block, if any
    pub metadata: Option<MetadataHeader>,
    /// First bytes of the stripped payload
    pub head: Vec<u8>,
    /// Statistics over the whole unstripped frame
    pub stats: Option<ByteStats>,
    /// Neighbour difference of the stripped payload
    pub neighbor_diff: f64,
    /// Neighbour difference above the interleave threshold
    pub interleaved: bool,
}

impl FrameReport {
    /// Analyse one reassembled frame
    pub fn new(index: usize, frame: &[u8]) -> Self {
        let stripped = strip_metadata_header(frame);
        let payload = stripped.payload;
        let nd = neighbor_diff(payload, SAMPLE_WINDOW);

        Self {
            index,
            size: frame.len(),
            metadata_present: stripped.metadata_present,
            metadata: parse_metadata_header(frame),
            head: payload[..payload.len().min(HEAD_BYTES)].to_vec(),
            stats: if frame.len() >= MIN_STATS_SIZE {
                ByteStats::of(frame)
            } else {
                None
            },
            neighbor_diff: nd,
            interleaved: nd > INTERLEAVE_THRESHOLD,
        }
    }
}

impl fmt::Display for FrameReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Frame {:3}] {:6} bytes  meta={}",
            self.index,
            self.size,
            u8::from(self.metadata_present)
        )?;
        if let Some(header) = &self.metadata {
            write!(f, " seq={} size={}", header.sequence, header.declared_size)?;
        }
        write!(f, "  first {}: {}", HEAD_BYTES, hex_string(&self.head))?;
        if let Some(stats) = &self.stats {
            write!(
                f,
                "\n           stats: min={} max={} avg={:.1}  nd={:.1}  {}",
                stats.min,
                stats.max,
                stats.mean,
                self.neighbor_diff,
                if self.interleaved {
                    "INTERLEAVED"
                } else {
                    "smooth"
                }
            )?;
        }
        Ok(())
    }
}

/// Output of [`dump_frames`]
#[derive(Debug, Default)]
pub struct FrameDump {
    /// One report per frame, in stream order
    pub reports: Vec<FrameReport>,
    /// Raw bytes of the first frame, for saving
    pub first_frame: Option<Vec<u8>>,
}

/// Analyse up to `count` frames from `reader`
///
/// Empty reads are skipped. The dump ends early when `running` is cleared or
/// the source is exhausted.
///
/// # Errors
///
/// Transport errors from the source are returned as is.
pub fn dump_frames<S: PacketSource>(
    reader: &mut FrameReader<S>,
    count: usize,
    running: &AtomicBool,
) -> Result<FrameDump, SourceError> {
    let mut dump = FrameDump::default();

    while dump.reports.len() < count && running.load(Ordering::Relaxed) {
        let frame = match reader.next_frame(running) {
            Ok(frame) => frame,
            Err(SourceError::Exhausted) => break,
            Err(e) => return Err(e),
        };
        if frame.is_empty() {
            continue;
        }

        let report = FrameReport::new(dump.reports.len() + 1, &frame);
        log::debug!("{}", report);
        dump.reports.push(report);
        if dump.first_frame.is_none() {
            dump.first_frame = Some(frame);
        }
    }

    Ok(dump)
}

/// Size and integer mean of one summarised frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameBrightness {
    /// Frame size in bytes
    pub size: usize,
    /// Integer mean of all bytes
    pub mean: u64,
}

/// Brightness statistics over a set of frames
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BrightnessSummary {
    /// Frames counted
    pub frames: usize,
    /// Mean of per-frame means
    pub mean_of_means: f64,
    /// Smallest byte seen in any counted frame
    pub min: Option<u8>,
    /// Largest byte seen in any counted frame
    pub max: Option<u8>,
    /// Frames whose mean exceeds [`BRIGHT_MEAN`]
    pub bright_frames: usize,
    /// Mean of per-frame means over bright frames only
    pub bright_mean: Option<f64>,
    /// Largest byte in any bright frame
    pub bright_max: Option<u8>,
    /// Per-frame details, in order
    pub details: Vec<FrameBrightness>,
}

impl BrightnessSummary {
    /// Summarise `frames`, ignoring those under [`MIN_SUMMARY_SIZE`] bytes
    pub fn from_frames<I, F>(frames: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: AsRef<[u8]>,
    {
        let mut summary = Self::default();
        let mut sum_of_means = 0u64;
        let mut bright_sum = 0u64;

        for frame in frames {
            let frame = frame.as_ref();
            if frame.len() < MIN_SUMMARY_SIZE {
                continue;
            }
            let Some(stats) = ByteStats::of(frame) else {
                continue;
            };
            let sum: u64 = frame.iter().map(|&b| b as u64).sum();
            let mean = sum / frame.len() as u64;

            summary.frames += 1;
            sum_of_means += mean;
            summary.min = Some(summary.min.map_or(stats.min, |m| m.min(stats.min)));
            summary.max = Some(summary.max.map_or(stats.max, |m| m.max(stats.max)));
            if mean > BRIGHT_MEAN {
                summary.bright_frames += 1;
                bright_sum += mean;
                summary.bright_max =
                    Some(summary.bright_max.map_or(stats.max, |m| m.max(stats.max)));
            }
            summary.details.push(FrameBrightness {
                size: frame.len(),
                mean,
            });
        }

        if summary.frames > 0 {
            summary.mean_of_means = sum_of_means as f64 / summary.frames as f64;
        }
        if summary.bright_frames > 0 {
            summary.bright_mean = Some(bright_sum as f64 / summary.bright_frames as f64);
        }
        summary
    }
}

impl fmt::Display for BrightnessSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Total frames: {}", self.frames)?;
        writeln!(
            f,
            "  Overall avg-of-avg: {:.1}, min={}, max={}",
            self.mean_of_means,
            self.min.unwrap_or(0),
            self.max.unwrap_or(0)
        )?;
        writeln!(f, "  Bright frames (avg>{}): {}", BRIGHT_MEAN, self.bright_frames)?;
        if let (Some(mean), Some(max)) = (self.bright_mean, self.bright_max) {
            writeln!(f, "  Bright avg-of-avg: {:.1}, max pixel={}", mean, max)?;
        }
        write!(f, "  Frame details:")?;
        for (i, detail) in self.details.iter().take(DEFAULT_DUMP_FRAMES).enumerate() {
            write!(
                f,
                "\n    [{:2}] {:6} bytes, avg={}",
                i + 1,
                detail.size,
                detail.mean
            )?;
        }
        Ok(())
    }
}
