//! Frame classification for the mixed-encoding IR stream
//!
//! The firmware interleaves several undocumented payload encodings on the
//! same endpoint. Two cheap statistics over the start of a frame separate
//! them well enough for display purposes:
//!
//! - Mean brightness, used by the dark-frame and continuity gates
//! - Mean absolute difference between neighbouring bytes. Real image rows
//!   are smooth; byte-interleaved dual-channel data alternates unrelated
//!   magnitudes and scores much higher.
//!
//! Both are heuristics. The threshold is configurable via
//! `IRSCOPE_INTERLEAVE_THRESHOLD`.

use serde::{Deserialize, Serialize};

/// Bytes examined at the start of a frame
pub const SAMPLE_WINDOW: usize = 4000;

/// Neighbour difference above which a frame is considered interleaved
pub const INTERLEAVE_THRESHOLD: f64 = 25.0;

/// Classification label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    /// Locally smooth, likely a real image
    Smooth,
    /// High local variation, likely interleaved or scrambled
    Interleaved,
}

/// A frame together with its derived signals
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifiedFrame<'a> {
    /// Frame bytes (already metadata-stripped)
    pub data: &'a [u8],
    /// Integer mean over the sample window
    pub mean_brightness: u32,
    /// Mean absolute neighbour difference over the sample window
    pub neighbor_diff: f64,
    /// Label derived from `neighbor_diff`
    pub kind: FrameKind,
}

impl ClassifiedFrame<'_> {
    /// Whether the frame was labelled interleaved
    pub fn is_interleaved(&self) -> bool {
        self.kind == FrameKind::Interleaved
    }
}

#[inline]
fn sample(data: &[u8], window: usize) -> &[u8] {
    &data[..data.len().min(window)]
}

/// Integer mean of the first `window` bytes, 0 for empty input
pub fn mean_brightness(data: &[u8], window: usize) -> u32 {
    let sample = sample(data, window);
    if sample.is_empty() {
        return 0;
    }
    let sum: u64 = sample.iter().map(|&b| b as u64).sum();
    (sum / sample.len() as u64) as u32
}

/// Mean absolute difference between consecutive bytes of the first `window`
/// bytes, 0.0 when fewer than two bytes are available
pub fn neighbor_diff(data: &[u8], window: usize) -> f64 {
    let sample = sample(data, window);
    if sample.len() < 2 {
        return 0.0;
    }

    let total: u64 = sample
        .windows(2)
        .map(|pair| (pair[1] as i16 - pair[0] as i16).unsigned_abs() as u64)
        .sum();

    total as f64 / (sample.len() - 1) as f64
}

/// Label from a neighbour difference score
#[inline]
pub fn kind_for(neighbor_diff: f64, threshold: f64) -> FrameKind {
    if neighbor_diff > threshold {
        FrameKind::Interleaved
    } else {
        FrameKind::Smooth
    }
}

/// Classify with the default window and threshold
pub fn classify(data: &[u8]) -> ClassifiedFrame<'_> {
    classify_with(data, SAMPLE_WINDOW, INTERLEAVE_THRESHOLD)
}

/// Classify with an explicit window and threshold
pub fn classify_with(data: &[u8], window: usize, threshold: f64) -> ClassifiedFrame<'_> {
    let diff = neighbor_diff(data, window);
    ClassifiedFrame {
        data,
        mean_brightness: mean_brightness(data, window),
        neighbor_diff: diff,
        kind: kind_for(diff, threshold),
    }
}
