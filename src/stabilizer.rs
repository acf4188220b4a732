//! Filter pipeline that turns the noisy frame stream into a stable display
//!
//! Gates run in a fixed order and the first failing gate rejects the frame:
//!
//! 1. Minimum size (silent, not counted as a rejection)
//! 2. Fragment accumulation (only with `accumulate` and a known target size)
//! 3. Stripe rejection for interleaved frames
//! 4. Size band around the locked size (frame-hold only)
//! 5. Brightness floor
//! 6. Brightness continuity against the last accepted frame (frame-hold only)
//!
//! A rejected frame leaves the state untouched apart from its counter.
//!
//! # Usage
//!
//! ```rust,ignore
//! use ir_scope_lib::config::FilterConfig;
//! use ir_scope_lib::stabilizer::{FilterOutcome, StabilizerState};
//!
//! let config = FilterConfig::default();
//! let mut state = StabilizerState::new();
//!
//! if let FilterOutcome::Accepted(frame) = state.process(&payload, &config) {
//!     render(frame.data);
//! }
//! ```

use serde::Serialize;

use crate::config::FilterConfig;
use crate::frame_classifier::{classify_with, FrameKind};

/// Why a frame was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    /// Labelled interleaved while the stripe filter is on
    Stripe,
    /// Outside the locked size band
    Size,
    /// Mean brightness below the floor
    Dark,
    /// Brightness moved too far from the last accepted frame
    BrightnessJump,
}

/// Per-reason rejection counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RejectionCounters {
    /// Interleaved frames rejected
    pub stripe: u64,
    /// Frames outside the size band
    pub size: u64,
    /// Frames below the brightness floor
    pub dark: u64,
    /// Frames failing brightness continuity
    pub brightness_jump: u64,
}

impl RejectionCounters {
    /// Count one rejection
    pub fn record(&mut self, reason: RejectReason) {
        match reason {
            RejectReason::Stripe => self.stripe += 1,
            RejectReason::Size => self.size += 1,
            RejectReason::Dark => self.dark += 1,
            RejectReason::BrightnessJump => self.brightness_jump += 1,
        }
    }

    /// All rejections
    pub fn total(&self) -> u64 {
        self.stripe + self.size + self.dark + self.brightness_jump
    }
}

/// A frame that passed every gate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceptedFrame<'a> {
    /// Frame bytes, borrowed from the hold buffer
    pub data: &'a [u8],
    /// Mean brightness over the sample window
    pub brightness: u32,
    /// Neighbour difference over the sample window
    pub neighbor_diff: f64,
    /// The size band was locked to this frame
    pub auto_locked: bool,
}

/// Result of running one frame through the pipeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterOutcome<'a> {
    /// Below the minimum size, dropped as protocol noise
    TooSmall,
    /// Consumed into the accumulation buffer, nothing to show yet
    Accumulating,
    /// Rejected by a gate
    Rejected(RejectReason),
    /// Ready for display
    Accepted(AcceptedFrame<'a>),
}

/// Mutable state of the filter pipeline
///
/// Owned by the capture loop and only mutated through [`process`] and the
/// manual controls.
///
/// [`process`]: StabilizerState::process
#[derive(Debug, Default)]
pub struct StabilizerState {
    locked_size: Option<usize>,
    last_brightness: Option<u32>,
    hold_buffer: Vec<u8>,
    hold_valid: bool,
    accum_buffer: Vec<u8>,
    counters: RejectionCounters,
    frames_seen: u64,
    frames_accepted: u64,
}

impl StabilizerState {
    /// Fresh state with nothing locked or held
    pub fn new() -> Self {
        Self::default()
    }

    /// Locked size, if any
    pub fn locked_size(&self) -> Option<usize> {
        self.locked_size
    }

    /// Brightness of the last accepted frame
    pub fn last_brightness(&self) -> Option<u32> {
        self.last_brightness
    }

    /// Bytes of the last accepted frame
    pub fn held_frame(&self) -> Option<&[u8]> {
        self.hold_valid.then_some(self.hold_buffer.as_slice())
    }

    /// Rejection counters
    pub fn counters(&self) -> RejectionCounters {
        self.counters
    }

    /// Frames that reached the pipeline past the minimum-size gate
    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Frames accepted for display
    pub fn frames_accepted(&self) -> u64 {
        self.frames_accepted
    }

    /// Bytes waiting in the accumulation buffer
    pub fn accumulated_len(&self) -> usize {
        self.accum_buffer.len()
    }

    /// Forget the size lock, the continuity baseline and the held frame
    ///
    /// Called when frame-hold is switched off.
    pub fn clear_hold(&mut self) {
        self.locked_size = None;
        self.last_brightness = None;
        self.hold_valid = false;
    }

    /// Lock the size band to the held frame, or clear the lock if nothing
    /// is held
    pub fn lock_to_held(&mut self) -> Option<usize> {
        self.locked_size = match self.held_frame() {
            Some(held) if !held.is_empty() => Some(held.len()),
            _ => None,
        };
        self.locked_size
    }

    /// Drop any partially accumulated frame
    pub fn reset_accumulation(&mut self) {
        self.accum_buffer.clear();
    }

    /// Run one metadata-stripped frame through the gates
    pub fn process<'s>(&'s mut self, frame: &[u8], config: &FilterConfig) -> FilterOutcome<'s> {
        if frame.len() < config.min_frame_size {
            return FilterOutcome::TooSmall;
        }
        self.frames_seen += 1;

        let accumulated = if config.accumulate && config.target_frame_size > 0 {
            match self.accumulate(frame, config.target_frame_size) {
                Some(full) => Some(full),
                None => return FilterOutcome::Accumulating,
            }
        } else {
            None
        };
        let data = accumulated.as_deref().unwrap_or(frame);

        let verdict = self.run_gates(data, config);

        // Hand the allocation back for the next accumulation round
        if let Some(mut buffer) = accumulated {
            buffer.clear();
            self.accum_buffer = buffer;
        }

        match verdict {
            Ok((brightness, neighbor_diff, auto_locked)) => {
                FilterOutcome::Accepted(AcceptedFrame {
                    data: &self.hold_buffer,
                    brightness,
                    neighbor_diff,
                    auto_locked,
                })
            }
            Err(reason) => {
                self.counters.record(reason);
                FilterOutcome::Rejected(reason)
            }
        }
    }

    /// Append to the accumulation buffer; returns the full frame once
    /// `target` bytes are collected
    fn accumulate(&mut self, frame: &[u8], target: usize) -> Option<Vec<u8>> {
        let space = target.saturating_sub(self.accum_buffer.len());
        let n = frame.len().min(space);
        self.accum_buffer.extend_from_slice(&frame[..n]);

        if self.accum_buffer.len() < target {
            log::trace!(
                "Accumulated {}/{} bytes",
                self.accum_buffer.len(),
                target
            );
            return None;
        }
        Some(std::mem::take(&mut self.accum_buffer))
    }

    /// Gates 3 to 6 plus acceptance bookkeeping
    fn run_gates(
        &mut self,
        data: &[u8],
        config: &FilterConfig,
    ) -> Result<(u32, f64, bool), RejectReason> {
        let classified = classify_with(data, config.sample_window, config.interleave_threshold);

        if config.stripe_filter && classified.kind == FrameKind::Interleaved {
            return Err(RejectReason::Stripe);
        }

        if config.frame_hold {
            if let Some(locked) = self.locked_size {
                let (lo, hi) = config.size_band(locked);
                if data.len() < lo || data.len() > hi {
                    return Err(RejectReason::Size);
                }
            }
        }

        let brightness = classified.mean_brightness;
        if brightness < config.brightness_floor {
            return Err(RejectReason::Dark);
        }

        if config.frame_hold {
            if let Some(last) = self.last_brightness {
                if brightness.abs_diff(last) > config.brightness_tolerance {
                    return Err(RejectReason::BrightnessJump);
                }
            }
        }

        self.hold_buffer.clear();
        self.hold_buffer.extend_from_slice(data);
        self.hold_valid = true;
        self.last_brightness = Some(brightness);

        let auto_locked = config.frame_hold && self.locked_size.is_none() && self.frames_accepted == 0;
        if auto_locked {
            self.locked_size = Some(data.len());
            log::info!(
                "[HOLD] Auto-locked to size band: {} +/-{}%",
                data.len(),
                config.size_tolerance_pct
            );
        }
        self.frames_accepted += 1;

        Ok((brightness, classified.neighbor_diff, auto_locked))
    }
}
