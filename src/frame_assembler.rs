//! Frame assembly from bulk payloads
//!
//! Reassembles logical frames from the bulk packets of the video streaming
//! endpoint. The firmware does not set the EOF bit reliably, so a frame is
//! sealed by whichever comes first:
//!
//! - a packet with the EOF bit set
//! - a packet whose FID bit differs from the frame being accumulated
//! - the frame buffer reaching its size ceiling (see [`FrameReader`])
//!
//! # Usage
//!
//! ```rust,ignore
//! use ir_scope_lib::frame_assembler::{FrameAssembler, ProcessResult};
//!
//! let mut assembler = FrameAssembler::new();
//!
//! for packet in usb_packets {
//!     if let ProcessResult::Frame(frame) = assembler.process_packet(&packet) {
//!         process_frame(frame);
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::packet::{parse_packet, PacketHeader, MAX_TRANSFER_SIZE};
use crate::source::{PacketSource, SourceError};

/// Ceiling for one reassembled frame; bytes beyond it are dropped
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Default wait for a single bulk transfer
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Result of processing a single packet
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessResult {
    /// No complete frame yet, continue accumulating
    Accumulating,
    /// Complete frame ready
    Frame(Vec<u8>),
    /// Packet was dropped (empty, error flag, or EOF with nothing collected)
    Skipped,
}

/// Reassembly state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssemblerState {
    /// No bytes collected for the current frame
    #[default]
    Idle,
    /// At least one payload byte collected
    Accumulating,
}

/// What a packet does to the frame under construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Error flag: drop collected bytes and forget the frame identity
    Discard,
    /// Append payload, frame continues
    Append,
    /// Append payload, then seal (EOF)
    AppendAndSeal,
    /// Identity bit flipped: seal collected bytes, payload starts the next frame
    SealAndRestart,
}

/// Transition table of the assembler
///
/// Headerless packets are always appended verbatim and never change the
/// frame identity.
pub fn next_transition(
    state: AssemblerState,
    current_fid: Option<bool>,
    header: Option<&PacketHeader>,
) -> Transition {
    let Some(header) = header else {
        return Transition::Append;
    };

    if header.error {
        return Transition::Discard;
    }

    let flipped = state == AssemblerState::Accumulating
        && current_fid.is_some_and(|fid| fid != header.frame_id);

    match (flipped, header.end_of_frame) {
        (true, _) => Transition::SealAndRestart,
        (false, true) => Transition::AppendAndSeal,
        (false, false) => Transition::Append,
    }
}

/// Counters describing what the assembler has seen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    /// Frames sealed by the EOF bit
    pub sealed_by_eof: u64,
    /// Frames sealed by an FID flip
    pub sealed_by_fid: u64,
    /// Frames returned because the byte budget ran out or the source ended
    pub sealed_partial: u64,
    /// Packets carrying the error flag
    pub error_packets: u64,
    /// Packets without a plausible header
    pub headerless_packets: u64,
    /// Payload bytes dropped at the size ceiling
    pub dropped_bytes: u64,
}

/// Assembles complete frames from bulk payload packets
#[derive(Debug)]
pub struct FrameAssembler {
    /// Buffer to accumulate frame data across packets
    frame_buffer: Vec<u8>,
    /// FID of the frame being accumulated
    current_fid: Option<bool>,
    /// Explicit reassembly state
    state: AssemblerState,
    /// Ceiling for `frame_buffer`
    max_frame_size: usize,
    /// Frame sealed by a packet that also closed the preceding frame
    pending: Option<Vec<u8>>,
    stats: AssemblerStats,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAssembler {
    /// Create an assembler with the default 1 MiB frame ceiling
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Create an assembler with a custom frame ceiling
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            frame_buffer: Vec::with_capacity(max_frame_size.min(MAX_FRAME_SIZE)),
            current_fid: None,
            state: AssemblerState::Idle,
            max_frame_size,
            pending: None,
            stats: AssemblerStats::default(),
        }
    }

    /// Reset the assembler state, dropping any partial and pending frame
    pub fn reset(&mut self) {
        self.reset_frame();
        self.pending = None;
    }

    /// Current state
    pub fn state(&self) -> AssemblerState {
        self.state
    }

    /// FID of the frame being accumulated
    pub fn current_frame_id(&self) -> Option<bool> {
        self.current_fid
    }

    /// Get current buffer size (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.frame_buffer.len()
    }

    /// Frame ceiling in bytes
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Whether the frame buffer reached its ceiling
    pub fn is_full(&self) -> bool {
        self.frame_buffer.len() >= self.max_frame_size
    }

    /// Counters
    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    /// Take a frame that was sealed together with the previous one
    ///
    /// A packet that flips the FID and also carries EOF closes two frames at
    /// once; the second one is parked here.
    pub fn take_pending(&mut self) -> Option<Vec<u8>> {
        self.pending.take()
    }

    /// Seal whatever has been collected so far, even if empty
    pub fn take_partial(&mut self) -> Vec<u8> {
        let frame = std::mem::take(&mut self.frame_buffer);
        if !frame.is_empty() {
            self.stats.sealed_partial += 1;
            log::debug!("Partial frame: {} bytes (trigger: budget)", frame.len());
        }
        self.reset_frame();
        frame
    }

    /// Process a single bulk packet
    ///
    /// Returns `ProcessResult::Frame(data)` when a frame is sealed.
    pub fn process_packet(&mut self, packet_data: &[u8]) -> ProcessResult {
        if packet_data.is_empty() {
            return ProcessResult::Skipped;
        }

        let parsed = parse_packet(packet_data);
        let header = parsed.header();
        if header.is_none() {
            self.stats.headerless_packets += 1;
        }

        match next_transition(self.state, self.current_fid, header.as_ref()) {
            Transition::Discard => {
                self.stats.error_packets += 1;
                if !self.frame_buffer.is_empty() {
                    log::debug!(
                        "Error flag - discarding {} accumulated bytes",
                        self.frame_buffer.len()
                    );
                }
                self.reset_frame();
                ProcessResult::Skipped
            }
            Transition::Append => {
                self.accumulate_payload(parsed.payload());
                if let Some(header) = header {
                    self.current_fid = Some(header.frame_id);
                }
                ProcessResult::Accumulating
            }
            Transition::AppendAndSeal => {
                self.accumulate_payload(parsed.payload());
                match self.seal() {
                    Some(frame) => {
                        self.stats.sealed_by_eof += 1;
                        log::debug!("Complete frame: {} bytes (trigger: EOF)", frame.len());
                        ProcessResult::Frame(frame)
                    }
                    None => ProcessResult::Skipped,
                }
            }
            Transition::SealAndRestart => {
                let frame = std::mem::take(&mut self.frame_buffer);
                self.stats.sealed_by_fid += 1;
                log::debug!("Complete frame: {} bytes (trigger: FID toggle)", frame.len());

                self.reset_frame();
                self.accumulate_payload(parsed.payload());
                if let Some(header) = header {
                    self.current_fid = Some(header.frame_id);
                    if header.end_of_frame {
                        if let Some(next) = self.seal() {
                            self.stats.sealed_by_eof += 1;
                            self.pending = Some(next);
                        }
                    }
                }
                ProcessResult::Frame(frame)
            }
        }
    }

    /// Take the collected bytes as a frame and return to `Idle`
    fn seal(&mut self) -> Option<Vec<u8>> {
        let frame = std::mem::take(&mut self.frame_buffer);
        self.reset_frame();
        if frame.is_empty() {
            None
        } else {
            Some(frame)
        }
    }

    fn reset_frame(&mut self) {
        self.frame_buffer.clear();
        self.current_fid = None;
        self.state = AssemblerState::Idle;
    }

    /// Append payload, dropping whatever does not fit under the ceiling
    fn accumulate_payload(&mut self, payload: &[u8]) {
        let space = self.max_frame_size.saturating_sub(self.frame_buffer.len());
        let n = payload.len().min(space);
        if n < payload.len() {
            self.stats.dropped_bytes += (payload.len() - n) as u64;
        }
        self.frame_buffer.extend_from_slice(&payload[..n]);
        if !self.frame_buffer.is_empty() {
            self.state = AssemblerState::Accumulating;
        }
    }
}

/// Pulls packets from a [`PacketSource`] until one frame is assembled
///
/// Timeouts and overflows are retried silently. A frame is returned when it is
/// sealed, when the assembler's byte budget is exhausted, when the source runs
/// dry, or when `running` is cleared; in the last three cases it may be
/// truncated or empty.
pub struct FrameReader<S> {
    source: S,
    assembler: FrameAssembler,
    packet_buffer: Vec<u8>,
    timeout: Duration,
}

impl<S: PacketSource> FrameReader<S> {
    /// Create a reader with the default frame ceiling and timeout
    pub fn new(source: S) -> Self {
        Self::with_assembler(source, FrameAssembler::new(), DEFAULT_READ_TIMEOUT)
    }

    /// Create a reader with an explicit assembler and per-transfer timeout
    pub fn with_assembler(source: S, assembler: FrameAssembler, timeout: Duration) -> Self {
        Self {
            source,
            assembler,
            packet_buffer: vec![0u8; MAX_TRANSFER_SIZE],
            timeout,
        }
    }

    /// The wrapped assembler
    pub fn assembler(&self) -> &FrameAssembler {
        &self.assembler
    }

    /// The wrapped source
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Unwrap the source
    pub fn into_source(self) -> S {
        self.source
    }

    /// Read the next frame
    ///
    /// # Errors
    ///
    /// Returns the source's error for transport failures, and
    /// [`SourceError::Exhausted`] once a finite source has nothing left.
    pub fn next_frame(&mut self, running: &AtomicBool) -> Result<Vec<u8>, SourceError> {
        if let Some(frame) = self.assembler.take_pending() {
            return Ok(frame);
        }

        while running.load(Ordering::Relaxed) && !self.assembler.is_full() {
            let transferred = match self.source.read_packet(&mut self.packet_buffer, self.timeout)
            {
                Ok(n) => n,
                Err(e) if e.is_retryable() => {
                    log::trace!("Bulk transfer: {}", e);
                    continue;
                }
                Err(SourceError::Exhausted) if self.assembler.buffer_len() > 0 => break,
                Err(e) => return Err(e),
            };

            // Too short to carry anything useful
            if transferred < 2 {
                continue;
            }

            if let ProcessResult::Frame(frame) = self
                .assembler
                .process_packet(&self.packet_buffer[..transferred])
            {
                return Ok(frame);
            }
        }

        Ok(self.assembler.take_partial())
    }
}


#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::test_utils::{frames, PacketGenerator};

    #[test]
    fn test_generated_frames_reassemble() {
        let mut gen = PacketGenerator::new(1024);
        let frame_a = frames::smooth_gradient(5000);
        let frame_b = frames::interleaved(3000);

        let mut packets = gen.packetize_frame(&frame_a);
        packets.extend(gen.packetize_frame(&frame_b));

        let mut assembler = FrameAssembler::new();
        let mut frames = Vec::new();
        for packet in &packets {
            if let ProcessResult::Frame(frame) = assembler.process_packet(packet) {
                frames.push(frame);
            }
        }

        assert_eq!(frames, vec![frame_a, frame_b]);
    }

    #[test]
    fn test_frames_without_eof_split_on_fid_toggle() {
        let mut gen = PacketGenerator::new(700);
        let frame_a = frames::uniform(2000, 90);
        let frame_b = frames::uniform(1500, 120);
        let frame_c = frames::uniform(100, 10);

        let mut packets = gen.packetize_without_eof(&frame_a);
        packets.extend(gen.packetize_without_eof(&frame_b));
        packets.extend(gen.packetize_without_eof(&frame_c));

        let mut assembler = FrameAssembler::new();
        let mut frames = Vec::new();
        for packet in &packets {
            if let ProcessResult::Frame(frame) = assembler.process_packet(packet) {
                frames.push(frame);
            }
        }

        // The last frame has no successor to seal it
        assert_eq!(frames, vec![frame_a, frame_b]);
        assert_eq!(assembler.buffer_len(), 100);
    }

    #[test]
    fn test_error_burst_between_frames() {
        let mut gen = PacketGenerator::new(512);
        let frame_a = frames::uniform(1200, 200);
        let frame_b = frames::smooth_gradient(1200);

        let mut packets = gen.packetize_frame(&frame_a);
        // Corrupt the middle of the second frame's delivery
        let mut second = gen.packetize_frame(&frame_b);
        second.insert(1, gen.error_packet());
        second.insert(2, gen.error_packet());
        packets.extend(second);

        let mut assembler = FrameAssembler::new();
        let mut frames = Vec::new();
        for packet in &packets {
            if let ProcessResult::Frame(frame) = assembler.process_packet(packet) {
                frames.push(frame);
            }
        }

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], frame_a);
        // First packet of frame_b was discarded with the error
        assert_eq!(frames[1], frame_b[512..].to_vec());
    }
}
