//! Offline replay of recorded bulk streams.
//!
//! Loads a stream written by [`crate::capture`] and serves it back through
//! [`PacketSource`], so the viewer, the analysis dump and the tests run the
//! exact same pipeline they would run against the device.
//!
//! # File Format
//!
//! ```text
//! [u32 LE: length][data bytes]...
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::path::Path;
//! use ir_scope_lib::replay::FrameIterator;
//!
//! for frame in FrameIterator::new(Path::new("packets_12345.bin"))? {
//!     process_frame(&frame);
//! }
//! ```

use std::io::Read;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use thiserror::Error;

use crate::capture::{read_metadata, CaptureMetadata};
use crate::frame_assembler::FrameReader;
use crate::packet::MAX_TRANSFER_SIZE;
use crate::source::{self, PacketSource, SourceError};

/// Errors that can occur while loading a recorded stream.
#[derive(Error, Debug)]
pub enum ReplayError {
    /// File not found or cannot be opened.
    #[error("failed to open file: {0}")]
    FileOpen(#[from] std::io::Error),

    /// Invalid or corrupted packet record in the stream file.
    #[error("invalid packet data at offset {offset}: {message}")]
    InvalidPacket {
        /// Byte offset in the stream file where the record starts.
        offset: u64,
        /// Description of the error.
        message: String,
    },
}

/// Result type alias for replay operations.
pub type Result<T> = std::result::Result<T, ReplayError>;

/// A recorded stream served as a [`PacketSource`].
///
/// Returns [`SourceError::Exhausted`] after the last packet unless looping is
/// enabled, in which case it starts over.
#[derive(Debug, Clone, Default)]
pub struct ReplaySource {
    packets: Vec<Vec<u8>>,
    position: usize,
    loop_playback: bool,
    loops_completed: u64,
    metadata: Option<CaptureMetadata>,
}

impl ReplaySource {
    /// Load a stream file and its companion metadata, if any.
    ///
    /// # Errors
    ///
    /// Returns `ReplayError::FileOpen` if the file cannot be opened.
    /// Returns `ReplayError::InvalidPacket` if a record is oversized or cut off.
    pub fn load(path: &Path) -> Result<Self> {
        let packets = read_stream_file(path)?;
        let metadata = try_load_metadata(path);

        log::info!("Loaded {} packets from {}", packets.len(), path.display());
        if let Some(ref meta) = metadata {
            log::info!(
                "Metadata: {:04x}:{:04x}, {} frames, {} ms",
                meta.vendor_id,
                meta.product_id,
                meta.total_frames,
                meta.duration_ms
            );
        }

        Ok(Self {
            packets,
            metadata,
            ..Self::default()
        })
    }

    /// Serve packets already in memory.
    pub fn from_packets(packets: Vec<Vec<u8>>) -> Self {
        Self {
            packets,
            ..Self::default()
        }
    }

    /// Start over after the last packet instead of reporting exhaustion.
    #[must_use]
    pub fn with_looping(mut self, loop_playback: bool) -> Self {
        self.loop_playback = loop_playback;
        self
    }

    /// Get the loaded metadata, if available.
    #[must_use]
    pub fn metadata(&self) -> Option<&CaptureMetadata> {
        self.metadata.as_ref()
    }

    /// Get the number of loaded packets.
    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    /// Sum of all packet lengths.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.packets.iter().map(Vec::len).sum()
    }

    /// Index of the next packet to be served.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Completed passes over the stream when looping.
    #[must_use]
    pub fn loops_completed(&self) -> u64 {
        self.loops_completed
    }

    /// Go back to the first packet.
    pub fn rewind(&mut self) {
        self.position = 0;
    }
}

impl PacketSource for ReplaySource {
    fn read_packet(&mut self, buf: &mut [u8], _timeout: Duration) -> source::Result<usize> {
        if self.position >= self.packets.len() {
            if !self.loop_playback || self.packets.is_empty() {
                return Err(SourceError::Exhausted);
            }
            log::debug!("Replay loop completed, restarting");
            self.position = 0;
            self.loops_completed += 1;
        }

        let packet = &self.packets[self.position];
        self.position += 1;

        let n = packet.len().min(buf.len());
        buf[..n].copy_from_slice(&packet[..n]);
        Ok(n)
    }
}

/// Read every record of a stream file, rejecting anything a real transfer
/// could not have produced.
fn read_stream_file(path: &Path) -> Result<Vec<Vec<u8>>> {
    let mut file = std::io::BufReader::new(std::fs::File::open(path)?);
    let mut packets = Vec::new();
    let mut offset = 0u64;

    loop {
        let mut len_bytes = [0u8; 4];
        match file.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(ReplayError::FileOpen(e)),
        }
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_TRANSFER_SIZE {
            return Err(ReplayError::InvalidPacket {
                offset,
                message: format!(
                    "packet length {} exceeds transfer limit {}",
                    len, MAX_TRANSFER_SIZE
                ),
            });
        }

        let mut data = vec![0u8; len];
        file.read_exact(&mut data)
            .map_err(|_| ReplayError::InvalidPacket {
                offset,
                message: format!("unexpected EOF reading {} bytes of data", len),
            })?;

        packets.push(data);
        offset += 4 + len as u64;
    }

    Ok(packets)
}

/// Try to load metadata from a companion JSON file.
///
/// Looks for `<name>.json` first, then `metadata_<ts>.json` next to a
/// `packets_<ts>.bin`.
fn try_load_metadata(path: &Path) -> Option<CaptureMetadata> {
    let json_path = path.with_extension("json");
    if json_path.exists() {
        if let Ok(meta) = read_metadata(&json_path) {
            return Some(meta);
        }
    }

    let file_name = path.file_name()?.to_str()?;
    let stem = file_name.strip_prefix("packets_")?;
    let json_path = path.with_file_name(format!("metadata_{}", stem).replace(".bin", ".json"));
    if json_path.exists() {
        match read_metadata(&json_path) {
            Ok(meta) => return Some(meta),
            Err(e) => log::warn!("Ignoring {}: {}", json_path.display(), e),
        }
    }

    None
}

/// Reassemble every frame of a stream file.
///
/// A trailing frame that was never sealed is included.
///
/// # Errors
///
/// Returns `ReplayError` if the file cannot be loaded or contains invalid data.
///
/// # Example
///
/// ```rust,ignore
/// let frames = replay_all_frames(Path::new("packets_12345.bin"))?;
/// println!("Replayed {} frames", frames.len());
/// ```
pub fn replay_all_frames(path: &Path) -> Result<Vec<Vec<u8>>> {
    Ok(FrameIterator::new(path)?.collect())
}

/// Frames of a recorded stream, reassembled on demand.
pub struct FrameIterator {
    reader: FrameReader<ReplaySource>,
    running: AtomicBool,
}

impl FrameIterator {
    /// Create a new frame iterator from a stream file.
    ///
    /// # Errors
    ///
    /// Returns `ReplayError` if the file cannot be loaded.
    pub fn new(path: &Path) -> Result<Self> {
        Ok(Self::from_source(ReplaySource::load(path)?))
    }

    /// Iterate over the frames of an already loaded source.
    pub fn from_source(source: ReplaySource) -> Self {
        Self {
            reader: FrameReader::new(source),
            running: AtomicBool::new(true),
        }
    }
}

impl Iterator for FrameIterator {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.reader.next_frame(&self.running) {
                Ok(frame) if frame.is_empty() => continue,
                Ok(frame) => return Some(frame),
                Err(_) => return None,
            }
        }
    }
}
