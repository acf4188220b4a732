//! Raw stream recording and frame saving.
//!
//! Records the bulk packet stream exactly as the endpoint delivered it, so
//! reassembly and filtering can be studied offline with [`crate::replay`].
//! Also hosts the one-shot raw frame save used by the viewer.
//!
//! # File Format
//!
//! - `packets_<ts>.bin`: sequence of `[u32 LE: length][bytes: data]...`
//! - `metadata_<ts>.json`: device and capture information
//!
//! # Example
//!
//! ```ignore
//! let running = AtomicBool::new(true);
//! let summary = record_stream(
//!     &mut source,
//!     Path::new("/tmp"),
//!     CaptureMetadata::default(),
//!     DEFAULT_BYTE_LIMIT,
//!     Duration::from_millis(500),
//!     &running,
//! )?;
//! println!("{} packets -> {}", summary.metadata.total_packets, summary.packets_path.display());
//! ```

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::frame_assembler::{FrameAssembler, ProcessResult};
use crate::packet::MAX_TRANSFER_SIZE;
use crate::source::{PacketSource, SourceError};

/// Vendor ID of the camera this viewer targets
pub const DEFAULT_VENDOR_ID: u16 = 0x2104;
/// Product ID of the camera this viewer targets
pub const DEFAULT_PRODUCT_ID: u16 = 0x0313;

/// Stop recording after this many bytes (including length prefixes)
pub const DEFAULT_BYTE_LIMIT: u64 = 2 * 1024 * 1024;

/// Size of the length prefix in front of each packet
const LENGTH_PREFIX: u64 = 4;

/// Errors that can occur during capture and save operations.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Output directory does not exist.
    #[error("output directory does not exist: {0}")]
    DirectoryNotFound(String),
}

/// Result type alias for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Metadata about the capture session and device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    /// USB vendor ID of the device.
    pub vendor_id: u16,
    /// USB product ID of the device.
    pub product_id: u16,
    /// Total number of packets captured.
    #[serde(default)]
    pub total_packets: u64,
    /// Total bytes written, length prefixes included.
    #[serde(default)]
    pub total_bytes: u64,
    /// Frames the reassembler sealed while recording.
    #[serde(default)]
    pub total_frames: u64,
    /// Capture duration in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,
    /// Optional description or notes about the capture.
    #[serde(default)]
    pub description: String,
}

impl Default for CaptureMetadata {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
            total_packets: 0,
            total_bytes: 0,
            total_frames: 0,
            duration_ms: 0,
            description: String::new(),
        }
    }
}

/// Why a recording ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Byte limit reached
    Limit,
    /// Keep-running flag cleared
    Cancelled,
    /// Finite source ran out
    Exhausted,
    /// Transport failure; the packets before it are kept
    Transport(String),
}

/// Result returned when a recording finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSummary {
    /// Path to the saved packets file.
    pub packets_path: PathBuf,
    /// Path to the saved metadata file.
    pub metadata_path: PathBuf,
    /// Summary of the capture session.
    pub metadata: CaptureMetadata,
    /// Why recording stopped.
    pub stop_reason: StopReason,
}

/// Totals of a recording, kept by the capture loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureCounters {
    /// Packets written
    pub packets: u64,
    /// Bytes written, length prefixes included
    pub bytes: u64,
    /// Frames the reassembler sealed
    pub frames: u64,
}

impl CaptureCounters {
    /// Count one packet record of `len` payload bytes
    pub fn record_packet(&mut self, len: usize) {
        self.packets += 1;
        self.bytes += LENGTH_PREFIX + len as u64;
    }
}

/// Writes packets in the length-prefixed stream format.
#[derive(Debug)]
pub struct PacketWriter<W: Write> {
    inner: W,
}

impl<W: Write> PacketWriter<W> {
    /// Wrap a writer
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Append one packet record.
    ///
    /// # Errors
    ///
    /// Returns any error of the underlying writer.
    pub fn write_packet(&mut self, packet: &[u8]) -> std::io::Result<()> {
        let len = packet.len() as u32;
        self.inner.write_all(&len.to_le_bytes())?;
        self.inner.write_all(packet)
    }

    /// Flush and return the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns any error of the final flush.
    pub fn finish(mut self) -> std::io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Copy packets from `source` to `writer` until `byte_limit` bytes are
/// written, the source ends, a transport error occurs or `running` is cleared.
///
/// Every packet is also fed through a [`FrameAssembler`] so the frame count
/// ends up in the metadata. Timeouts are retried, empty reads skipped.
/// Returns why the loop stopped together with what it wrote.
///
/// # Errors
///
/// Returns `CaptureError::Io` if writing fails. Transport errors end the
/// recording and are reported in the returned [`StopReason`].
pub fn capture_raw_stream<S, W>(
    source: &mut S,
    writer: &mut PacketWriter<W>,
    byte_limit: u64,
    timeout: Duration,
    running: &AtomicBool,
) -> Result<(StopReason, CaptureCounters)>
where
    S: PacketSource + ?Sized,
    W: Write,
{
    let mut buffer = vec![0u8; MAX_TRANSFER_SIZE];
    let mut assembler = FrameAssembler::new();
    let mut counters = CaptureCounters::default();

    let reason = loop {
        if !running.load(Ordering::Relaxed) {
            break StopReason::Cancelled;
        }
        if counters.bytes >= byte_limit {
            break StopReason::Limit;
        }

        let transferred = match source.read_packet(&mut buffer, timeout) {
            Ok(n) => n,
            Err(e) if e.is_retryable() => continue,
            Err(SourceError::Exhausted) => break StopReason::Exhausted,
            Err(SourceError::Transport(message)) => {
                log::error!("[RAWDUMP] USB error: {}", message);
                break StopReason::Transport(message);
            }
            Err(e) => break StopReason::Transport(e.to_string()),
        };
        if transferred == 0 {
            continue;
        }

        let packet = &buffer[..transferred];
        writer.write_packet(packet)?;
        counters.record_packet(transferred);

        if let ProcessResult::Frame(_) = assembler.process_packet(packet) {
            counters.frames += 1;
        }
        if assembler.take_pending().is_some() {
            counters.frames += 1;
        }

        log::trace!(
            "[RAWDUMP] {} bytes ({} packets)",
            counters.bytes,
            counters.packets
        );
    };

    Ok((reason, counters))
}

/// Record a stream into `output_dir` as `packets_<ts>.bin` plus
/// `metadata_<ts>.json`.
///
/// # Errors
///
/// Returns `CaptureError::DirectoryNotFound` if the output directory doesn't
/// exist, `CaptureError::Io` if file operations fail and
/// `CaptureError::Json` if metadata serialization fails.
pub fn record_stream<S>(
    source: &mut S,
    output_dir: &Path,
    metadata: CaptureMetadata,
    byte_limit: u64,
    timeout: Duration,
    running: &AtomicBool,
) -> Result<CaptureSummary>
where
    S: PacketSource + ?Sized,
{
    if !output_dir.is_dir() {
        return Err(CaptureError::DirectoryNotFound(
            output_dir.display().to_string(),
        ));
    }

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let packets_path = output_dir.join(format!("packets_{}.bin", timestamp));
    let metadata_path = output_dir.join(format!("metadata_{}.json", timestamp));

    let started = Instant::now();
    log::info!(
        "[RAWDUMP] Saving raw packet stream to {} (limit {} bytes)",
        packets_path.display(),
        byte_limit
    );

    let mut writer = PacketWriter::new(BufWriter::new(File::create(&packets_path)?));
    let (stop_reason, counters) =
        capture_raw_stream(source, &mut writer, byte_limit, timeout, running)?;
    writer.finish()?;

    let metadata = CaptureMetadata {
        total_packets: counters.packets,
        total_bytes: counters.bytes,
        total_frames: counters.frames,
        duration_ms: started.elapsed().as_millis() as u64,
        ..metadata
    };
    save_metadata(&metadata_path, &metadata)?;

    log::info!(
        "[RAWDUMP] Saved {} bytes ({} packets, {} frames) to {} ({:?})",
        metadata.total_bytes,
        metadata.total_packets,
        metadata.total_frames,
        packets_path.display(),
        stop_reason
    );

    Ok(CaptureSummary {
        packets_path,
        metadata_path,
        metadata,
        stop_reason,
    })
}

/// Write a frame's bytes verbatim, the canonical raw artifact for offline
/// analysis.
///
/// # Errors
///
/// Returns `CaptureError::Io` if the file cannot be written.
pub fn save_frame(path: &Path, frame: &[u8]) -> Result<()> {
    std::fs::write(path, frame)?;
    log::info!("[SAVED] {} bytes -> {}", frame.len(), path.display());
    Ok(())
}

/// Saves metadata to a JSON file.
fn save_metadata(path: &Path, metadata: &CaptureMetadata) -> Result<()> {
    let json = serde_json::to_string_pretty(metadata)?;
    std::fs::write(path, json)?;
    log::debug!("Saved metadata to {}", path.display());
    Ok(())
}

/// Reads capture metadata from a JSON file.
///
/// # Errors
///
/// Returns `CaptureError::Io` if the file cannot be read.
/// Returns `CaptureError::Json` if the JSON is invalid.
pub fn read_metadata(path: &Path) -> Result<CaptureMetadata> {
    let json = std::fs::read_to_string(path)?;
    let metadata: CaptureMetadata = serde_json::from_str(&json)?;
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{BFH_EOF, BFH_FID};
    use crate::replay::ReplaySource;
    use crate::source::{MemorySource, SourceEvent};
    use tempfile::tempdir;

    const TIMEOUT: Duration = Duration::from_millis(5);

    fn packet(flags: u8, payload: &[u8]) -> Vec<u8> {
        let mut p = vec![0x02, flags];
        p.extend_from_slice(payload);
        p
    }

    #[test]
    fn test_counters_include_prefix() {
        let mut counters = CaptureCounters::default();
        counters.record_packet(10);
        counters.record_packet(0);
        assert_eq!(counters.packets, 2);
        assert_eq!(counters.bytes, 18);
        assert_eq!(counters.frames, 0);
    }

    #[test]
    fn test_packet_writer_format() {
        let mut writer = PacketWriter::new(Vec::new());
        writer.write_packet(&[0xAA, 0xBB]).unwrap();
        writer.write_packet(&[]).unwrap();
        let bytes = writer.finish().unwrap();
        assert_eq!(bytes, vec![2, 0, 0, 0, 0xAA, 0xBB, 0, 0, 0, 0]);
    }

    #[test]
    fn test_capture_stops_at_limit() {
        let mut source = MemorySource::new((0..100).map(|_| packet(0, &[0x55; 94])));
        let mut writer = PacketWriter::new(Vec::new());
        let running = AtomicBool::new(true);

        let (reason, counters) =
            capture_raw_stream(&mut source, &mut writer, 1000, TIMEOUT, &running).unwrap();

        assert_eq!(reason, StopReason::Limit);
        // 100 bytes per record, limit checked before each read
        assert_eq!(counters.packets, 10);
        assert_eq!(counters.bytes, 1000);
        assert_eq!(writer.finish().unwrap().len(), 1000);
    }

    #[test]
    fn test_capture_from_looping_replay_stops_at_limit() {
        let mut source = ReplaySource::from_packets(vec![
            packet(0, &[0x11; 46]),
            packet(BFH_EOF, &[0x22; 46]),
        ])
        .with_looping(true);
        let mut writer = PacketWriter::new(Vec::new());
        let running = AtomicBool::new(true);

        let (reason, counters) =
            capture_raw_stream(&mut source, &mut writer, 500, TIMEOUT, &running).unwrap();

        assert_eq!(reason, StopReason::Limit);
        assert_eq!(counters.packets, 10);
        assert_eq!(counters.bytes, 520);
        assert_eq!(counters.frames, 5);
        assert_eq!(source.loops_completed(), 4);
    }

    #[test]
    fn test_capture_skips_timeouts_and_empty_reads() {
        let mut source = MemorySource::from_events(vec![
            SourceEvent::Timeout,
            SourceEvent::Packet(Vec::new()),
            SourceEvent::Packet(packet(BFH_EOF, &[1, 2, 3])),
            SourceEvent::Timeout,
        ]);
        let mut writer = PacketWriter::new(Vec::new());
        let running = AtomicBool::new(true);

        let (reason, counters) = capture_raw_stream(
            &mut source,
            &mut writer,
            DEFAULT_BYTE_LIMIT,
            TIMEOUT,
            &running,
        )
        .unwrap();

        assert_eq!(reason, StopReason::Exhausted);
        assert_eq!(counters.packets, 1);
        assert_eq!(counters.frames, 1);
    }

    #[test]
    fn test_capture_reports_transport_error() {
        let mut source = MemorySource::from_events(vec![
            SourceEvent::Packet(packet(0, &[1])),
            SourceEvent::Error("LIBUSB_ERROR_NO_DEVICE".to_string()),
            SourceEvent::Packet(packet(0, &[2])),
        ]);
        let mut writer = PacketWriter::new(Vec::new());
        let running = AtomicBool::new(true);

        let (reason, counters) = capture_raw_stream(
            &mut source,
            &mut writer,
            DEFAULT_BYTE_LIMIT,
            TIMEOUT,
            &running,
        )
        .unwrap();

        assert_eq!(
            reason,
            StopReason::Transport("LIBUSB_ERROR_NO_DEVICE".to_string())
        );
        assert_eq!(counters.packets, 1);
    }

    #[test]
    fn test_capture_cancelled() {
        let mut source = MemorySource::new(vec![packet(0, &[1])]);
        let mut writer = PacketWriter::new(Vec::new());
        let running = AtomicBool::new(false);

        let (reason, counters) = capture_raw_stream(
            &mut source,
            &mut writer,
            DEFAULT_BYTE_LIMIT,
            TIMEOUT,
            &running,
        )
        .unwrap();
        assert_eq!(reason, StopReason::Cancelled);
        assert_eq!(counters, CaptureCounters::default());
        assert_eq!(source.remaining(), 1);
    }

    #[test]
    fn test_record_stream_round_trip() {
        let dir = tempdir().unwrap();
        let packets = vec![
            packet(0, &[1; 40]),
            packet(BFH_EOF, &[2; 40]),
            packet(BFH_FID, &[3; 40]),
            packet(BFH_FID | BFH_EOF, &[4; 40]),
        ];
        let mut source = MemorySource::new(packets.clone());
        let running = AtomicBool::new(true);

        let metadata = CaptureMetadata {
            description: "bench capture".to_string(),
            ..Default::default()
        };
        let summary = record_stream(
            &mut source,
            dir.path(),
            metadata,
            DEFAULT_BYTE_LIMIT,
            TIMEOUT,
            &running,
        )
        .unwrap();

        assert_eq!(summary.stop_reason, StopReason::Exhausted);
        assert_eq!(summary.metadata.total_packets, 4);
        assert_eq!(summary.metadata.total_frames, 2);
        assert_eq!(summary.metadata.total_bytes, 4 * (4 + 42));

        let mut replay = ReplaySource::load(&summary.packets_path).unwrap();
        assert_eq!(replay.packet_count(), packets.len());
        let mut buf = vec![0u8; MAX_TRANSFER_SIZE];
        for expected in &packets {
            let n = replay.read_packet(&mut buf, TIMEOUT).unwrap();
            assert_eq!(&buf[..n], expected.as_slice());
        }
        assert_eq!(replay.metadata(), Some(&summary.metadata));

        let meta = read_metadata(&summary.metadata_path).unwrap();
        assert_eq!(meta, summary.metadata);
        assert_eq!(meta.vendor_id, DEFAULT_VENDOR_ID);
        assert_eq!(meta.description, "bench capture");
    }

    #[test]
    fn test_record_stream_missing_directory() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        let mut source = MemorySource::default();
        let running = AtomicBool::new(true);

        let result = record_stream(
            &mut source,
            &missing,
            CaptureMetadata::default(),
            DEFAULT_BYTE_LIMIT,
            TIMEOUT,
            &running,
        );
        assert!(matches!(result, Err(CaptureError::DirectoryNotFound(_))));
    }

    #[test]
    fn test_save_frame_is_verbatim() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frame.raw");
        let frame: Vec<u8> = (0..=255).collect();

        save_frame(&path, &frame).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), frame);
    }

    #[test]
    fn test_save_frame_reports_io_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("frame.raw");
        assert!(matches!(save_frame(&path, &[1]), Err(CaptureError::Io(_))));
    }

    #[test]
    fn test_metadata_defaults_on_missing_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata.json");
        std::fs::write(&path, r#"{"vendor_id": 1, "product_id": 2}"#).unwrap();

        let meta = read_metadata(&path).unwrap();
        assert_eq!(meta.vendor_id, 1);
        assert_eq!(meta.total_packets, 0);
        assert!(meta.description.is_empty());
    }
}
