//! Integration tests for recorded stream fixtures.
//!
//! Each test records a synthetic stream to a temporary directory with the
//! capture writer, then loads and replays it the way the CLI does.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use ir_scope_lib::analysis::{dump_frames, BrightnessSummary};
use ir_scope_lib::capture::{record_stream, CaptureMetadata, CaptureSummary, StopReason};
use ir_scope_lib::frame_assembler::FrameReader;
use ir_scope_lib::replay::{replay_all_frames, FrameIterator, ReplayError, ReplaySource};
use ir_scope_lib::source::MemorySource;
use ir_scope_lib::test_utils::{frames, PacketGenerator};
use ir_scope_lib::viewer::{NullDisplay, Viewer};
use ir_scope_lib::ViewerConfig;

const TIMEOUT: Duration = Duration::from_millis(10);

/// Frames used by every fixture: bright, dim, interleaved, bright again
fn fixture_frames() -> Vec<Vec<u8>> {
    vec![
        frames::with_metadata(1, &frames::uniform(2000, 120)),
        frames::uniform(2000, 30),
        frames::interleaved(2000),
        frames::with_metadata(2, &frames::uniform(2000, 125)),
    ]
}

fn record_fixture(dir: &Path) -> CaptureSummary {
    let mut gen = PacketGenerator::new(700);
    let packets: Vec<Vec<u8>> = fixture_frames()
        .iter()
        .flat_map(|f| gen.packetize_frame(f))
        .collect();

    let mut source = MemorySource::new(packets);
    let running = AtomicBool::new(true);
    let metadata = CaptureMetadata {
        description: "synthetic fixture".to_string(),
        ..CaptureMetadata::default()
    };
    record_stream(&mut source, dir, metadata, u64::MAX, TIMEOUT, &running)
        .expect("Should record fixture")
}

#[test]
fn test_recorded_fixture_has_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let summary = record_fixture(dir.path());

    assert_eq!(summary.stop_reason, StopReason::Exhausted);
    assert_eq!(summary.metadata.total_frames, 4);

    let replay = ReplaySource::load(&summary.packets_path).expect("Should load fixture");
    assert_eq!(replay.packet_count() as u64, summary.metadata.total_packets);

    let metadata = replay.metadata().expect("Should find companion metadata");
    assert_eq!(metadata.description, "synthetic fixture");
    assert_eq!(metadata.total_frames, 4);
}

#[test]
fn test_replay_reproduces_frames() {
    let dir = tempfile::tempdir().unwrap();
    let summary = record_fixture(dir.path());

    let replayed = replay_all_frames(&summary.packets_path).unwrap();
    assert_eq!(replayed, fixture_frames());

    let iterated: Vec<Vec<u8>> = FrameIterator::new(&summary.packets_path).unwrap().collect();
    assert_eq!(iterated.len(), 4);
}

#[test]
fn test_dump_over_fixture() {
    let dir = tempfile::tempdir().unwrap();
    let summary = record_fixture(dir.path());

    let mut reader = FrameReader::new(ReplaySource::load(&summary.packets_path).unwrap());
    let running = AtomicBool::new(true);
    let dump = dump_frames(&mut reader, 30, &running).unwrap();

    assert_eq!(dump.reports.len(), 4);
    assert!(dump.reports[0].metadata_present);
    assert!(!dump.reports[1].metadata_present);
    assert!(dump.reports[2].interleaved);
    assert_eq!(dump.first_frame.as_deref(), Some(fixture_frames()[0].as_slice()));
}

#[test]
fn test_brightness_summary_over_fixture() {
    let dir = tempfile::tempdir().unwrap();
    let summary = record_fixture(dir.path());

    let frames_out = replay_all_frames(&summary.packets_path).unwrap();
    let brightness = BrightnessSummary::from_frames(&frames_out);

    assert_eq!(brightness.frames, 4);
    assert_eq!(brightness.bright_frames, 3);
    assert_eq!(brightness.min, Some(0));
}

#[test]
fn test_viewer_over_fixture() {
    let dir = tempfile::tempdir().unwrap();
    let summary = record_fixture(dir.path());

    let source = ReplaySource::load(&summary.packets_path).unwrap();
    let mut viewer = Viewer::new(source, NullDisplay::new(), ViewerConfig::default());
    let running = AtomicBool::new(true);
    let status = viewer.run(&running).unwrap();

    // Dim frame jumps by 90 from the first one, the interleaved one is striped
    assert_eq!(status.displayed, 2);
    assert_eq!(status.counters.brightness_jump, 1);
    assert_eq!(status.counters.stripe, 1);
}

#[test]
fn test_corrupt_fixture_reports_offset() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.bin");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(&4u32.to_le_bytes()).unwrap();
    file.write_all(&[0x02, 0x02, 0xAA, 0xBB]).unwrap();
    file.write_all(&(1u32 << 20).to_le_bytes()).unwrap();
    drop(file);

    match ReplaySource::load(&path) {
        Err(ReplayError::InvalidPacket { offset, .. }) => assert_eq!(offset, 8),
        other => panic!("expected InvalidPacket, got {:?}", other.map(|s| s.packet_count())),
    }
}
