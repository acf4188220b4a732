//! Per-frame metadata header detection
//!
//! Some firmware revisions prefix every reassembled frame with a 10-byte
//! block:
//!
//! ```text
//! [seq] [00] [E8 03] [00 00] [size lo] [size hi] [00 00]
//! ```
//!
//! `E8 03` is 1000 little-endian and is the only part used as a signature.
//! The block must be removed before classification or decoding, otherwise it
//! shows up as a bright stripe on the first row.

use serde::Serialize;

/// Length of the metadata block
pub const METADATA_HEADER_LEN: usize = 10;

/// Frames must be strictly longer than this to be checked for metadata
const MIN_FRAME_LEN: usize = 12;

/// Signature bytes at offsets 1..4
const SIGNATURE: [u8; 3] = [0x00, 0xE8, 0x03];

/// Decoded metadata block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetadataHeader {
    /// Rolling sequence byte
    pub sequence: u8,
    /// Size field at offset 6, little-endian
    pub declared_size: u16,
}

/// A frame with its metadata block (if any) removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrippedFrame<'a> {
    /// Bytes after the metadata block, or the whole frame
    pub payload: &'a [u8],
    /// Whether a block was found and removed
    pub metadata_present: bool,
}

/// Whether `frame` starts with a metadata block
pub fn has_metadata_header(frame: &[u8]) -> bool {
    frame.len() > MIN_FRAME_LEN && frame[1..4] == SIGNATURE
}

/// Decode the metadata block, if present
pub fn parse_metadata_header(frame: &[u8]) -> Option<MetadataHeader> {
    if !has_metadata_header(frame) {
        return None;
    }

    Some(MetadataHeader {
        sequence: frame[0],
        declared_size: u16::from_le_bytes([frame[6], frame[7]]),
    })
}

/// Remove the metadata block from the front of `frame`
///
/// Frames without the signature are returned unchanged.
pub fn strip_metadata_header(frame: &[u8]) -> StrippedFrame<'_> {
    if has_metadata_header(frame) {
        StrippedFrame {
            payload: &frame[METADATA_HEADER_LEN..],
            metadata_present: true,
        }
    } else {
        StrippedFrame {
            payload: frame,
            metadata_present: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn with_metadata(seq: u8, payload: &[u8]) -> Vec<u8> {
        let size = payload.len() as u16;
        let [lo, hi] = size.to_le_bytes();
        let mut frame = vec![seq, 0x00, 0xE8, 0x03, 0x00, 0x00, lo, hi, 0x00, 0x00];
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn test_strips_signature_block() {
        let frame = with_metadata(7, &[0x55; 20]);
        let stripped = strip_metadata_header(&frame);
        assert!(stripped.metadata_present);
        assert_eq!(stripped.payload, &[0x55; 20]);
    }

    #[test]
    fn test_parses_fields() {
        let frame = with_metadata(0x2A, &[0u8; 300]);
        let header = parse_metadata_header(&frame).unwrap();
        assert_eq!(header.sequence, 0x2A);
        assert_eq!(header.declared_size, 300);
    }

    #[test]
    fn test_plain_frame_unchanged() {
        let frame = vec![0x40u8; 64];
        let stripped = strip_metadata_header(&frame);
        assert!(!stripped.metadata_present);
        assert_eq!(stripped.payload.len(), 64);
        assert_eq!(parse_metadata_header(&frame), None);
    }

    #[test]
    fn test_length_must_exceed_twelve() {
        // Exactly 12 bytes with a valid signature: left alone
        let frame = with_metadata(1, &[0xAA, 0xBB]);
        assert_eq!(frame.len(), 12);
        assert!(!strip_metadata_header(&frame).metadata_present);

        let frame = with_metadata(1, &[0xAA, 0xBB, 0xCC]);
        let stripped = strip_metadata_header(&frame);
        assert!(stripped.metadata_present);
        assert_eq!(stripped.payload, &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_partial_signature_not_stripped() {
        let mut frame = with_metadata(1, &[0u8; 32]);
        frame[3] = 0x04;
        assert!(!has_metadata_header(&frame));

        let mut frame = with_metadata(1, &[0u8; 32]);
        frame[1] = 0x01;
        assert!(!has_metadata_header(&frame));
    }

    #[test]
    fn test_empty_frame() {
        let stripped = strip_metadata_header(&[]);
        assert!(!stripped.metadata_present);
        assert!(stripped.payload.is_empty());
    }

    proptest! {
        #[test]
        fn prop_strip_removes_zero_or_ten(frame in proptest::collection::vec(any::<u8>(), 0..64)) {
            let stripped = strip_metadata_header(&frame);
            let removed = frame.len() - stripped.payload.len();
            prop_assert!(removed == 0 || removed == METADATA_HEADER_LEN);
            prop_assert_eq!(removed == METADATA_HEADER_LEN, stripped.metadata_present);
            prop_assert_eq!(stripped.payload, &frame[removed..]);
        }
    }
}
