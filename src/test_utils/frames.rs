//! Synthetic frame payloads
//!
//! Stand-ins for the encodings seen on the IR stream: smooth 8-bit images,
//! byte-interleaved dual-channel data, and frames carrying the 10-byte
//! metadata prefix.

use crate::config::DEFAULT_WIDTH;
use crate::metadata::METADATA_HEADER_LEN;

/// Every byte set to `value`
pub fn uniform(len: usize, value: u8) -> Vec<u8> {
    vec![value; len]
}

/// Horizontal ramp from 40 to 200 on every row of the default width
///
/// Mean neighbour difference stays well under 1, mean brightness around 120.
pub fn smooth_gradient(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (40 + (i % DEFAULT_WIDTH) * 160 / DEFAULT_WIDTH) as u8)
        .collect()
}

/// Two unrelated channels interleaved byte by byte
///
/// Even bytes form a dim slow ramp, odd bytes a bright one, so neighbour
/// difference lands far above the interleave threshold.
pub fn interleaved(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| {
            let j = (i / 2) % 50;
            if i % 2 == 0 {
                (30 + j) as u8
            } else {
                (200 - j) as u8
            }
        })
        .collect()
}

/// Prefix `payload` with a metadata block
pub fn with_metadata(sequence: u8, payload: &[u8]) -> Vec<u8> {
    let [lo, hi] = (payload.len().min(u16::MAX as usize) as u16).to_le_bytes();
    let mut frame = Vec::with_capacity(METADATA_HEADER_LEN + payload.len());
    frame.extend_from_slice(&[sequence, 0x00, 0xE8, 0x03, 0x00, 0x00, lo, hi, 0x00, 0x00]);
    frame.extend_from_slice(payload);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_classifier::classify;
    use crate::metadata::strip_metadata_header;

    #[test]
    fn test_gradient_is_smooth() {
        let frame = smooth_gradient(10_000);
        let c = classify(&frame);
        assert!(!c.is_interleaved());
        assert!(c.mean_brightness > 100 && c.mean_brightness < 140);
    }

    #[test]
    fn test_interleaved_is_flagged() {
        let frame = interleaved(10_000);
        let c = classify(&frame);
        assert!(c.is_interleaved());
        assert!(c.neighbor_diff > 100.0);
    }

    #[test]
    fn test_metadata_prefix_strips_cleanly() {
        let payload = smooth_gradient(500);
        let frame = with_metadata(3, &payload);
        let stripped = strip_metadata_header(&frame);
        assert!(stripped.metadata_present);
        assert_eq!(stripped.payload, payload.as_slice());
    }
}
