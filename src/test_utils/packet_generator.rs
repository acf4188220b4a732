//! Synthetic bulk packet generation for testing
//!
//! Builds the packets the IR camera's streaming endpoint delivers: a
//! 2-byte (or longer) payload header followed by frame bytes, plus the
//! oddities the firmware mixes in (headerless transfers, error-flagged
//! packets, frames whose EOF bit never arrives).
//!
//! # Example
//!
//! ```rust,ignore
//! use ir_scope_lib::test_utils::{frames, PacketGenerator};
//!
//! let mut gen = PacketGenerator::default();
//!
//! // Frame delivered in max-size chunks, EOF on the last one
//! let packets = gen.packetize_frame(&frames::smooth_gradient(308_160));
//!
//! // Same frame, boundary only visible through the FID toggle
//! let packets = gen.packetize_without_eof(&frames::interleaved(308_160));
//! ```

use crate::packet::{BFH_EOF, BFH_ERR, BFH_FID};

/// Bulk payload header builder
#[derive(Debug, Clone)]
pub struct BulkHeader {
    /// Header length (2 or 12)
    pub length: u8,
    /// Frame ID (FID) bit - toggles each frame
    pub fid: bool,
    /// End of Frame (EOF) bit
    pub eof: bool,
    /// Error bit
    pub error: bool,
}

impl BulkHeader {
    /// Create a minimal 2-byte header
    pub fn minimal(fid: bool, eof: bool) -> Self {
        Self {
            length: 2,
            fid,
            eof,
            error: false,
        }
    }

    /// Create a 12-byte header, trailing bytes zeroed
    pub fn extended(fid: bool, eof: bool) -> Self {
        Self {
            length: 12,
            ..Self::minimal(fid, eof)
        }
    }

    /// Create a 2-byte header with the error bit set
    pub fn error(fid: bool) -> Self {
        Self {
            error: true,
            ..Self::minimal(fid, false)
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.length as usize];
        bytes[0] = self.length;

        // No EOH bit: the firmware rarely sets it
        let mut flags = 0u8;
        if self.fid {
            flags |= BFH_FID;
        }
        if self.eof {
            flags |= BFH_EOF;
        }
        if self.error {
            flags |= BFH_ERR;
        }
        bytes[1] = flags;

        bytes
    }
}

/// Build one packet from a header and payload
pub fn bulk_packet(header: &BulkHeader, payload: &[u8]) -> Vec<u8> {
    let mut packet = header.to_bytes();
    packet.extend_from_slice(payload);
    packet
}

/// Generates synthetic bulk packets for testing
pub struct PacketGenerator {
    /// Maximum payload size per packet (excluding header)
    pub max_payload_size: usize,
    /// Current frame ID (toggles each frame)
    current_fid: bool,
}

impl Default for PacketGenerator {
    fn default() -> Self {
        Self::new(16 * 1024)
    }
}

impl PacketGenerator {
    /// Create a new packet generator with specified max payload size
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            max_payload_size: max_payload_size.max(1),
            current_fid: false,
        }
    }

    /// FID used by the most recently generated frame
    pub fn current_fid(&self) -> bool {
        self.current_fid
    }

    /// Split a frame into packets with EOF on the last one
    pub fn packetize_frame(&mut self, frame_data: &[u8]) -> Vec<Vec<u8>> {
        self.packetize(frame_data, true)
    }

    /// Split a frame into packets that never carry EOF
    ///
    /// The only boundary left is the FID toggle, which the reassembler sees
    /// when the next frame's first packet arrives.
    pub fn packetize_without_eof(&mut self, frame_data: &[u8]) -> Vec<Vec<u8>> {
        self.packetize(frame_data, false)
    }

    /// An error-flagged packet carrying junk payload
    pub fn error_packet(&self) -> Vec<u8> {
        bulk_packet(&BulkHeader::error(self.current_fid), &[0xEE; 16])
    }

    /// A transfer whose first byte cannot be a header length
    ///
    /// The leading byte is forced above the packet length so the parser falls
    /// back to raw copy.
    pub fn headerless_packet(&self, data: &[u8]) -> Vec<u8> {
        let mut packet = Vec::with_capacity(data.len() + 1);
        packet.push(0xFF);
        packet.extend_from_slice(data);
        packet.truncate(0xFE);
        packet
    }

    fn packetize(&mut self, frame_data: &[u8], with_eof: bool) -> Vec<Vec<u8>> {
        // Toggle FID for new frame
        self.current_fid = !self.current_fid;

        frame_data
            .chunks(self.max_payload_size)
            .enumerate()
            .map(|(i, chunk)| {
                let is_last = (i + 1) * self.max_payload_size >= frame_data.len();
                let header = BulkHeader::minimal(self.current_fid, with_eof && is_last);
                bulk_packet(&header, chunk)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::parse_packet;

    #[test]
    fn test_bulk_header_minimal() {
        let bytes = BulkHeader::minimal(true, false).to_bytes();
        assert_eq!(bytes, vec![2, BFH_FID]);
    }

    #[test]
    fn test_bulk_header_extended() {
        let bytes = BulkHeader::extended(false, true).to_bytes();
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes[0], 12);
        assert_eq!(bytes[1], BFH_EOF);
    }

    #[test]
    fn test_error_header() {
        let bytes = BulkHeader::error(true).to_bytes();
        assert_eq!(bytes[1], BFH_FID | BFH_ERR);
    }

    #[test]
    fn test_packetize_splits_and_flags_last() {
        let mut gen = PacketGenerator::new(100);
        let packets = gen.packetize_frame(&[7u8; 250]);

        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].len(), 102);
        assert_eq!(packets[2].len(), 52);
        assert!(packets[..2].iter().all(|p| p[1] & BFH_EOF == 0));
        assert_eq!(packets[2][1] & BFH_EOF, BFH_EOF);
    }

    #[test]
    fn test_exact_multiple_flags_last_chunk() {
        let mut gen = PacketGenerator::new(100);
        let packets = gen.packetize_frame(&[1u8; 200]);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[1][1] & BFH_EOF, BFH_EOF);
    }

    #[test]
    fn test_fid_toggles_between_frames() {
        let mut gen = PacketGenerator::new(64);
        let a = gen.packetize_frame(&[0u8; 10]);
        let b = gen.packetize_frame(&[0u8; 10]);
        assert_ne!(a[0][1] & BFH_FID, b[0][1] & BFH_FID);
    }

    #[test]
    fn test_without_eof() {
        let mut gen = PacketGenerator::new(64);
        let packets = gen.packetize_without_eof(&[0u8; 200]);
        assert!(packets.iter().all(|p| p[1] & BFH_EOF == 0));
    }

    #[test]
    fn test_headerless_packet_is_not_parsed_as_framed() {
        let gen = PacketGenerator::default();
        let packet = gen.headerless_packet(&[1, 2, 3]);
        assert!(parse_packet(&packet).header().is_none());
    }
}
