//! Bulk payload header parsing
//!
//! Each bulk transfer from the video streaming endpoint normally starts with a
//! UVC payload header:
//!
//! - Byte 0: header length (including these two bytes)
//! - Byte 1: BFH flags (bit 0 = FID, bit 1 = EOF, bit 6 = ERR)
//! - Bytes 2..: optional PTS/SCR, ignored here
//!
//! The camera firmware mixes framed and unframed transfers on the same
//! endpoint, so a packet whose declared header length is implausible is not an
//! error: it is returned as [`ParsedPacket::Headerless`] and its bytes are used
//! verbatim as payload.

/// Frame identity bit, toggles between consecutive frames
pub const BFH_FID: u8 = 0x01;
/// End of frame bit
pub const BFH_EOF: u8 = 0x02;
/// Error bit, the payload of this frame is unusable
pub const BFH_ERR: u8 = 0x40;

/// Largest single bulk transfer requested from the endpoint
pub const MAX_TRANSFER_SIZE: usize = 64 * 1024;

/// Smallest header length accepted as a real header
const MIN_HEADER_LEN: usize = 2;

/// Parsed view of a packet's leading header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Declared header length in bytes
    pub header_length: usize,
    /// Frame identity (FID) bit
    pub frame_id: bool,
    /// End-of-frame bit
    pub end_of_frame: bool,
    /// Error bit
    pub error: bool,
}

impl PacketHeader {
    /// Decode the flags byte of a header whose length was already validated
    fn from_flags(header_length: usize, flags: u8) -> Self {
        Self {
            header_length,
            frame_id: (flags & BFH_FID) != 0,
            end_of_frame: (flags & BFH_EOF) != 0,
            error: (flags & BFH_ERR) != 0,
        }
    }
}

/// Result of parsing one raw packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedPacket<'a> {
    /// Packet carried a plausible header; `payload` follows it
    Framed {
        /// Decoded header
        header: PacketHeader,
        /// Bytes after the header
        payload: &'a [u8],
    },
    /// No recognizable header, the whole packet is payload
    Headerless(&'a [u8]),
}

impl<'a> ParsedPacket<'a> {
    /// Payload bytes of this packet
    pub fn payload(&self) -> &'a [u8] {
        match self {
            ParsedPacket::Framed { payload, .. } => payload,
            ParsedPacket::Headerless(payload) => payload,
        }
    }

    /// Offset of the payload within the packet
    pub fn payload_offset(&self) -> usize {
        match self {
            ParsedPacket::Framed { header, .. } => header.header_length,
            ParsedPacket::Headerless(_) => 0,
        }
    }

    /// Length of the payload in bytes
    pub fn payload_len(&self) -> usize {
        self.payload().len()
    }

    /// Header, if the packet carried one
    pub fn header(&self) -> Option<PacketHeader> {
        match self {
            ParsedPacket::Framed { header, .. } => Some(*header),
            ParsedPacket::Headerless(_) => None,
        }
    }
}

/// Validate a packet header and return its length if plausible
///
/// Only the length is checked: `2 <= header_length <= packet.len()`. The EOH
/// bit is not required, this firmware does not set it consistently.
#[inline]
pub fn validate_header(data: &[u8]) -> Option<usize> {
    if data.len() < MIN_HEADER_LEN {
        return None;
    }

    let header_len = data[0] as usize;
    if header_len < MIN_HEADER_LEN || header_len > data.len() {
        return None;
    }

    Some(header_len)
}

/// Split a raw packet into header and payload
///
/// Never fails: packets without a plausible header (including packets shorter
/// than two bytes) are reported as [`ParsedPacket::Headerless`].
pub fn parse_packet(data: &[u8]) -> ParsedPacket<'_> {
    match validate_header(data) {
        Some(header_len) => ParsedPacket::Framed {
            header: PacketHeader::from_flags(header_len, data[1]),
            payload: &data[header_len..],
        },
        None => ParsedPacket::Headerless(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_minimal_header() {
        let data = [0x02, 0x00, 0xAB, 0xCD];
        let parsed = parse_packet(&data);
        assert_eq!(parsed.payload(), &[0xAB, 0xCD]);
        assert_eq!(parsed.payload_offset(), 2);
        let header = parsed.header().unwrap();
        assert!(!header.frame_id);
        assert!(!header.end_of_frame);
        assert!(!header.error);
    }

    #[test]
    fn test_flags_decoded() {
        let data = [0x02, BFH_FID | BFH_EOF | BFH_ERR, 0x11];
        let header = parse_packet(&data).header().unwrap();
        assert!(header.frame_id);
        assert!(header.end_of_frame);
        assert!(header.error);
    }

    #[test]
    fn test_eoh_bit_not_required() {
        // Standard UVC sets bit 7, this firmware often does not
        assert_eq!(validate_header(&[0x02, 0x01, 0x00]), Some(2));
        assert_eq!(validate_header(&[0x02, 0x81, 0x00]), Some(2));
    }

    #[test]
    fn test_12_byte_header() {
        let mut data = vec![0x0C, 0x8C];
        data.extend_from_slice(&[0u8; 10]);
        data.extend_from_slice(&[0x42, 0x43]);
        let parsed = parse_packet(&data);
        assert_eq!(parsed.payload_offset(), 12);
        assert_eq!(parsed.payload(), &[0x42, 0x43]);
    }

    #[test]
    fn test_header_exactly_packet_length() {
        let data = [0x04, 0x02, 0x00, 0x00];
        let parsed = parse_packet(&data);
        assert_eq!(parsed.payload_len(), 0);
        assert!(parsed.header().unwrap().end_of_frame);
    }

    #[test]
    fn test_header_length_too_small_is_headerless() {
        let data = [0x01, 0x02, 0x03, 0x04];
        assert_eq!(parse_packet(&data), ParsedPacket::Headerless(&data));

        let data = [0x00, 0x02, 0x03, 0x04];
        assert_eq!(parse_packet(&data), ParsedPacket::Headerless(&data));
    }

    #[test]
    fn test_header_exceeds_packet_is_headerless() {
        let data = [0xC8, 0x83, 0x11, 0x22];
        let parsed = parse_packet(&data);
        assert!(parsed.header().is_none());
        assert_eq!(parsed.payload_len(), 4);
        assert_eq!(parsed.payload_offset(), 0);
    }

    #[test]
    fn test_short_packets_are_headerless() {
        assert_eq!(parse_packet(&[]), ParsedPacket::Headerless(&[]));
        assert_eq!(parse_packet(&[0x02]), ParsedPacket::Headerless(&[0x02]));
    }

    proptest! {
        #[test]
        fn prop_payload_length_is_packet_minus_header(
            header_len in 2usize..=64,
            extra in 0usize..512,
            flags in any::<u8>(),
        ) {
            let total = header_len + extra;
            let mut packet = vec![0x5Au8; total];
            packet[0] = header_len as u8;
            packet[1] = flags;

            let parsed = parse_packet(&packet);
            prop_assert!(parsed.header().is_some());
            prop_assert_eq!(parsed.payload_len(), total - header_len);
            prop_assert_eq!(parsed.payload_offset() + parsed.payload_len(), total);
        }

        #[test]
        fn prop_parse_never_panics(packet in proptest::collection::vec(any::<u8>(), 0..300)) {
            let parsed = parse_packet(&packet);
            prop_assert!(parsed.payload_len() <= packet.len());
        }
    }
}
