//! # Framing Codec
//!
//! Wire format primitives: header and footer peeking, footer sizing, and the
//! additive checksum.
//!
//! ## Wire Format
//! ```text
//! [DataID(2)] [PayloadLen(2)] [Flags(1)] [Payload(N)] [Checksum(4)?] [SenderID(4)?]
//! ```
//!
//! All multi-byte fields are little-endian on the wire regardless of host
//! endianness. The footer fields are present only when the corresponding
//! flag bits are set; a packet carries at most 8 footer bytes.
//!
//! Peeking never copies payload bytes: the header and footer are decoded
//! directly from the frame slice.

use bytes::Buf;

/// Numeric identifier of a data type. Static IDs occupy `0..7`; custom IDs
/// are assigned starting at [`CUSTOM_DATA_START`](crate::protocol::data_id::CUSTOM_DATA_START).
pub type DataId = u16;

/// Payload length in bytes.
pub type PayloadLen = u16;

/// Unique identifier of a client. `0` is reserved for the server.
pub type ClientId = u32;

/// Additive packet checksum.
pub type Checksum = i32;

/// Maximum size of a whole packet: header, payload, and footer.
pub const MAX_PACKET_SIZE: usize = 1500;

/// Fixed packet header length in bytes.
pub const HEADER_LEN: usize = 5;

/// Maximum footer length in bytes (checksum plus sender ID).
pub const FOOTER_MAX_LEN: usize = 8;

/// Maximum payload length in bytes.
pub const MAX_PAYLOAD: usize = MAX_PACKET_SIZE - HEADER_LEN - FOOTER_MAX_LEN;

const CHECKSUM_LEN: usize = 4;
const SENDER_ID_LEN: usize = 4;

/// Packet flag bits.
///
/// Bits 0 and 1 are structural and locked by finalization; bits 2 through 7
/// are free for application use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketFlag {
    /// The footer carries a checksum
    Checksum = 0,
    /// The footer carries the sender's client ID, required for UDP
    UdpSupport = 1,
    /// Application-defined flag
    Custom1 = 2,
    /// Application-defined flag
    Custom2 = 3,
    /// Application-defined flag
    Custom3 = 4,
    /// Application-defined flag
    Custom4 = 5,
    /// Application-defined flag
    Custom5 = 6,
    /// Application-defined flag
    Custom6 = 7,
}

impl PacketFlag {
    /// Bit mask of this flag.
    pub fn mask(self) -> u8 {
        1 << (self as u8)
    }

    /// Whether this is an application-defined flag, mutable after
    /// finalization.
    pub fn is_custom(self) -> bool {
        (self as u8) >= PacketFlag::Custom1 as u8
    }
}

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    pub data_id: DataId,
    pub payload_len: PayloadLen,
    pub flags: u8,
}

/// Decoded packet footer. Fields are zero when the matching flag is unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFooter {
    pub checksum: Checksum,
    pub sender_id: ClientId,
}

/// Decode a header from the front of a frame without copying payload.
///
/// Returns `None` when fewer than [`HEADER_LEN`] bytes are available.
pub fn peek_header(data: &[u8]) -> Option<PacketHeader> {
    if data.len() < HEADER_LEN {
        return None;
    }
    let mut buf = &data[..HEADER_LEN];
    Some(PacketHeader {
        data_id: buf.get_u16_le(),
        payload_len: buf.get_u16_le(),
        flags: buf.get_u8(),
    })
}

/// Footer length in bytes implied by the given flags.
pub fn footer_len(flags: u8) -> usize {
    let mut len = 0;
    if flags & PacketFlag::Checksum.mask() != 0 {
        len += CHECKSUM_LEN;
    }
    if flags & PacketFlag::UdpSupport.mask() != 0 {
        len += SENDER_ID_LEN;
    }
    len
}

/// Whole-frame length implied by a header: header, payload, and footer.
pub fn frame_len(header: &PacketHeader) -> usize {
    HEADER_LEN + header.payload_len as usize + footer_len(header.flags)
}

/// Decode the footer of a frame given its header.
///
/// Returns `None` when the frame is shorter than [`frame_len`] requires.
pub fn peek_footer(data: &[u8], header: &PacketHeader) -> Option<PacketFooter> {
    if data.len() < frame_len(header) {
        return None;
    }
    let mut buf = &data[HEADER_LEN + header.payload_len as usize..];
    let mut footer = PacketFooter::default();
    if header.flags & PacketFlag::Checksum.mask() != 0 {
        footer.checksum = buf.get_i32_le();
    }
    if header.flags & PacketFlag::UdpSupport.mask() != 0 {
        footer.sender_id = buf.get_u32_le();
    }
    Some(footer)
}

/// Compute the additive checksum over a payload and its framing fields.
///
/// Each payload byte contributes as a signed 8-bit value; the data ID,
/// payload length, flags (sign-extended), and sender ID are added on top.
/// Arithmetic wraps in two's complement.
pub fn checksum(payload: &[u8], header: &PacketHeader, sender_id: ClientId) -> Checksum {
    let mut sum: Checksum = 0;
    for &byte in payload {
        sum = sum.wrapping_add((byte as i8) as Checksum);
    }
    sum.wrapping_add(header.data_id as Checksum)
        .wrapping_add(header.payload_len as Checksum)
        .wrapping_add((header.flags as i8) as Checksum)
        .wrapping_add(sender_id as Checksum)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(data_id: DataId, payload: &[u8], flags: u8, footer: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&data_id.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.push(flags);
        out.extend_from_slice(payload);
        out.extend_from_slice(footer);
        out
    }

    #[test]
    fn header_peek_is_little_endian() {
        let bytes = frame(0x0102, &[9, 9, 9], 0, &[]);
        let header = peek_header(&bytes).expect("header");
        assert_eq!(header.data_id, 0x0102);
        assert_eq!(header.payload_len, 3);
        assert_eq!(header.flags, 0);
    }

    #[test]
    fn short_slice_has_no_header() {
        assert!(peek_header(&[1, 2, 3, 4]).is_none());
    }

    #[test]
    fn footer_len_follows_flags() {
        assert_eq!(footer_len(0), 0);
        assert_eq!(footer_len(PacketFlag::Checksum.mask()), 4);
        assert_eq!(footer_len(PacketFlag::UdpSupport.mask()), 4);
        assert_eq!(
            footer_len(PacketFlag::Checksum.mask() | PacketFlag::UdpSupport.mask()),
            8
        );
        // custom flags never extend the footer
        assert_eq!(footer_len(PacketFlag::Custom3.mask()), 0);
    }

    #[test]
    fn footer_peek_reads_checksum_then_sender() {
        let flags = PacketFlag::Checksum.mask() | PacketFlag::UdpSupport.mask();
        let mut tail = Vec::new();
        tail.extend_from_slice(&(-5i32).to_le_bytes());
        tail.extend_from_slice(&42u32.to_le_bytes());
        let bytes = frame(7, &[1, 2], flags, &tail);

        let header = peek_header(&bytes).expect("header");
        let footer = peek_footer(&bytes, &header).expect("footer");
        assert_eq!(footer.checksum, -5);
        assert_eq!(footer.sender_id, 42);
    }

    #[test]
    fn footer_peek_rejects_truncated_frame() {
        let flags = PacketFlag::Checksum.mask();
        let bytes = frame(7, &[1, 2], flags, &[0, 0]); // footer cut short
        let header = peek_header(&bytes).expect("header");
        assert!(peek_footer(&bytes, &header).is_none());
    }

    #[test]
    fn checksum_treats_payload_bytes_as_signed() {
        let header = PacketHeader {
            data_id: 0,
            payload_len: 1,
            flags: 0,
        };
        // 0xFF contributes -1, not 255
        assert_eq!(checksum(&[0xFF], &header, 0), -1 + 1);
    }

    #[test]
    fn checksum_covers_framing_fields() {
        let header = PacketHeader {
            data_id: 10,
            payload_len: 2,
            flags: PacketFlag::UdpSupport.mask(),
        };
        let base = checksum(&[1, 2], &header, 0);
        assert_eq!(checksum(&[1, 2], &header, 5), base.wrapping_add(5));

        let other = PacketHeader {
            data_id: 11,
            ..header
        };
        assert_eq!(checksum(&[1, 2], &other, 0), base.wrapping_add(1));
    }
}
