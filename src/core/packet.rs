//! # Packet Buffer
//!
//! [`Packet`] is the unit of exchange: a bounded byte buffer with a typed
//! append cursor ("add") and a typed consume cursor ("remove"), framed by the
//! header and footer of [`codec`](crate::core::codec).
//!
//! Payload bytes live at their final wire offset from the moment they are
//! added, so serialization only writes the header and footer around them.
//! A packet remembers that it has been serialized and skips the work on
//! repeated sends; any mutation clears the memo.
//!
//! Removing data does not actually erase it: the consume cursor walks
//! forward and can be rewound with [`Packet::reset`]. [`Packet::clear`] drops
//! the payload length to zero without touching the allocation.
//!
//! Finalization locks the structural flag bits (checksum and sender ID) and
//! computes the footer; application flag bits stay mutable. A packet decoded
//! from received bytes borrows the frame instead of owning it, and is
//! promoted to an owned copy only if mutated.

use crate::core::codec::{
    self, Checksum, ClientId, DataId, PacketFlag, PacketFooter, PacketHeader, PayloadLen,
    HEADER_LEN, MAX_PACKET_SIZE, MAX_PAYLOAD,
};
use crate::error::PackError;
use crate::protocol::data_id;
use bytes::BufMut;
use std::cell::Cell;

/// Typed values that can cross the wire in a payload.
///
/// Encoding is always little-endian; on big-endian hosts the conversion
/// swaps, on little-endian hosts it is a plain copy. Raw byte runs that must
/// not be swapped go through [`Packet::add_bytes`] instead.
pub trait WireValue: Copy {
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// Encode into `out`, which is exactly `WIDTH` bytes.
    fn put_le(self, out: &mut [u8]);

    /// Decode from `data`, which is at least `WIDTH` bytes.
    fn get_le(data: &[u8]) -> Self;
}

macro_rules! impl_wire_value {
    ($($ty:ty),*) => {
        $(
            impl WireValue for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                fn put_le(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                fn get_le(data: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&data[..std::mem::size_of::<$ty>()]);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_wire_value!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

enum Storage<'a> {
    Owned(Box<[u8]>),
    Borrowed(&'a [u8]),
}

/// A protocol packet: header, payload, and optional footer over one backing
/// buffer.
pub struct Packet<'a> {
    header: PacketHeader,
    footer: PacketFooter,
    storage: Storage<'a>,
    remove_idx: Cell<usize>,
    finalized: bool,
    serialized: bool,
}

impl Packet<'static> {
    /// Create an empty packet with the unknown data ID.
    pub fn new() -> Self {
        Self::with_data_id(data_id::UNKNOWN)
    }

    /// Create an empty packet carrying the given data ID.
    pub fn with_data_id(id: DataId) -> Self {
        Packet {
            header: PacketHeader {
                data_id: id,
                payload_len: 0,
                flags: 0,
            },
            footer: PacketFooter::default(),
            storage: Storage::Owned(vec![0u8; MAX_PACKET_SIZE].into_boxed_slice()),
            remove_idx: Cell::new(0),
            finalized: false,
            serialized: false,
        }
    }
}

impl Default for Packet<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Packet<'a> {
    /// Wrap a received frame without copying it.
    ///
    /// The frame must hold a complete packet: callers are expected to have
    /// validated the length against [`codec::frame_len`] first. The packet
    /// borrows the frame and never frees it; mutation promotes the packet to
    /// its own copy.
    pub fn from_frame(frame: &'a [u8]) -> Option<Packet<'a>> {
        let header = codec::peek_header(frame)?;
        if header.payload_len as usize > MAX_PAYLOAD {
            return None;
        }
        let footer = codec::peek_footer(frame, &header)?;
        Some(Packet {
            header,
            footer,
            storage: Storage::Borrowed(frame),
            remove_idx: Cell::new(0),
            finalized: false,
            serialized: false,
        })
    }

    fn bytes(&self) -> &[u8] {
        match &self.storage {
            Storage::Owned(buf) => buf,
            Storage::Borrowed(frame) => frame,
        }
    }

    /// Backing buffer for mutation, copying a borrowed frame on first use.
    fn owned_buf(&mut self) -> &mut [u8] {
        if let Storage::Borrowed(frame) = self.storage {
            let mut buf = vec![0u8; MAX_PACKET_SIZE].into_boxed_slice();
            let copied = frame.len().min(MAX_PACKET_SIZE);
            buf[..copied].copy_from_slice(&frame[..copied]);
            self.storage = Storage::Owned(buf);
        }
        match &mut self.storage {
            Storage::Owned(buf) => buf,
            Storage::Borrowed(_) => unreachable!("storage was promoted above"),
        }
    }

    /// This packet's data ID.
    pub fn data_id(&self) -> DataId {
        self.header.data_id
    }

    /// Change the data ID. Rejected after finalization.
    pub fn set_data_id(&mut self, id: DataId) -> Result<(), PackError> {
        if self.finalized {
            return Err(PackError::HasBeenFinalized);
        }
        self.header.data_id = id;
        self.serialized = false;
        Ok(())
    }

    /// Payload length in bytes.
    pub fn payload_len(&self) -> PayloadLen {
        self.header.payload_len
    }

    /// Payload bytes not yet consumed by the remove cursor.
    pub fn remaining_payload(&self) -> usize {
        self.header.payload_len as usize - self.remove_idx.get()
    }

    /// Footer length in bytes implied by the current flags.
    pub fn footer_len(&self) -> usize {
        codec::footer_len(self.header.flags)
    }

    /// Whole packet size: header, payload, and footer.
    pub fn packet_size(&self) -> usize {
        HEADER_LEN + self.header.payload_len as usize + self.footer_len()
    }

    /// The payload region of the backing buffer.
    pub fn payload(&self) -> &[u8] {
        &self.bytes()[HEADER_LEN..HEADER_LEN + self.header.payload_len as usize]
    }

    /// Append a typed value to the payload.
    pub fn add<T: WireValue>(&mut self, value: T) -> Result<(), PackError> {
        if self.finalized {
            return Err(PackError::HasBeenFinalized);
        }
        let offset = self.header.payload_len as usize;
        if offset + T::WIDTH > MAX_PAYLOAD {
            return Err(PackError::InvalidDataSize);
        }
        let buf = self.owned_buf();
        value.put_le(&mut buf[HEADER_LEN + offset..HEADER_LEN + offset + T::WIDTH]);
        self.header.payload_len += T::WIDTH as PayloadLen;
        self.serialized = false;
        Ok(())
    }

    /// Append raw bytes to the payload, untouched by endianness conversion.
    pub fn add_bytes(&mut self, data: &[u8]) -> Result<(), PackError> {
        if self.finalized {
            return Err(PackError::HasBeenFinalized);
        }
        let offset = self.header.payload_len as usize;
        if offset + data.len() > MAX_PAYLOAD {
            return Err(PackError::InvalidDataSize);
        }
        let buf = self.owned_buf();
        buf[HEADER_LEN + offset..HEADER_LEN + offset + data.len()].copy_from_slice(data);
        self.header.payload_len += data.len() as PayloadLen;
        self.serialized = false;
        Ok(())
    }

    /// Append a length-prefixed UTF-8 string to the payload.
    pub fn add_string(&mut self, value: &str) -> Result<(), PackError> {
        if value.len() > PayloadLen::MAX as usize {
            return Err(PackError::InvalidDataSize);
        }
        let offset = self.header.payload_len as usize;
        if offset + std::mem::size_of::<PayloadLen>() + value.len() > MAX_PAYLOAD {
            return Err(PackError::InvalidDataSize);
        }
        self.add::<PayloadLen>(value.len() as PayloadLen)?;
        self.add_bytes(value.as_bytes())
    }

    /// Consume a typed value from the payload.
    pub fn remove<T: WireValue>(&self) -> Result<T, PackError> {
        let idx = self.remove_idx.get();
        if (self.header.payload_len as usize) < idx + T::WIDTH {
            return Err(PackError::InvalidDataSize);
        }
        let value = T::get_le(&self.payload()[idx..idx + T::WIDTH]);
        self.remove_idx.set(idx + T::WIDTH);
        Ok(value)
    }

    /// Consume `len` raw bytes from the payload.
    pub fn remove_bytes(&self, len: usize) -> Result<&[u8], PackError> {
        let idx = self.remove_idx.get();
        if (self.header.payload_len as usize) < idx + len {
            return Err(PackError::InvalidDataSize);
        }
        let bytes = &self.payload()[idx..idx + len];
        self.remove_idx.set(idx + len);
        Ok(bytes)
    }

    /// Consume a length-prefixed UTF-8 string from the payload.
    pub fn remove_string(&self) -> Result<String, PackError> {
        let len = self.remove::<PayloadLen>()? as usize;
        let bytes = self.remove_bytes(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Rewind the remove cursor so consumption starts from the front again.
    pub fn reset(&self) {
        self.remove_idx.set(0);
    }

    /// Drop the payload to zero length and lift finalization. The backing
    /// allocation is untouched.
    pub fn clear(&mut self) {
        self.reset();
        self.header.payload_len = 0;
        self.finalized = false;
        self.serialized = false;
    }

    /// Whether this packet has been finalized.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Lock the structural flags and compute the footer.
    ///
    /// With `add_checksum`, the footer carries a checksum over the current
    /// payload. With `add_udp_support`, the footer carries `sender_id` so a
    /// datagram can be correlated with its sender. Finalizing again
    /// overwrites the previous footer.
    pub fn finalize(&mut self, add_checksum: bool, add_udp_support: bool, sender_id: ClientId) {
        self.set_flag_bit(PacketFlag::Checksum, add_checksum);
        self.set_flag_bit(PacketFlag::UdpSupport, add_udp_support);
        if add_udp_support {
            self.footer.sender_id = sender_id;
        }
        if add_checksum {
            self.footer.checksum = self.calculate_checksum();
        }
        self.finalized = true;
        self.serialized = false;
    }

    fn set_flag_bit(&mut self, flag: PacketFlag, on: bool) {
        if on {
            self.header.flags |= flag.mask();
        } else {
            self.header.flags &= !flag.mask();
        }
    }

    /// Set a flag bit. Structural flags are rejected after finalization;
    /// application flags stay mutable.
    pub fn set_flag(&mut self, flag: PacketFlag, on: bool) -> Result<(), PackError> {
        if self.finalized && !flag.is_custom() {
            return Err(PackError::HasBeenFinalized);
        }
        self.set_flag_bit(flag, on);
        self.serialized = false;
        Ok(())
    }

    /// Read a flag bit.
    pub fn flag(&self, flag: PacketFlag) -> bool {
        self.header.flags & flag.mask() != 0
    }

    /// Compute the checksum over the current payload and framing fields.
    pub fn calculate_checksum(&self) -> Checksum {
        codec::checksum(self.payload(), &self.header, self.footer.sender_id)
    }

    /// Whether the transmitted checksum matches the payload. Packets without
    /// the checksum flag are always considered valid.
    pub fn is_valid(&self) -> bool {
        if !self.flag(PacketFlag::Checksum) {
            return true;
        }
        self.footer.checksum == self.calculate_checksum()
    }

    /// The sender ID from the footer. Meaningful only when the
    /// [`PacketFlag::UdpSupport`] flag is set.
    pub fn sender_id(&self) -> ClientId {
        self.footer.sender_id
    }

    /// The transmitted checksum. Meaningful only when the
    /// [`PacketFlag::Checksum`] flag is set.
    pub fn checksum(&self) -> Checksum {
        self.footer.checksum
    }

    /// Write the header and footer around the payload and return the wire
    /// bytes.
    ///
    /// Repeated calls are free until the packet is mutated again.
    pub fn serialize(&mut self) -> &[u8] {
        if !self.serialized {
            let header = self.header;
            let footer = self.footer;
            let payload_end = HEADER_LEN + header.payload_len as usize;
            let buf = self.owned_buf();
            {
                let mut front = &mut buf[..HEADER_LEN];
                front.put_u16_le(header.data_id);
                front.put_u16_le(header.payload_len);
                front.put_u8(header.flags);
            }
            let mut tail = &mut buf[payload_end..];
            if header.flags & PacketFlag::Checksum.mask() != 0 {
                tail.put_i32_le(footer.checksum);
            }
            if header.flags & PacketFlag::UdpSupport.mask() != 0 {
                tail.put_u32_le(footer.sender_id);
            }
            self.serialized = true;
        }
        &self.bytes()[..self.packet_size()]
    }
}

/// Deep copy: header, footer, payload bytes, and the remove cursor carry
/// over; the serialized memo is reset.
impl Clone for Packet<'_> {
    fn clone(&self) -> Self {
        let mut buf = vec![0u8; MAX_PACKET_SIZE].into_boxed_slice();
        let payload_end = HEADER_LEN + self.header.payload_len as usize;
        buf[HEADER_LEN..payload_end].copy_from_slice(self.payload());
        Packet {
            header: self.header,
            footer: self.footer,
            storage: Storage::Owned(buf),
            remove_idx: Cell::new(self.remove_idx.get()),
            finalized: self.finalized,
            serialized: false,
        }
    }
}

impl std::fmt::Debug for Packet<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("data_id", &self.header.data_id)
            .field("payload_len", &self.header.payload_len)
            .field("flags", &self.header.flags)
            .field("finalized", &self.finalized)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::data_id;

    #[test]
    fn add_remove_roundtrip_in_order() {
        let mut pack = Packet::with_data_id(7);
        pack.add::<u8>(1).unwrap();
        pack.add::<u16>(513).unwrap();
        pack.add::<u32>(70_000).unwrap();
        pack.add::<i32>(-9).unwrap();
        pack.add::<f32>(2.5).unwrap();
        pack.add_string("hello").unwrap();

        pack.reset();
        assert_eq!(pack.remove::<u8>().unwrap(), 1);
        assert_eq!(pack.remove::<u16>().unwrap(), 513);
        assert_eq!(pack.remove::<u32>().unwrap(), 70_000);
        assert_eq!(pack.remove::<i32>().unwrap(), -9);
        assert_eq!(pack.remove::<f32>().unwrap(), 2.5);
        assert_eq!(pack.remove_string().unwrap(), "hello");
        assert_eq!(pack.remaining_payload(), 0);
    }

    #[test]
    fn add_rejects_payload_overflow() {
        let mut pack = Packet::new();
        pack.add_bytes(&vec![0u8; MAX_PAYLOAD]).unwrap();
        assert_eq!(pack.add::<u8>(1), Err(PackError::InvalidDataSize));
        assert_eq!(pack.payload_len() as usize, MAX_PAYLOAD);
    }

    #[test]
    fn remove_rejects_underflow() {
        let mut pack = Packet::new();
        pack.add::<u16>(3).unwrap();
        assert!(pack.remove::<u16>().is_ok());
        assert_eq!(pack.remove::<u8>(), Err(PackError::InvalidDataSize));
    }

    #[test]
    fn reset_rewinds_remove_cursor_only() {
        let mut pack = Packet::new();
        pack.add::<u32>(99).unwrap();
        assert_eq!(pack.remove::<u32>().unwrap(), 99);
        pack.reset();
        assert_eq!(pack.remove::<u32>().unwrap(), 99);
        assert_eq!(pack.payload_len(), 4);
    }

    #[test]
    fn clear_drops_payload_and_finalization() {
        let mut pack = Packet::with_data_id(9);
        pack.add::<u32>(5).unwrap();
        pack.finalize(true, false, 0);
        assert!(pack.is_finalized());

        pack.clear();
        assert!(!pack.is_finalized());
        assert_eq!(pack.payload_len(), 0);
        assert!(pack.add::<u8>(1).is_ok());
    }

    #[test]
    fn finalize_locks_structural_flags() {
        let mut pack = Packet::with_data_id(8);
        pack.add::<u8>(1).unwrap();
        pack.finalize(true, true, 12);

        assert_eq!(
            pack.set_flag(PacketFlag::Checksum, false),
            Err(PackError::HasBeenFinalized)
        );
        assert_eq!(pack.set_data_id(3), Err(PackError::HasBeenFinalized));
        assert_eq!(pack.add::<u8>(2), Err(PackError::HasBeenFinalized));
        // application flags stay mutable
        assert!(pack.set_flag(PacketFlag::Custom2, true).is_ok());
        assert!(pack.flag(PacketFlag::Custom2));
    }

    #[test]
    fn finalize_twice_overwrites_footer() {
        let mut pack = Packet::with_data_id(8);
        pack.add::<u8>(1).unwrap();
        pack.finalize(true, true, 12);
        let first = pack.checksum();

        pack.finalize(true, true, 99);
        assert_eq!(pack.sender_id(), 99);
        assert_ne!(pack.checksum(), first);
        assert!(pack.is_valid());
    }

    #[test]
    fn tampering_invalidates_checksum() {
        let mut pack = Packet::with_data_id(20);
        pack.add_string("payload").unwrap();
        pack.finalize(true, true, 3);
        assert!(pack.is_valid());

        let mut wire = pack.serialize().to_vec();
        wire[HEADER_LEN] ^= 0x40;
        let tampered = Packet::from_frame(&wire).expect("frame parses");
        assert!(!tampered.is_valid());
    }

    #[test]
    fn serialize_roundtrip_preserves_everything() {
        let mut pack = Packet::with_data_id(31);
        pack.add::<u16>(600).unwrap();
        pack.add_string("abc").unwrap();
        pack.set_flag(PacketFlag::Custom1, true).unwrap();
        pack.finalize(true, true, 77);

        let wire = pack.serialize().to_vec();
        let parsed = Packet::from_frame(&wire).expect("frame parses");
        assert_eq!(parsed.data_id(), 31);
        assert_eq!(parsed.payload_len(), pack.payload_len());
        assert!(parsed.flag(PacketFlag::Checksum));
        assert!(parsed.flag(PacketFlag::UdpSupport));
        assert!(parsed.flag(PacketFlag::Custom1));
        assert_eq!(parsed.sender_id(), 77);
        assert_eq!(parsed.checksum(), pack.checksum());
        assert!(parsed.is_valid());
        assert_eq!(parsed.remove::<u16>().unwrap(), 600);
        assert_eq!(parsed.remove_string().unwrap(), "abc");
    }

    #[test]
    fn mutation_invalidates_serialized_bytes() {
        let mut pack = Packet::with_data_id(7);
        pack.add::<u8>(1).unwrap();
        let first = pack.serialize().to_vec();

        pack.add::<u8>(2).unwrap();
        let second = pack.serialize().to_vec();
        assert_ne!(first, second);
        assert_eq!(second.len(), first.len() + 1);
    }

    #[test]
    fn borrowed_packet_promotes_on_mutation() {
        let mut source = Packet::with_data_id(7);
        source.add::<u32>(123).unwrap();
        let wire = source.serialize().to_vec();

        let mut pack = Packet::from_frame(&wire).expect("frame parses");
        pack.add::<u32>(456).unwrap();
        assert_eq!(pack.remove::<u32>().unwrap(), 123);
        assert_eq!(pack.remove::<u32>().unwrap(), 456);
        // the original frame is untouched
        assert_eq!(wire.len(), HEADER_LEN + 4);
    }

    #[test]
    fn clone_is_deep_and_keeps_cursor() {
        let mut pack = Packet::with_data_id(7);
        pack.add::<u32>(1).unwrap();
        pack.add::<u32>(2).unwrap();
        assert_eq!(pack.remove::<u32>().unwrap(), 1);

        let copy = pack.clone();
        assert_eq!(copy.remove::<u32>().unwrap(), 2);
        // the original cursor is independent of the copy's
        assert_eq!(pack.remove::<u32>().unwrap(), 2);
    }

    #[test]
    fn new_packet_carries_unknown_id() {
        assert_eq!(Packet::new().data_id(), data_id::UNKNOWN);
    }

    #[test]
    fn oversized_string_is_rejected_atomically() {
        let mut pack = Packet::new();
        pack.add_bytes(&vec![0u8; MAX_PAYLOAD - 4]).unwrap();
        let before = pack.payload_len();
        assert_eq!(pack.add_string("too long"), Err(PackError::InvalidDataSize));
        assert_eq!(pack.payload_len(), before);
    }
}
