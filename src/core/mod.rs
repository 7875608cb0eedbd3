//! # Core Components
//!
//! Low-level packet handling and wire framing.
//!
//! ## Components
//! - **Codec**: header/footer peeking and the additive checksum
//! - **Packet**: the bounded payload buffer with add/remove cursors
//!
//! ## Wire Format
//! ```text
//! [DataID(2)] [PayloadLen(2)] [Flags(1)] [Payload(N)] [Footer(0|4|8)]
//! ```
//!
//! Little-endian on the wire; maximum packet size 1500 bytes.

pub mod codec;
pub mod packet;
