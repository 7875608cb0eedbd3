//! # Error Types
//!
//! Error handling for the session protocol.
//!
//! Errors are values throughout the crate: send operations return a
//! [`TransmitError`] instead of panicking, receive paths report problems
//! through the `transmit_error` callback and keep running, and packet
//! composition returns a [`PackError`] when an operation would overflow or
//! violate finalization.
//!
//! ## Error Categories
//! - **Socket errors**: OS-level failures, normalized to [`SockError`]
//! - **Transmit errors**: protocol-level failures ([`TransmitError`])
//! - **Pack errors**: packet buffer misuse ([`PackError`])
//!
//! All errors implement `std::error::Error` for interoperability.

use std::io;
use thiserror::Error;

/// Normalized socket error taxonomy.
///
/// The OS layer reports many platform-specific codes; the engines only care
/// about this small set. Anything else maps to `Invalid`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockError {
    /// Generic socket error
    #[error("socket error")]
    Invalid,

    /// The connection has been reset or terminated by the peer
    #[error("connection reset")]
    ConnReset,

    /// The action needs more time to complete and must be called again
    #[error("operation would block")]
    WouldBlock,

    /// The action is in progress
    #[error("operation in progress")]
    InProgress,

    /// The socket is already connected
    #[error("socket is already connected")]
    IsConn,

    /// The action has already completed
    #[error("operation already completed")]
    Already,
}

impl SockError {
    /// Normalize an `io::Error` into the socket taxonomy.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => SockError::WouldBlock,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => SockError::ConnReset,
            io::ErrorKind::AlreadyExists => SockError::Already,
            _ => SockError::Invalid,
        }
    }
}

/// Protocol-level transmission errors.
///
/// Returned by the send paths and delivered to the `transmit_error` callback
/// by the receive paths.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitError {
    /// No data could be sent or received
    #[error("no data transmitted")]
    NoTransmit,

    /// No matching client was found for the packet
    #[error("client not found")]
    ClientNotFound,

    /// The datagram socket has not been bound yet
    #[error("stream socket not bound")]
    StreamNotBound,

    /// The peer is not connected
    #[error("client not connected")]
    ClientNotConnected,

    /// The packet's checksum does not match its payload
    #[error("invalid checksum")]
    InvalidChecksum,

    /// The packet's data ID is not handled or was sent as unknown
    #[error("invalid data ID")]
    InvalidDataId,

    /// The packet's payload size exceeds the maximum
    #[error("invalid payload size")]
    InvalidPayloadSize,
}

/// Packet buffer errors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackError {
    /// An add would exceed the maximum payload, or a remove would underflow
    /// the remaining payload
    #[error("invalid data size for payload operation")]
    InvalidDataSize,

    /// A structural mutation was attempted after finalization
    #[error("packet has been finalized")]
    HasBeenFinalized,
}

/// Primary error type for fallible crate-level operations.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("packet error: {0}")]
    Pack(#[from] PackError),

    #[error("transmit error: {0}")]
    Transmit(#[from] TransmitError),
}

/// Type alias for Results using [`ProtocolError`].
pub type Result<T> = std::result::Result<T, ProtocolError>;
