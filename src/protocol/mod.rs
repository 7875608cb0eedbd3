//! # Protocol Definitions
//!
//! The session protocol's static vocabulary and the dispatch table that maps
//! application data names to numeric IDs and handler lists.

pub mod dispatcher;

use crate::core::codec::ClientId;

/// The server's ID on the wire. Client IDs are assigned starting at 1.
pub const SERVER_ID: ClientId = 0;

/// Static data IDs reserved by the session protocol itself.
///
/// Application data IDs are assigned dynamically starting at
/// [`CUSTOM_DATA_START`](data_id::CUSTOM_DATA_START); the server is
/// authoritative for the assignment.
pub mod data_id {
    use crate::core::codec::DataId;

    /// Server to client: opens the identification exchange on a fresh
    /// stream. Client to server: confirms the data list was ingested.
    pub const HANDSHAKE: DataId = 0;

    /// Client to server: requests a new client ID.
    /// Server to client: carries the assigned client ID.
    pub const INIT_CLIENT_ID: DataId = 1;

    /// Client to server: requests a reconnect under the old client ID.
    /// Server to client: carries the old ID if still available.
    pub const RECONNECT: DataId = 2;

    /// Either direction: the sender is ending the session.
    pub const DISCONNECT: DataId = 3;

    /// Client to server: requests the registered data vocabulary.
    /// Server to client: one entry of `(total, index, name, data_id)`.
    pub const INIT_CUSTOM_DATA_LIST: DataId = 4;

    /// Unassigned data ID; receiving it raises a transmit error.
    pub const UNKNOWN: DataId = 5;

    /// Liveness probe carrying the sender's expected timeout window.
    pub const ALIVENESS_TEST: DataId = 6;

    /// First data ID available for application data types.
    pub const CUSTOM_DATA_START: DataId = 7;
}

/// Which transport carried a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// The reliable ordered stream transport
    Tcp,
    /// The unreliable datagram transport
    Udp,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "TCP"),
            TransportKind::Udp => write!(f, "UDP"),
        }
    }
}
