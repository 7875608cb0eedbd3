//! # dualport
//!
//! A tick-driven client/server session library that exchanges typed, named
//! messages over a reliable TCP stream and an unreliable UDP channel sharing
//! one logical endpoint.
//!
//! ## Features
//! - **Named data types**: applications register data names and handlers;
//!   the server assigns numeric IDs and clients pick them up during the
//!   handshake, so the wire carries compact IDs while code speaks in names
//! - **Single port**: the server binds TCP and UDP to one port; the client
//!   binds its UDP socket to the stream's ephemeral address, which keeps NAT
//!   traversal simple
//! - **Automatic identity**: clients get a unique ID on connect and can
//!   reclaim it after a network drop; the server retains per-client user
//!   data across the gap
//! - **Liveness probing**: both sides exchange aliveness tests carrying
//!   their expected timeout windows and measure ping from the cadence
//! - **Cooperative driving**: no internal threads; all I/O is non-blocking
//!   and the caller paces `update()`
//!
//! ## Example
//! ```no_run
//! use dualport::config::ServerConfig;
//! use dualport::service::ServerSession;
//!
//! let mut server = ServerSession::new(ServerConfig::default());
//! server.add_data_handler("message", |server, pack, entry, _method| {
//!     let text = pack.remove_string().unwrap_or_default();
//!     let mut reply = server.create_packet("message");
//!     let _ = reply.add_string(&text);
//!     let _ = server.send_to_client(&mut reply, entry, true);
//! });
//! server.start(7777);
//! loop {
//!     server.update();
//!     std::thread::sleep(std::time::Duration::from_millis(1));
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::config::{ClientConfig, Config, LoggingConfig, ServerConfig};
pub use crate::core::codec::{ClientId, DataId, PacketFlag, MAX_PACKET_SIZE, MAX_PAYLOAD};
pub use crate::core::packet::Packet;
pub use crate::error::{PackError, ProtocolError, Result, SockError, TransmitError};
pub use crate::protocol::{data_id, TransportKind, SERVER_ID};
pub use crate::service::{
    ClientEntry, ClientEntryRef, ClientEntryState, ClientSession, ClientState, ServerSession,
    ServerState,
};
