//! # Session Engines
//!
//! The server and client halves of the session protocol. Both are
//! tick-driven: the caller invokes `update()` on a loop and every callback
//! fires from inside that call.

pub mod client;
pub mod server;

pub use client::{ClientSession, ClientState};
pub use server::{ClientEntry, ClientEntryRef, ClientEntryState, ServerSession, ServerState};
