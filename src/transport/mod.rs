//! # Transport Layer
//!
//! Thin non-blocking wrappers over the operating system's stream and
//! datagram sockets, plus error normalization. The session engines consume
//! only this narrow surface.

pub mod sock;
