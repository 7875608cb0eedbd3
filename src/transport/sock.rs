//! Non-blocking socket helpers.
//!
//! Everything the engines need from the OS: bound non-blocking listeners and
//! datagram sockets, a bounded connect, and send helpers with the optional
//! busy-spin on `WouldBlock`.
//!
//! Send helpers return the number of bytes sent or a
//! [`TransmitError::NoTransmit`]; callers that need strict per-tick bounds
//! pass `block = false` and get the would-block outcome as a plain failure.

use crate::error::{SockError, TransmitError};
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::time::Duration;
use tracing::trace;

/// Bind a non-blocking TCP listener on `ANY_ADDRESS:port`.
pub fn bind_listener(port: u16) -> io::Result<TcpListener> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Bind a non-blocking UDP socket to the given address.
pub fn bind_udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(addr)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// Connect a stream socket within the given bound, then switch it to
/// non-blocking mode for the tick loop.
pub fn connect_stream(addr: SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    let stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_nonblocking(true)?;
    Ok(stream)
}

/// Whether a connect failure is worth another attempt on a later tick.
pub fn connect_is_retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
    )
}

/// Whether a receive failure means the connection is gone.
pub fn is_reset(err: &io::Error) -> bool {
    SockError::from_io(err) == SockError::ConnReset
}

/// Read into `buf` from a non-blocking stream.
///
/// `Ok(None)` means no data was available this tick.
pub fn recv_stream(stream: &TcpStream, buf: &mut [u8]) -> Result<Option<usize>, io::Error> {
    let mut reader = stream;
    match reader.read(buf) {
        Ok(n) => Ok(Some(n)),
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(err) => Err(err),
    }
}

/// Receive one datagram into `buf` from a non-blocking socket.
///
/// `Ok(None)` means no datagram was available this tick.
pub fn recv_dgram(
    socket: &UdpSocket,
    buf: &mut [u8],
) -> Result<Option<(usize, SocketAddr)>, io::Error> {
    match socket.recv_from(buf) {
        Ok((n, from)) => Ok(Some((n, from))),
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(err) => Err(err),
    }
}

/// Send bytes on a stream socket, optionally spinning until the socket
/// accepts them.
pub fn send_stream(stream: &TcpStream, bytes: &[u8], block: bool) -> Result<usize, TransmitError> {
    let mut writer = stream;
    loop {
        match writer.write(bytes) {
            Ok(sent) => return Ok(sent),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock && block => continue,
            Err(err) => {
                trace!(error = %err, "stream send failed");
                return Err(TransmitError::NoTransmit);
            }
        }
    }
}

/// Send one datagram, optionally spinning until the socket accepts it.
pub fn send_dgram(
    socket: &UdpSocket,
    bytes: &[u8],
    to: SocketAddr,
    block: bool,
) -> Result<usize, TransmitError> {
    loop {
        match socket.send_to(bytes, to) {
            Ok(sent) => return Ok(sent),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock && block => continue,
            Err(err) => {
                trace!(error = %err, "datagram send failed");
                return Err(TransmitError::NoTransmit);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_is_nonblocking() {
        let listener = bind_listener(0).expect("bind");
        match listener.accept() {
            Err(err) => assert_eq!(err.kind(), io::ErrorKind::WouldBlock),
            Ok(_) => panic!("unexpected connection"),
        }
    }

    #[test]
    fn classify_maps_reset_kinds() {
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "gone");
        assert!(is_reset(&reset));
        let would_block = io::Error::new(io::ErrorKind::WouldBlock, "later");
        assert!(!is_reset(&would_block));
        assert_eq!(SockError::from_io(&would_block), SockError::WouldBlock);
    }
}
