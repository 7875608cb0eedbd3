//! End-to-end session tests over loopback sockets.
//!
//! Each test drives a real server and client through their tick loops on
//! 127.0.0.1, exercising the handshake, data-list negotiation, dispatch,
//! reconnection, and the error paths for malformed traffic.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use dualport::config::{ClientConfig, ServerConfig};
use dualport::core::codec::HEADER_LEN;
use dualport::service::{ClientSession, ServerSession};
use dualport::{Packet, TransmitError, TransportKind};
use std::cell::{Cell, RefCell};
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("probe bind")
        .local_addr()
        .expect("probe addr")
        .port()
}

fn server_addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

fn fast_client_config() -> ClientConfig {
    ClientConfig {
        connection_delay: Duration::from_millis(50),
        ..ClientConfig::default()
    }
}

fn fast_server_config() -> ServerConfig {
    ServerConfig {
        aliveness_test_delay: Duration::from_millis(50),
        disconnected_client_flush_delay: Duration::from_millis(10_000),
        ..ServerConfig::default()
    }
}

/// Tick both sessions until `done` reports completion or the budget runs
/// out. Conditions live in shared cells so handlers can flip them.
fn pump(server: &mut ServerSession, client: &mut ClientSession, done: impl Fn() -> bool) -> bool {
    for _ in 0..4000 {
        server.update();
        client.update();
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

/// Tick both sessions a fixed number of times.
fn settle(server: &mut ServerSession, client: &mut ClientSession, ticks: u32) {
    for _ in 0..ticks {
        server.update();
        client.update();
        thread::sleep(Duration::from_millis(1));
    }
}

fn connect_until_ready(server: &mut ServerSession, client: &mut ClientSession, port: u16) {
    let ready = Rc::new(Cell::new(false));
    {
        let ready = ready.clone();
        client.on_ready(move |_| ready.set(true));
    }
    client.connect(server_addr(port));
    assert!(
        pump(server, client, || ready.get()),
        "session never became ready"
    );
}

#[test]
fn data_list_negotiation_assigns_server_ids() {
    let port = free_port();
    let mut server = ServerSession::new(ServerConfig::default());
    assert!(server.add_data_type("a"));
    assert!(server.add_data_type("b"));
    assert!(server.add_data_type("c"));
    server.start(port);

    let mut client = ClientSession::new(fast_client_config());
    client.add_data_handler("b", |_, _, _| {});
    client.add_data_handler("a", |_, _, _| {});
    connect_until_ready(&mut server, &mut client, port);

    // the server assigned 7, 8, 9 in registration order; the client matched
    // its own names and picked up "c" as a passive entry
    assert_eq!(server.data_id_for_name("a"), 7);
    assert_eq!(client.data_id_for_name("a"), 7);
    assert_eq!(client.data_id_for_name("b"), 8);
    assert_eq!(client.data_id_for_name("c"), 9);
    assert_eq!(client.name_for_data_id(9), Some("c"));
    assert_ne!(client.client_id(), 0);

    server.stop();
}

#[test]
fn registration_is_closed_after_start() {
    let port = free_port();
    let mut server = ServerSession::new(ServerConfig::default());
    assert!(server.add_data_handler("early", |_, _, _, _| {}));
    server.start(port);

    assert!(!server.add_data_type("late"));
    assert!(!server.add_data_handler("late", |_, _, _, _| {}));
    // appending to an existing name stays allowed
    assert!(server.add_data_handler("early", |_, _, _, _| {}));

    server.stop();
}

#[test]
fn round_trip_message_over_both_transports() {
    let port = free_port();
    let mut server = ServerSession::new(ServerConfig::default());
    let server_saw = Rc::new(RefCell::new(None::<String>));
    {
        let server_saw = server_saw.clone();
        server.add_data_handler("message", move |server, pack, entry, _method| {
            let text = pack.remove_string().unwrap();
            *server_saw.borrow_mut() = Some(text);
            let mut reply = server.create_packet("message");
            reply.add_string("Ty").unwrap();
            reply.add::<u32>(1).unwrap();
            server
                .stream_to_client(&mut reply, entry, true)
                .expect("stream reply");
        });
    }
    server.start(port);

    let mut client = ClientSession::new(fast_client_config());
    let client_saw = Rc::new(RefCell::new(None::<(String, u32, TransportKind)>));
    {
        let client_saw = client_saw.clone();
        client.add_data_handler("message", move |_, pack, method| {
            let text = pack.remove_string().unwrap();
            let number = pack.remove::<u32>().unwrap();
            *client_saw.borrow_mut() = Some((text, number, method));
        });
    }
    connect_until_ready(&mut server, &mut client, port);

    // both datagram sockets must be up before streaming
    settle(&mut server, &mut client, 20);
    assert!(server.is_stream_bound());
    assert!(client.is_stream_bound());

    let mut pack = client.create_packet("message");
    pack.add_string("Wassup?").unwrap();
    client.send_to_server(&mut pack, true).expect("send");

    let done = {
        let client_saw = client_saw.clone();
        move || client_saw.borrow().is_some()
    };
    assert!(pump(&mut server, &mut client, done), "no reply arrived");

    assert_eq!(server_saw.borrow().as_deref(), Some("Wassup?"));
    let (text, number, method) = client_saw.borrow().clone().unwrap();
    assert_eq!(text, "Ty");
    assert_eq!(number, 1);
    assert_eq!(method, TransportKind::Udp);

    server.stop();
}

#[test]
fn reconnect_preserves_identity_and_user_data() {
    const MARKER: u64 = 0x5EED;

    let port = free_port();
    let mut server = ServerSession::new(fast_server_config());
    let init_count = Rc::new(Cell::new(0u32));
    let destroy_count = Rc::new(Cell::new(0u32));
    let server_reconnected = Rc::new(Cell::new(false));
    {
        let init_count = init_count.clone();
        server.on_initialize(move |_, entry| {
            init_count.set(init_count.get() + 1);
            entry.borrow_mut().set_user_data(MARKER);
        });
    }
    {
        let destroy_count = destroy_count.clone();
        server.on_destroy(move |_, _| destroy_count.set(destroy_count.get() + 1));
    }
    {
        let server_reconnected = server_reconnected.clone();
        server.on_reconnect(move |_, _| server_reconnected.set(true));
    }
    server.start(port);

    let mut client = ClientSession::new(fast_client_config());
    let client_reconnected = Rc::new(Cell::new(false));
    {
        let client_reconnected = client_reconnected.clone();
        client.on_reconnect(move |_| client_reconnected.set(true));
    }
    connect_until_ready(&mut server, &mut client, port);

    let original_id = client.client_id();
    assert_ne!(original_id, 0);
    assert_eq!(init_count.get(), 1);

    // drop the session; the client walks its reconnect path with the old ID
    client.disconnect_and_reconnect();

    let done = {
        let flag = client_reconnected.clone();
        move || flag.get()
    };
    assert!(pump(&mut server, &mut client, done), "reconnect never completed");

    assert!(server_reconnected.get());
    assert_eq!(client.client_id(), original_id);

    let entry = server
        .client_entry(original_id)
        .expect("entry restored under old ID");
    assert_eq!(entry.borrow().user_data::<u64>().copied(), Some(MARKER));
    // the identity transfer reuses the original lifecycle
    assert_eq!(init_count.get(), 1);
    assert_eq!(destroy_count.get(), 0);

    server.stop();
    assert_eq!(destroy_count.get(), 1);
}

#[test]
fn destroy_fires_once_after_retention_expires() {
    let port = free_port();
    let mut server = ServerSession::new(ServerConfig {
        aliveness_test_delay: Duration::from_millis(30),
        disconnected_client_flush_delay: Duration::from_millis(100),
        ..ServerConfig::default()
    });
    let init_count = Rc::new(Cell::new(0u32));
    let destroy_count = Rc::new(Cell::new(0u32));
    {
        let init_count = init_count.clone();
        server.on_initialize(move |_, _| init_count.set(init_count.get() + 1));
    }
    {
        let destroy_count = destroy_count.clone();
        server.on_destroy(move |_, _| destroy_count.set(destroy_count.get() + 1));
    }
    server.start(port);

    let mut client = ClientSession::new(fast_client_config());
    connect_until_ready(&mut server, &mut client, port);
    assert_eq!(init_count.get(), 1);

    client.disconnect();

    let done = {
        let destroy_count = destroy_count.clone();
        move || destroy_count.get() > 0
    };
    assert!(pump(&mut server, &mut client, done), "retention never expired");
    assert_eq!(destroy_count.get(), 1);

    server.stop();
    // stop must not double-fire destroy for the flushed entry
    assert_eq!(destroy_count.get(), 1);
}

#[test]
fn oversized_header_consumes_buffer_and_keeps_running() {
    let port = free_port();
    let mut server = ServerSession::new(ServerConfig::default());
    let seen_error = Rc::new(Cell::new(None::<TransmitError>));
    {
        let seen_error = seen_error.clone();
        server.on_transmit_error(move |_, _, _, _, error| seen_error.set(Some(error)));
    }
    server.start(port);
    server.update();

    // a raw peer claiming a 1500-byte payload, beyond the maximum
    let mut rogue = TcpStream::connect(server_addr(port)).expect("connect");
    let mut header = Vec::new();
    header.extend_from_slice(&7u16.to_le_bytes());
    header.extend_from_slice(&1500u16.to_le_bytes());
    header.push(0);
    rogue.write_all(&header).expect("write header");

    for _ in 0..200 {
        server.update();
        if seen_error.get().is_some() {
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(seen_error.get(), Some(TransmitError::InvalidPayloadSize));
    assert!(server.is_ready());
    assert_eq!(server.client_count(), 1, "rogue peer stays connected");

    server.stop();
}

#[test]
fn udp_without_sender_id_reports_client_not_found() {
    let port = free_port();
    let mut server = ServerSession::new(ServerConfig::default());
    let handled = Rc::new(Cell::new(false));
    let seen_error = Rc::new(Cell::new(None::<TransmitError>));
    {
        let handled = handled.clone();
        server.add_data_handler("message", move |_, _, _, _| handled.set(true));
    }
    {
        let seen_error = seen_error.clone();
        server.on_transmit_error(move |_, _, _, _, error| seen_error.set(Some(error)));
    }
    server.start(port);
    for _ in 0..10 {
        server.update();
        thread::sleep(Duration::from_millis(1));
    }
    assert!(server.is_stream_bound());

    // datagram with no sender-ID footer; the server cannot attribute it
    let rogue = UdpSocket::bind("127.0.0.1:0").expect("bind");
    let mut pack = Packet::with_data_id(7);
    pack.add::<u32>(123).unwrap();
    rogue
        .send_to(pack.serialize(), server_addr(port))
        .expect("send");

    for _ in 0..200 {
        server.update();
        if seen_error.get().is_some() {
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(seen_error.get(), Some(TransmitError::ClientNotFound));
    assert!(!handled.get(), "no handler may fire");
    assert_eq!(server.client_count(), 0);

    server.stop();
}

#[test]
fn corrupted_datagram_reports_invalid_checksum() {
    let port = free_port();
    let mut server = ServerSession::new(ServerConfig::default());
    let handled = Rc::new(Cell::new(false));
    let seen_error = Rc::new(Cell::new(None::<TransmitError>));
    {
        let handled = handled.clone();
        server.add_data_handler("message", move |_, _, _, _| handled.set(true));
    }
    {
        let seen_error = seen_error.clone();
        server.on_transmit_error(move |_, _, _, _, error| seen_error.set(Some(error)));
    }
    server.start(port);

    let mut client = ClientSession::new(fast_client_config());
    connect_until_ready(&mut server, &mut client, port);
    let client_id = client.client_id();

    // a finalized datagram whose payload is flipped in flight
    let mut pack = Packet::with_data_id(server.data_id_for_name("message"));
    pack.add_string("hello").unwrap();
    pack.finalize(true, true, client_id);
    let mut wire = pack.serialize().to_vec();
    wire[HEADER_LEN + 3] ^= 0x20;

    let rogue = UdpSocket::bind("127.0.0.1:0").expect("bind");
    rogue.send_to(&wire, server_addr(port)).expect("send");

    let done = {
        let seen_error = seen_error.clone();
        move || seen_error.get().is_some()
    };
    assert!(pump(&mut server, &mut client, done), "error never surfaced");

    assert_eq!(seen_error.get(), Some(TransmitError::InvalidChecksum));
    assert!(!handled.get(), "no handler may fire");

    server.stop();
}

#[test]
fn blacklisted_address_is_rejected() {
    let port = free_port();
    let mut server = ServerSession::new(ServerConfig::default());
    let rejected = Rc::new(Cell::new(false));
    {
        let rejected = rejected.clone();
        server.on_reject(move |_, _| rejected.set(true));
    }
    server.add_to_blacklist(IpAddr::V4(Ipv4Addr::LOCALHOST));
    server.start(port);

    let mut client = ClientSession::new(fast_client_config());
    client.connect(server_addr(port));

    let done = {
        let rejected = rejected.clone();
        move || rejected.get()
    };
    assert!(pump(&mut server, &mut client, done), "rejection never fired");
    assert_eq!(server.client_count(), 0);

    // the notice reaches the client as a disconnect
    for _ in 0..500 {
        server.update();
        client.update();
        if client.is_disconnected() {
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }
    assert!(client.is_disconnected());

    server.stop();
}

#[test]
fn validation_hook_can_reject() {
    let port = free_port();
    let mut server = ServerSession::new(ServerConfig::default());
    server.on_validate(|_, _| false);
    let rejected = Rc::new(Cell::new(false));
    {
        let rejected = rejected.clone();
        server.on_reject(move |_, _| rejected.set(true));
    }
    server.start(port);

    let mut client = ClientSession::new(fast_client_config());
    client.connect(server_addr(port));

    let done = {
        let rejected = rejected.clone();
        move || rejected.get()
    };
    assert!(pump(&mut server, &mut client, done), "rejection never fired");
    assert_eq!(server.client_count(), 0);

    server.stop();
}
