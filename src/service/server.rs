//! # Server Session Engine
//!
//! [`ServerSession`] owns the listen socket, a UDP socket sharing the same
//! port, the map of connected clients, and the reconnect retention map. One
//! [`ServerSession::update`] call accepts pending connections, runs liveness
//! probing, drains both transports, and dispatches typed callbacks.
//!
//! The engine is single-threaded and cooperatively driven: all sockets are
//! non-blocking and the caller paces the tick loop. Handlers receive the
//! engine itself (`&mut ServerSession`) so they can reply, broadcast, or
//! disconnect from inside a callback.
//!
//! ## Client lifecycle
//!
//! An accepted socket becomes a [`ClientEntry`] in the `Init` state. The
//! identification exchange assigns a nonzero client ID and fires `connect`
//! and `initialize`; the data-list exchange follows; a final handshake fires
//! `ready`. Disconnected entries move to a retention map so a reconnecting
//! client can reclaim its ID and user data; retained entries expire after
//! the configured flush delay, firing `destroy` exactly once per entry that
//! was initialized.

use crate::config::{ServerConfig, INGRESS_BUFFER_SIZE, MAX_TIMEOUT_MS, TIMEOUT_FACTOR};
use crate::core::codec::{self, ClientId, DataId, PacketFlag, MAX_PAYLOAD};
use crate::core::packet::Packet;
use crate::error::TransmitError;
use crate::protocol::dispatcher::DataTable;
use crate::protocol::{data_id, TransportKind, SERVER_ID};
use crate::transport::sock;
use crate::utils::timer::Timer;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Hook with no subject entry.
pub type ServerHook = dyn Fn(&mut ServerSession);
/// Hook concerning one client entry.
pub type ServerEntryHook = dyn Fn(&mut ServerSession, &ClientEntryRef);
/// Accept-time validation hook; returning `false` rejects the client.
pub type ServerValidateHook = dyn Fn(&mut ServerSession, &ClientEntryRef) -> bool;
/// Catch-all receive hook for valid inbound packets.
pub type ServerReceiveHook = dyn Fn(&mut ServerSession, &Packet<'_>, &ClientEntryRef, TransportKind);
/// Per-name data handler.
pub type ServerDataHook = dyn Fn(&mut ServerSession, &Packet<'_>, &ClientEntryRef, TransportKind);
/// Transmit error hook. Packet and entry may be absent depending on the
/// error.
pub type ServerErrorHook = dyn Fn(
    &mut ServerSession,
    Option<&Packet<'_>>,
    Option<&ClientEntryRef>,
    TransportKind,
    TransmitError,
);

/// State of one client as seen by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEntryState {
    /// No client ID assigned yet
    Init,
    /// Exchanging the custom data list
    DataListExchange,
    /// Ready to transmit custom data
    Connected,
    /// Session over
    Disconnected,
}

/// One connected (or retained) client.
///
/// Entries are shared between the connected map, the retention map, and
/// in-flight dispatch, so they live behind `Rc<RefCell<..>>`; see
/// [`ClientEntryRef`].
pub struct ClientEntry {
    address: SocketAddr,
    socket: Option<TcpStream>,
    client_id: ClientId,
    state: ClientEntryState,
    tcp_buf: Box<[u8]>,
    tcp_len: usize,
    timeout_timer: Timer,
    timeout_delay: f64,
    ping: f64,
    user_data: Option<Box<dyn Any>>,
    initialized: bool,
    destroyed: bool,
}

/// Shared handle to a [`ClientEntry`].
pub type ClientEntryRef = Rc<RefCell<ClientEntry>>;

impl ClientEntry {
    fn new(address: SocketAddr, socket: TcpStream, client_id: ClientId) -> Self {
        Self {
            address,
            socket: Some(socket),
            client_id,
            state: ClientEntryState::Init,
            tcp_buf: vec![0u8; INGRESS_BUFFER_SIZE].into_boxed_slice(),
            tcp_len: 0,
            timeout_timer: Timer::now(),
            timeout_delay: MAX_TIMEOUT_MS,
            ping: 0.0,
            user_data: None,
            initialized: false,
            destroyed: false,
        }
    }

    /// The peer address of this client's stream connection.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// This client's unique ID. Nonzero; `0` is reserved for the server.
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// This client's connection state.
    pub fn state(&self) -> ClientEntryState {
        self.state
    }

    /// Whether this client finished the handshake and can exchange custom
    /// data.
    pub fn is_ready(&self) -> bool {
        self.state == ClientEntryState::Connected
    }

    /// Whether this client has not been disconnected.
    pub fn is_running(&self) -> bool {
        self.state != ClientEntryState::Disconnected
    }

    /// Most recent measured round trip in milliseconds.
    pub fn ping(&self) -> f64 {
        self.ping
    }

    /// Whether the liveness window has elapsed without a probe.
    pub fn has_timed_out(&self) -> bool {
        self.timeout_timer.elapsed_ms() >= self.timeout_delay
    }

    /// Restart the liveness window with a new expected delay. The gap
    /// between the previous elapsed time and the previous delay becomes the
    /// measured ping, floored at zero.
    pub fn reset_timeout(&mut self, expected_delay_ms: f64) {
        self.ping = (self.timeout_timer.elapsed_ms() - self.timeout_delay).max(0.0);
        self.timeout_timer.restart();
        self.timeout_delay = expected_delay_ms;
    }

    /// Attach caller-owned data to this entry. The engine never inspects
    /// it; it survives reconnection and is handed back through `destroy`.
    pub fn set_user_data<T: Any>(&mut self, value: T) {
        self.user_data = Some(Box::new(value));
    }

    /// Borrow the attached user data, if any of the given type.
    pub fn user_data<T: Any>(&self) -> Option<&T> {
        self.user_data.as_ref()?.downcast_ref()
    }

    /// Mutably borrow the attached user data.
    pub fn user_data_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.user_data.as_mut()?.downcast_mut()
    }

    /// Detach and return the attached user data.
    pub fn take_user_data(&mut self) -> Option<Box<dyn Any>> {
        self.user_data.take()
    }
}

/// Server lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Has yet to start
    NeedsStartup,
    /// Attempting to bind the listen socket
    Binding,
    /// Servicing connected clients
    Loop,
}

#[derive(Default)]
struct ServerCallbacks {
    bind: Option<Rc<ServerHook>>,
    connect: Option<Rc<ServerEntryHook>>,
    disconnect: Option<Rc<ServerEntryHook>>,
    reconnect: Option<Rc<ServerEntryHook>>,
    failed_reconnect: Option<Rc<ServerEntryHook>>,
    initialize: Option<Rc<ServerEntryHook>>,
    destroy: Option<Rc<ServerEntryHook>>,
    ready: Option<Rc<ServerEntryHook>>,
    reject: Option<Rc<ServerEntryHook>>,
    validate: Option<Rc<ServerValidateHook>>,
    receive: Option<Rc<ServerReceiveHook>>,
    transmit_error: Option<Rc<ServerErrorHook>>,
}

enum ReadOutcome {
    Data,
    Empty,
    Closed,
}

/// The server side of the session protocol.
pub struct ServerSession {
    config: ServerConfig,
    state: ServerState,
    port: u16,
    listener: Option<TcpListener>,
    stream_socket: Option<UdpSocket>,
    stream_is_bound: bool,
    next_client_id: ClientId,
    next_data_id: DataId,
    connected: HashMap<ClientId, ClientEntryRef>,
    disconnected: HashMap<ClientId, ClientEntryRef>,
    can_connect: HashMap<IpAddr, bool>,
    udp_buf: Box<[u8]>,
    udp_len: usize,
    aliveness_timer: Timer,
    callbacks: ServerCallbacks,
    data_table: DataTable<ServerDataHook>,
}

impl Default for ServerSession {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl ServerSession {
    /// Create a stopped server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            state: ServerState::NeedsStartup,
            port: 0,
            listener: None,
            stream_socket: None,
            stream_is_bound: false,
            next_client_id: 1,
            next_data_id: data_id::CUSTOM_DATA_START,
            connected: HashMap::new(),
            disconnected: HashMap::new(),
            can_connect: HashMap::new(),
            udp_buf: vec![0u8; INGRESS_BUFFER_SIZE].into_boxed_slice(),
            udp_len: 0,
            aliveness_timer: Timer::now(),
            callbacks: ServerCallbacks::default(),
            data_table: DataTable::new(),
        }
    }

    /// Begin listening on the given port. Binding happens inside the update
    /// loop; a failed bind is retried every tick until it succeeds.
    pub fn start(&mut self, port: u16) {
        self.port = port;
        self.data_table.rebuild_index();
        self.state = ServerState::Binding;
        self.update();
    }

    /// Stop the server, disconnecting every client and flushing all
    /// retained entries.
    pub fn stop(&mut self) {
        if self.state == ServerState::NeedsStartup {
            return;
        }
        let entries: Vec<ClientEntryRef> = self.connected.values().cloned().collect();
        for entry in &entries {
            self.disconnect_client(entry, false);
        }
        self.connected.clear();

        let retained: Vec<ClientEntryRef> = self.disconnected.values().cloned().collect();
        for entry in &retained {
            self.fire_destroy(entry);
        }
        self.disconnected.clear();

        self.listener = None;
        self.stream_socket = None;
        self.stream_is_bound = false;
        self.udp_len = 0;
        self.state = ServerState::NeedsStartup;
        info!("server stopped");
    }

    /// Drive the engine: bind, accept, probe liveness, and drain both
    /// transports. Call this on a loop.
    pub fn update(&mut self) {
        match self.state {
            ServerState::NeedsStartup => {}
            ServerState::Binding => self.try_bind(),
            ServerState::Loop => self.run_loop(),
        }
    }

    fn try_bind(&mut self) {
        match sock::bind_listener(self.port) {
            Ok(listener) => {
                self.listener = Some(listener);
                self.state = ServerState::Loop;
                self.aliveness_timer.restart();
                info!(port = self.port, "listen socket bound");
                if let Some(bind) = self.callbacks.bind.clone() {
                    bind(self);
                }
            }
            Err(err) => {
                debug!(port = self.port, error = %err, "bind failed, retrying next update");
            }
        }
    }

    fn run_loop(&mut self) {
        self.accept_new_clients();
        if !self.is_running() {
            return;
        }
        self.run_aliveness();
        self.service_tcp();
        if self.config.allow_udp_packets {
            self.service_udp();
        }
        // drop entries whose sessions ended during this tick
        self.connected.retain(|_, entry| entry.borrow().is_running());
    }

    // ---------------------------------------------------------------- accept

    fn accept_new_clients(&mut self) {
        for _ in 0..self.config.new_connection_backlog {
            let accepted = match &self.listener {
                Some(listener) => listener.accept(),
                None => return,
            };
            match accepted {
                Ok((stream, address)) => self.admit(stream, address),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    break;
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, address: SocketAddr) {
        if let Err(err) = stream.set_nonblocking(true) {
            warn!(peer = %address, error = %err, "could not configure accepted socket");
            return;
        }
        let entry: ClientEntryRef = Rc::new(RefCell::new(ClientEntry::new(
            address,
            stream,
            self.next_client_id,
        )));

        let (on_list, can_connect) = match self.can_connect.get(&address.ip()) {
            Some(&allowed) => (true, allowed),
            None => (false, false),
        };
        let pass_blacklist = !self.config.use_blacklist || !on_list || can_connect;
        let pass_whitelist = !self.config.use_whitelist || can_connect;

        let mut accepted = pass_blacklist && pass_whitelist;
        if accepted {
            if let Some(validate) = self.callbacks.validate.clone() {
                accepted = validate(self, &entry);
            }
        }

        if accepted {
            let id = self.next_client_id;
            self.next_client_id += 1;
            self.connected.insert(id, entry.clone());
            info!(client = id, peer = %address, "client accepted");
            let mut pack = Packet::with_data_id(data_id::HANDSHAKE);
            let _ = self.send_to_client(&mut pack, &entry, true);
        } else {
            debug!(peer = %address, "client rejected");
            self.fire_entry(self.callbacks.reject.clone(), &entry);
            self.disconnect_client(&entry, false);
        }
    }

    // ------------------------------------------------------------- aliveness

    fn run_aliveness(&mut self) {
        let delay_ms = duration_ms(self.config.aliveness_test_delay);
        if self.aliveness_timer.elapsed_ms() < delay_ms {
            return;
        }
        self.aliveness_timer.restart();

        let entries: Vec<ClientEntryRef> = self.connected.values().cloned().collect();
        let mut test = Packet::with_data_id(data_id::ALIVENESS_TEST);
        for entry in entries {
            test.clear();
            let (ping, timed_out) = {
                let e = entry.borrow();
                (e.ping, e.has_timed_out())
            };
            let _ = test.add::<f32>(((delay_ms + ping) * TIMEOUT_FACTOR) as f32);
            let failed = self.send_to_client(&mut test, &entry, true).is_err();
            if failed || timed_out {
                debug!(client = entry.borrow().client_id, "liveness lost");
                self.disconnect_client(&entry, true);
            }
        }

        // sweep the retention map while we are at it
        if self.config.should_flush_disconnected_client_data {
            let expired: Vec<ClientEntryRef> = self
                .disconnected
                .values()
                .filter(|entry| entry.borrow().has_timed_out())
                .cloned()
                .collect();
            for entry in expired {
                let id = entry.borrow().client_id;
                self.disconnected.remove(&id);
                debug!(client = id, "flushing retained client data");
                self.fire_destroy(&entry);
            }
        }
    }

    // ----------------------------------------------------------------- recv

    fn service_tcp(&mut self) {
        let entries: Vec<ClientEntryRef> = self.connected.values().cloned().collect();
        for entry in entries {
            if !self.is_running() {
                return;
            }
            if entry.borrow().is_running() {
                self.service_entry_tcp(&entry);
            }
        }
    }

    fn service_entry_tcp(&mut self, entry: &ClientEntryRef) {
        for _ in 0..self.config.max_tcp_transmits_per_update {
            let outcome = {
                let mut guard = entry.borrow_mut();
                let e = &mut *guard;
                match &e.socket {
                    None => ReadOutcome::Empty,
                    Some(_) if e.tcp_len >= e.tcp_buf.len() => ReadOutcome::Empty,
                    Some(socket) => match sock::recv_stream(socket, &mut e.tcp_buf[e.tcp_len..]) {
                        Ok(Some(0)) => ReadOutcome::Closed,
                        Ok(Some(received)) => {
                            e.tcp_len += received;
                            ReadOutcome::Data
                        }
                        Ok(None) => ReadOutcome::Empty,
                        Err(err) if sock::is_reset(&err) => ReadOutcome::Closed,
                        Err(err) => {
                            debug!(error = %err, "stream receive failed");
                            ReadOutcome::Empty
                        }
                    },
                }
            };
            match outcome {
                ReadOutcome::Data => {
                    self.drain_entry_buffer(entry);
                    if !self.is_running() || !entry.borrow().is_running() {
                        return;
                    }
                }
                ReadOutcome::Closed => {
                    self.disconnect_client(entry, true);
                    return;
                }
                ReadOutcome::Empty => return,
            }
        }
    }

    fn drain_entry_buffer(&mut self, entry: &ClientEntryRef) {
        let chunk = {
            let e = entry.borrow();
            e.tcp_buf[..e.tcp_len].to_vec()
        };
        let mut pos = 0;
        while self.is_running() && entry.borrow().is_running() && pos < chunk.len() {
            let used = self.on_frame(&chunk[pos..], Some(entry.clone()), TransportKind::Tcp);
            if used == 0 {
                break;
            }
            pos += used;
        }
        // the consumed prefix leaves; the partial tail returns to the front
        let mut e = entry.borrow_mut();
        let tcp_len = e.tcp_len;
        e.tcp_buf.copy_within(pos..tcp_len, 0);
        e.tcp_len -= pos;
    }

    fn service_udp(&mut self) {
        if !self.stream_is_bound {
            match sock::bind_udp(SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))) {
                Ok(socket) => {
                    self.stream_socket = Some(socket);
                    self.stream_is_bound = true;
                    debug!(port = self.port, "datagram socket bound");
                }
                Err(err) => {
                    debug!(error = %err, "datagram bind failed, retrying next update");
                }
            }
            return;
        }
        for _ in 0..self.config.max_udp_transmits_per_update {
            if self.udp_len >= self.udp_buf.len() {
                break;
            }
            let received = {
                let socket = match &self.stream_socket {
                    Some(socket) => socket,
                    None => break,
                };
                sock::recv_dgram(socket, &mut self.udp_buf[self.udp_len..])
            };
            match received {
                Ok(Some((bytes, _from))) if bytes > 0 => {
                    self.udp_len += bytes;
                    self.drain_udp_buffer();
                    if !self.is_running() || !self.stream_is_bound {
                        return;
                    }
                }
                Ok(_) => break,
                Err(err) if sock::is_reset(&err) => {
                    debug!("datagram socket reset, rebinding next update");
                    self.stream_socket = None;
                    self.stream_is_bound = false;
                    self.udp_len = 0;
                    return;
                }
                Err(err) => {
                    debug!(error = %err, "datagram receive failed");
                    break;
                }
            }
        }
    }

    fn drain_udp_buffer(&mut self) {
        let chunk = self.udp_buf[..self.udp_len].to_vec();
        let mut pos = 0;
        while self.is_running() && self.stream_is_bound && pos < chunk.len() {
            let used = self.on_frame(&chunk[pos..], None, TransportKind::Udp);
            if used == 0 {
                break;
            }
            pos += used;
        }
        self.udp_buf.copy_within(pos..self.udp_len, 0);
        self.udp_len -= pos;
    }

    // ------------------------------------------------------------- protocol

    /// Frame one packet out of `data` and run the protocol. Returns the
    /// number of buffer bytes consumed; zero means an incomplete frame.
    fn on_frame(
        &mut self,
        data: &[u8],
        entry: Option<ClientEntryRef>,
        method: TransportKind,
    ) -> usize {
        let header = match codec::peek_header(data) {
            Some(header) => header,
            None => return 0,
        };
        if header.payload_len as usize > MAX_PAYLOAD {
            // malformed framing poisons the rest of this receive
            self.emit_transmit_error(None, entry.as_ref(), method, TransmitError::InvalidPayloadSize);
            return data.len();
        }
        let frame_len = codec::frame_len(&header);
        if frame_len > data.len() {
            return 0;
        }
        let pack = match Packet::from_frame(&data[..frame_len]) {
            Some(pack) => pack,
            None => return 0,
        };

        let mut entry = entry;
        if method == TransportKind::Udp && pack.flag(PacketFlag::UdpSupport) {
            entry = self.client_entry(pack.sender_id());
        }

        match (&entry, pack.data_id()) {
            (Some(e), data_id::HANDSHAKE) => {
                let e = e.clone();
                self.handle_handshake(&e);
            }
            (Some(e), data_id::INIT_CLIENT_ID) => {
                let e = e.clone();
                self.handle_init_client_id(&e);
            }
            (Some(e), data_id::DISCONNECT) => {
                let e = e.clone();
                self.disconnect_client(&e, true);
            }
            (Some(e), data_id::RECONNECT) => {
                let e = e.clone();
                self.handle_reconnect(&pack, &e);
            }
            (Some(e), data_id::INIT_CUSTOM_DATA_LIST) => {
                let e = e.clone();
                self.handle_data_list_request(&e);
            }
            (Some(e), data_id::ALIVENESS_TEST) => {
                let e = e.clone();
                let delay = pack.remove::<f32>().unwrap_or(0.0) as f64;
                e.borrow_mut().reset_timeout(delay);
            }
            _ => self.dispatch_custom(&pack, entry.as_ref(), method),
        }

        frame_len
    }

    fn handle_handshake(&mut self, entry: &ClientEntryRef) {
        let promote = entry.borrow().state == ClientEntryState::DataListExchange;
        if promote {
            entry.borrow_mut().state = ClientEntryState::Connected;
            debug!(client = entry.borrow().client_id, "client ready");
            self.fire_entry(self.callbacks.ready.clone(), entry);
        }
    }

    fn handle_init_client_id(&mut self, entry: &ClientEntryRef) {
        entry.borrow_mut().reset_timeout(MAX_TIMEOUT_MS);
        let (ping, client_id) = {
            let e = entry.borrow();
            (e.ping, e.client_id)
        };

        let delay_ms = duration_ms(self.config.aliveness_test_delay);
        let mut test = Packet::with_data_id(data_id::ALIVENESS_TEST);
        let _ = test.add::<f32>(((delay_ms + ping) * TIMEOUT_FACTOR) as f32);
        let _ = self.send_to_client(&mut test, entry, true);

        let mut reply = Packet::with_data_id(data_id::INIT_CLIENT_ID);
        let _ = reply.add::<ClientId>(client_id);
        let _ = self.send_to_client(&mut reply, entry, true);

        {
            let mut e = entry.borrow_mut();
            if e.state == ClientEntryState::Init {
                e.state = ClientEntryState::DataListExchange;
            }
        }
        debug!(client = client_id, "client identified");
        self.fire_entry(self.callbacks.connect.clone(), entry);
        self.fire_initialize(entry);
    }

    fn handle_reconnect(&mut self, pack: &Packet<'_>, entry: &ClientEntryRef) {
        entry.borrow_mut().reset_timeout(MAX_TIMEOUT_MS);

        let delay_ms = duration_ms(self.config.aliveness_test_delay);
        let mut test = Packet::with_data_id(data_id::ALIVENESS_TEST);
        let _ = test.add::<f32>((delay_ms * TIMEOUT_FACTOR) as f32);
        let _ = self.send_to_client(&mut test, entry, true);

        let old_id = pack.remove::<ClientId>().unwrap_or(0);
        let occupied = old_id == 0 || self.connected.contains_key(&old_id);
        if occupied {
            // the old identity is gone; restart this client as a fresh one
            let client_id = entry.borrow().client_id;
            let mut reply = Packet::with_data_id(data_id::INIT_CLIENT_ID);
            let _ = reply.add::<ClientId>(client_id);
            let _ = self.send_to_client(&mut reply, entry, true);
            {
                let mut e = entry.borrow_mut();
                if e.state == ClientEntryState::Init {
                    e.state = ClientEntryState::DataListExchange;
                }
            }
            info!(client = client_id, requested = old_id, "reconnect failed");
            self.fire_entry(self.callbacks.failed_reconnect.clone(), entry);
            self.fire_entry(self.callbacks.connect.clone(), entry);
            self.fire_initialize(entry);
        } else {
            // rebind the entry under its previous identity
            let assigned_id = entry.borrow().client_id;
            self.connected.remove(&assigned_id);
            entry.borrow_mut().client_id = old_id;
            self.connected.insert(old_id, entry.clone());

            if let Some(retained) = self.disconnected.remove(&old_id) {
                let mut old = retained.borrow_mut();
                let mut e = entry.borrow_mut();
                e.user_data = old.user_data.take();
                e.initialized = old.initialized;
                // the retained entry hands over its lifecycle; nothing left
                // for the destroy sweep
                old.destroyed = true;
            } else {
                self.fire_initialize(entry);
            }

            let mut reply = Packet::with_data_id(data_id::RECONNECT);
            let _ = reply.add::<ClientId>(old_id);
            let _ = self.send_to_client(&mut reply, entry, true);
            {
                let mut e = entry.borrow_mut();
                if e.state == ClientEntryState::Init {
                    e.state = ClientEntryState::DataListExchange;
                }
            }
            info!(client = old_id, "client reconnected");
            self.fire_entry(self.callbacks.reconnect.clone(), entry);
        }
    }

    fn handle_data_list_request(&mut self, entry: &ClientEntryRef) {
        let total = self.data_table.len() as u16;
        let mut pack = Packet::with_data_id(data_id::INIT_CUSTOM_DATA_LIST);
        if total == 0 {
            // empty vocabulary still completes the exchange
            let _ = pack.add::<u16>(0);
            let _ = pack.add::<u16>(0);
            let _ = pack.add_string("");
            let _ = pack.add::<DataId>(data_id::UNKNOWN);
            let _ = self.send_to_client(&mut pack, entry, true);
            return;
        }
        for index in 0..self.data_table.len() {
            let (name, id) = {
                let def = &self.data_table.entries()[index];
                (def.name().to_string(), def.data_id())
            };
            pack.clear();
            let _ = pack.add::<u16>(total);
            let _ = pack.add::<u16>(index as u16);
            let _ = pack.add_string(&name);
            let _ = pack.add::<DataId>(id);
            let _ = self.send_to_client(&mut pack, entry, true);
        }
    }

    fn dispatch_custom(
        &mut self,
        pack: &Packet<'_>,
        entry: Option<&ClientEntryRef>,
        method: TransportKind,
    ) {
        let id = pack.data_id();
        let deliverable = entry.is_some()
            && id != data_id::UNKNOWN
            && (method == TransportKind::Tcp || pack.is_valid());
        if deliverable {
            let entry = match entry {
                Some(entry) => entry.clone(),
                None => return,
            };
            if let Some(receive) = self.callbacks.receive.clone() {
                receive(self, pack, &entry, method);
                pack.reset();
            }
            if let Some(callbacks) = self.data_table.callbacks_for_id(id) {
                // later registrations run first
                for callback in callbacks.iter().rev() {
                    if !self.is_running() || !entry.borrow().is_running() {
                        break;
                    }
                    callback(self, pack, &entry, method);
                    pack.reset();
                }
            }
        } else {
            let error = if entry.is_none() {
                TransmitError::ClientNotFound
            } else if id == data_id::UNKNOWN {
                TransmitError::InvalidDataId
            } else {
                TransmitError::InvalidChecksum
            };
            self.emit_transmit_error(Some(pack), entry, method, error);
        }
    }

    fn emit_transmit_error(
        &mut self,
        pack: Option<&Packet<'_>>,
        entry: Option<&ClientEntryRef>,
        method: TransportKind,
        error: TransmitError,
    ) {
        debug!(%method, %error, "transmit error");
        if let Some(hook) = self.callbacks.transmit_error.clone() {
            hook(self, pack, entry, method, error);
        }
    }

    fn fire_entry(&mut self, hook: Option<Rc<ServerEntryHook>>, entry: &ClientEntryRef) {
        if let Some(hook) = hook {
            hook(self, entry);
        }
    }

    fn fire_initialize(&mut self, entry: &ClientEntryRef) {
        entry.borrow_mut().initialized = true;
        self.fire_entry(self.callbacks.initialize.clone(), entry);
    }

    fn fire_destroy(&mut self, entry: &ClientEntryRef) {
        let due = {
            let e = entry.borrow();
            e.initialized && !e.destroyed
        };
        if due {
            entry.borrow_mut().destroyed = true;
            self.fire_entry(self.callbacks.destroy.clone(), entry);
        }
    }

    // ------------------------------------------------------------ disconnect

    /// Disconnect a client. With `retain`, the entry moves to the retention
    /// map so a reconnecting client can reclaim its identity and user data;
    /// without it, the entry's lifecycle ends here and `destroy` fires for
    /// initialized entries.
    pub fn disconnect_client(&mut self, entry: &ClientEntryRef, retain: bool) {
        if entry.borrow().state == ClientEntryState::Disconnected {
            return;
        }
        if retain {
            let id = entry.borrow().client_id;
            self.disconnected.insert(id, entry.clone());
            if self.config.should_flush_disconnected_client_data {
                let flush_ms = duration_ms(self.config.disconnected_client_flush_delay);
                entry.borrow_mut().reset_timeout(flush_ms);
            }
        }

        let mut pack = Packet::with_data_id(data_id::DISCONNECT);
        let _ = self.send_to_client(&mut pack, entry, true);
        entry.borrow_mut().state = ClientEntryState::Disconnected;
        info!(client = entry.borrow().client_id, "client disconnected");
        self.fire_entry(self.callbacks.disconnect.clone(), entry);
        if !retain {
            self.fire_destroy(entry);
        }
        entry.borrow_mut().socket = None;
    }

    /// Disconnect every connected client with the given IP address. Returns
    /// how many clients were disconnected.
    pub fn disconnect_address(&mut self, ip: IpAddr) -> usize {
        let matching: Vec<ClientEntryRef> = self
            .connected
            .values()
            .filter(|entry| entry.borrow().address.ip() == ip)
            .cloned()
            .collect();
        for entry in &matching {
            self.disconnect_client(entry, true);
        }
        matching.len()
    }

    // ------------------------------------------------------------------ send

    /// Send a packet reliably to one client. Returns the number of bytes
    /// sent.
    pub fn send_to_client(
        &self,
        pack: &mut Packet<'_>,
        entry: &ClientEntryRef,
        block_until_sent: bool,
    ) -> Result<usize, TransmitError> {
        let e = entry.borrow();
        if e.state == ClientEntryState::Disconnected {
            return Err(TransmitError::ClientNotConnected);
        }
        let socket = e.socket.as_ref().ok_or(TransmitError::ClientNotConnected)?;
        sock::send_stream(socket, pack.serialize(), block_until_sent)
    }

    /// Send a packet reliably to every connected client.
    pub fn send_to_all(&self, pack: &mut Packet<'_>, block_until_sent: bool) {
        for entry in self.connected.values() {
            let _ = self.send_to_client(pack, entry, block_until_sent);
        }
    }

    /// Send a packet unreliably to one client over the shared datagram
    /// socket. Finalizes the packet with the server's sender ID if the
    /// caller has not already done so.
    pub fn stream_to_client(
        &self,
        pack: &mut Packet<'_>,
        entry: &ClientEntryRef,
        block_until_sent: bool,
    ) -> Result<usize, TransmitError> {
        if entry.borrow().state == ClientEntryState::Disconnected {
            return Err(TransmitError::ClientNotConnected);
        }
        if !self.stream_is_bound {
            return Err(TransmitError::StreamNotBound);
        }
        if !pack.is_finalized() {
            pack.finalize(false, true, SERVER_ID);
        }
        let socket = self
            .stream_socket
            .as_ref()
            .ok_or(TransmitError::StreamNotBound)?;
        let address = entry.borrow().address;
        sock::send_dgram(socket, pack.serialize(), address, block_until_sent)
    }

    /// Send a packet unreliably to every connected client.
    pub fn stream_to_all(&self, pack: &mut Packet<'_>, block_until_sent: bool) {
        if !self.stream_is_bound {
            return;
        }
        for entry in self.connected.values() {
            let _ = self.stream_to_client(pack, entry, block_until_sent);
        }
    }

    // ---------------------------------------------------------- registration

    /// Register a data name without a handler, useful for send-only data.
    /// New names are rejected once the server has started.
    pub fn add_data_type(&mut self, name: &str) -> bool {
        if self.data_table.position(name).is_some() {
            return true;
        }
        if self.state != ServerState::NeedsStartup {
            return false;
        }
        let index = self.data_table.register_type(name);
        self.data_table.assign_id(index, self.next_data_id);
        self.next_data_id += 1;
        true
    }

    /// Register a handler for a data name. Handlers for an existing name
    /// append to its list; new names are rejected once the server has
    /// started.
    pub fn add_data_handler<F>(&mut self, name: &str, handler: F) -> bool
    where
        F: Fn(&mut ServerSession, &Packet<'_>, &ClientEntryRef, TransportKind) + 'static,
    {
        if self.data_table.position(name).is_none() && self.state != ServerState::NeedsStartup {
            return false;
        }
        let fresh = self.data_table.position(name).is_none();
        let index = self.data_table.register_handler(name, Rc::new(handler));
        if fresh {
            self.data_table.assign_id(index, self.next_data_id);
            self.next_data_id += 1;
        }
        true
    }

    // ------------------------------------------------------------ allow/deny

    /// Deny future connections from an address and disconnect any current
    /// ones.
    pub fn add_to_blacklist(&mut self, ip: IpAddr) {
        self.can_connect.insert(ip, false);
        self.disconnect_address(ip);
    }

    /// Lift a blacklist entry.
    pub fn remove_from_blacklist(&mut self, ip: IpAddr) {
        if self.can_connect.get(&ip) == Some(&false) {
            self.can_connect.remove(&ip);
        }
    }

    /// Allow connections from an address when the whitelist is enabled.
    pub fn add_to_whitelist(&mut self, ip: IpAddr) {
        self.can_connect.insert(ip, true);
    }

    /// Drop a whitelist entry.
    pub fn remove_from_whitelist(&mut self, ip: IpAddr) {
        if self.can_connect.get(&ip) == Some(&true) {
            self.can_connect.remove(&ip);
        }
    }

    // ------------------------------------------------------------- accessors

    /// Look up a connected client by ID.
    pub fn client_entry(&self, id: ClientId) -> Option<ClientEntryRef> {
        self.connected.get(&id).cloned()
    }

    /// Iterate over the connected clients.
    pub fn clients(&self) -> impl Iterator<Item = &ClientEntryRef> {
        self.connected.values()
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.connected.len()
    }

    /// The port passed to [`ServerSession::start`].
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The local address of the listen socket, once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// The server's own sender ID, always zero.
    pub fn server_id(&self) -> ClientId {
        SERVER_ID
    }

    /// Whether the server has been started.
    pub fn is_running(&self) -> bool {
        self.state != ServerState::NeedsStartup
    }

    /// Whether the server is bound and servicing clients.
    pub fn is_ready(&self) -> bool {
        self.state == ServerState::Loop
    }

    /// Whether the shared datagram socket is bound.
    pub fn is_stream_bound(&self) -> bool {
        self.stream_is_bound
    }

    /// The server's lifecycle state.
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Resolve a data name to its assigned ID, or
    /// [`data_id::UNKNOWN`] if unregistered.
    pub fn data_id_for_name(&self, name: &str) -> DataId {
        let resolved = if self.is_running() {
            self.data_table.id_for_name(name)
        } else {
            self.data_table.id_for_name_unindexed(name)
        };
        resolved.unwrap_or(data_id::UNKNOWN)
    }

    /// Resolve an assigned data ID back to its name.
    pub fn name_for_data_id(&self, id: DataId) -> Option<&str> {
        self.data_table.name_for_id(id)
    }

    /// Create an empty packet carrying the ID registered for `name`.
    pub fn create_packet(&self, name: &str) -> Packet<'static> {
        Packet::with_data_id(self.data_id_for_name(name))
    }

    /// Current configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Replace the configuration. When the aliveness delay changes while
    /// running, clients are told the new timeout window right away.
    pub fn set_config(&mut self, config: ServerConfig) {
        if self.is_running() && self.config.aliveness_test_delay != config.aliveness_test_delay {
            let delay_ms = duration_ms(config.aliveness_test_delay);
            let mut test = Packet::with_data_id(data_id::ALIVENESS_TEST);
            let _ = test.add::<f32>((delay_ms * TIMEOUT_FACTOR) as f32);
            self.send_to_all(&mut test, true);
        }
        self.config = config;
    }

    // -------------------------------------------------------------- handlers

    /// Called once the listen socket is bound.
    pub fn on_bind<F: Fn(&mut ServerSession) + 'static>(&mut self, hook: F) {
        self.callbacks.bind = Some(Rc::new(hook));
    }

    /// Called when a client has been assigned its ID.
    pub fn on_connect<F: Fn(&mut ServerSession, &ClientEntryRef) + 'static>(&mut self, hook: F) {
        self.callbacks.connect = Some(Rc::new(hook));
    }

    /// Called when a client disconnects.
    pub fn on_disconnect<F: Fn(&mut ServerSession, &ClientEntryRef) + 'static>(&mut self, hook: F) {
        self.callbacks.disconnect = Some(Rc::new(hook));
    }

    /// Called when a client reclaims its previous identity.
    pub fn on_reconnect<F: Fn(&mut ServerSession, &ClientEntryRef) + 'static>(&mut self, hook: F) {
        self.callbacks.reconnect = Some(Rc::new(hook));
    }

    /// Called when a reconnect request could not be honored and the client
    /// was restarted as a fresh connection.
    pub fn on_failed_reconnect<F: Fn(&mut ServerSession, &ClientEntryRef) + 'static>(
        &mut self,
        hook: F,
    ) {
        self.callbacks.failed_reconnect = Some(Rc::new(hook));
    }

    /// Called to set up caller-owned data on a new entry. Fires exactly once
    /// per entry lifecycle; a successful reconnect transfers the data
    /// without firing it again.
    pub fn on_initialize<F: Fn(&mut ServerSession, &ClientEntryRef) + 'static>(&mut self, hook: F) {
        self.callbacks.initialize = Some(Rc::new(hook));
    }

    /// Called to tear down caller-owned data. Fires exactly once per entry
    /// that was initialized.
    pub fn on_destroy<F: Fn(&mut ServerSession, &ClientEntryRef) + 'static>(&mut self, hook: F) {
        self.callbacks.destroy = Some(Rc::new(hook));
    }

    /// Called when a client finishes the data-list exchange and can
    /// transmit custom data.
    pub fn on_ready<F: Fn(&mut ServerSession, &ClientEntryRef) + 'static>(&mut self, hook: F) {
        self.callbacks.ready = Some(Rc::new(hook));
    }

    /// Called when a connection is rejected by the allow/deny list or the
    /// validation hook.
    pub fn on_reject<F: Fn(&mut ServerSession, &ClientEntryRef) + 'static>(&mut self, hook: F) {
        self.callbacks.reject = Some(Rc::new(hook));
    }

    /// Accept-time validation; return `false` to reject the connection.
    pub fn on_validate<F: Fn(&mut ServerSession, &ClientEntryRef) -> bool + 'static>(
        &mut self,
        hook: F,
    ) {
        self.callbacks.validate = Some(Rc::new(hook));
    }

    /// Catch-all hook for every valid custom packet, before per-name
    /// handlers.
    pub fn on_receive<F>(&mut self, hook: F)
    where
        F: Fn(&mut ServerSession, &Packet<'_>, &ClientEntryRef, TransportKind) + 'static,
    {
        self.callbacks.receive = Some(Rc::new(hook));
    }

    /// Hook for protocol-level receive failures. Depending on the error the
    /// packet or the entry may be absent.
    pub fn on_transmit_error<F>(&mut self, hook: F)
    where
        F: Fn(&mut ServerSession, Option<&Packet<'_>>, Option<&ClientEntryRef>, TransportKind, TransmitError)
            + 'static,
    {
        self.callbacks.transmit_error = Some(Rc::new(hook));
    }
}

fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
