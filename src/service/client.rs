//! # Client Session Engine
//!
//! [`ClientSession`] owns one stream connection to a server and a lazily
//! bound UDP socket sharing the stream's local address, so both transports
//! present the same logical endpoint to the server.
//!
//! Like the server, the client is driven by [`ClientSession::update`]:
//! connection attempts, liveness probing, and both receive paths all run
//! inside the tick. When the session is lost the client walks its reconnect
//! path automatically, presenting its previous client ID so the server can
//! restore the entry it retained.
//!
//! Data names registered before [`ClientSession::connect`] start without
//! IDs; the data-list exchange assigns whatever the server is using and
//! appends passive entries for names only the server knows.

use crate::config::{ClientConfig, INGRESS_BUFFER_SIZE, MAX_TIMEOUT_MS, TIMEOUT_FACTOR};
use crate::core::codec::{self, ClientId, DataId, MAX_PAYLOAD};
use crate::core::packet::Packet;
use crate::error::TransmitError;
use crate::protocol::dispatcher::DataTable;
use crate::protocol::{data_id, TransportKind};
use crate::transport::sock;
use crate::utils::timer::Timer;
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Hook with no arguments beyond the session.
pub type ClientHook = dyn Fn(&mut ClientSession);
/// Catch-all receive hook and per-name data handler signature.
pub type ClientDataHook = dyn Fn(&mut ClientSession, &Packet<'_>, TransportKind);
/// Transmit error hook. The packet may be absent depending on the error.
pub type ClientErrorHook =
    dyn Fn(&mut ClientSession, Option<&Packet<'_>>, TransportKind, TransmitError);

/// Client lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Not connected to any server
    NeedsToConnect,
    /// Attempting the initial connection
    Connecting,
    /// Waiting for the server to assign a client ID
    ReceivingId,
    /// Ingesting the server's data list
    ReceivingDataList,
    /// Attempting to re-establish a lost session
    Reconnecting,
    /// Waiting for the server to honor the old client ID
    RequestingId,
    /// Ready to transmit custom data
    Connected,
}

#[derive(Default)]
struct ClientCallbacks {
    connect: Option<Rc<ClientHook>>,
    ready: Option<Rc<ClientHook>>,
    disconnect: Option<Rc<ClientHook>>,
    attempt_reconnect: Option<Rc<ClientHook>>,
    reconnect: Option<Rc<ClientHook>>,
    failed_reconnect: Option<Rc<ClientHook>>,
    handshake: Option<Rc<ClientHook>>,
    receive: Option<Rc<ClientDataHook>>,
    transmit_error: Option<Rc<ClientErrorHook>>,
}

enum ReadOutcome {
    Data,
    Empty,
    Closed,
}

/// The client side of the session protocol.
pub struct ClientSession {
    config: ClientConfig,
    state: ClientState,
    server_addr: Option<SocketAddr>,
    socket: Option<TcpStream>,
    udp_socket: Option<UdpSocket>,
    stream_is_bound: bool,
    client_id: ClientId,
    connection_attempts: u32,
    connection_timer: Timer,
    tcp_buf: Box<[u8]>,
    tcp_len: usize,
    udp_buf: Box<[u8]>,
    udp_len: usize,
    aliveness_timer: Timer,
    timeout_timer: Timer,
    timeout_delay: f64,
    ping: f64,
    callbacks: ClientCallbacks,
    data_table: DataTable<ClientDataHook>,
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl ClientSession {
    /// Create a disconnected client with the given configuration.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            state: ClientState::NeedsToConnect,
            server_addr: None,
            socket: None,
            udp_socket: None,
            stream_is_bound: false,
            client_id: 0,
            connection_attempts: 0,
            connection_timer: Timer::now(),
            tcp_buf: vec![0u8; INGRESS_BUFFER_SIZE].into_boxed_slice(),
            tcp_len: 0,
            udp_buf: vec![0u8; INGRESS_BUFFER_SIZE].into_boxed_slice(),
            udp_len: 0,
            aliveness_timer: Timer::now(),
            timeout_timer: Timer::now(),
            timeout_delay: MAX_TIMEOUT_MS,
            ping: 0.0,
            callbacks: ClientCallbacks::default(),
            data_table: DataTable::new(),
        }
    }

    /// Begin connecting to a server. Attempts continue inside the update
    /// loop until they succeed or the attempt budget runs out.
    pub fn connect(&mut self, addr: SocketAddr) {
        self.server_addr = Some(addr);
        self.connection_attempts = 0;
        self.tcp_len = 0;
        self.udp_len = 0;
        self.ping = 0.0;
        self.state = ClientState::Connecting;
        self.update();
    }

    /// Resolve a host string such as `"game.example.net:7777"` and connect
    /// to its first address.
    pub fn connect_to<A: ToSocketAddrs>(&mut self, host: A) -> io::Result<()> {
        let addr = host
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host resolved to no address"))?;
        self.connect(addr);
        Ok(())
    }

    /// Disconnect from the server for good.
    pub fn disconnect(&mut self) {
        self.disconnect_internal(false);
    }

    /// Tear down the session but walk the reconnect path, presenting the
    /// old client ID to the server.
    pub fn disconnect_and_reconnect(&mut self) {
        self.disconnect_internal(true);
    }

    fn disconnect_internal(&mut self, attempt_reconnect: bool) {
        if !self.is_running() {
            return;
        }
        let was_ready = self.is_ready();
        self.data_table.reset_ids();

        if self.socket.is_some() {
            let mut pack = Packet::with_data_id(data_id::DISCONNECT);
            let _ = self.send_to_server(&mut pack, true);
            self.socket = None;
        }
        self.udp_socket = None;
        self.stream_is_bound = false;

        if attempt_reconnect && self.config.should_attempt_reconnect && was_ready {
            self.connection_attempts = 0;
            self.tcp_len = 0;
            self.udp_len = 0;
            self.state = ClientState::Reconnecting;
            info!("session lost, attempting reconnect");
            self.fire(self.callbacks.attempt_reconnect.clone());
        } else {
            self.state = ClientState::NeedsToConnect;
            info!("disconnected");
            self.fire(self.callbacks.disconnect.clone());
        }
    }

    /// Drive the engine: connect or reconnect, probe liveness, and drain
    /// both transports. Call this on a loop.
    pub fn update(&mut self) {
        if matches!(
            self.state,
            ClientState::Connecting | ClientState::Reconnecting
        ) {
            self.attempt_connection();
            return;
        }
        if self.state == ClientState::NeedsToConnect {
            return;
        }

        // liveness: probe the server and watch our own window
        let delay_ms = duration_ms(self.config.aliveness_test_delay);
        if self.aliveness_timer.elapsed_ms() >= delay_ms {
            self.aliveness_timer.restart();
            let mut test = Packet::with_data_id(data_id::ALIVENESS_TEST);
            let _ = test.add::<f32>(((delay_ms + self.ping) * TIMEOUT_FACTOR) as f32);
            let send_failed = self.send_to_server(&mut test, true).is_err();
            if send_failed || self.timeout_timer.elapsed_ms() >= self.timeout_delay {
                self.disconnect_internal(true);
                return;
            }
        }

        self.service_tcp();
        if !self.is_running() {
            return;
        }
        if self.config.allow_udp_packets && self.state == ClientState::Connected {
            self.service_udp();
        }
    }

    fn attempt_connection(&mut self) {
        let delay_ms = duration_ms(self.config.connection_delay);
        if self.connection_attempts != 0 && self.connection_timer.elapsed_ms() < delay_ms {
            return;
        }
        let addr = match self.server_addr {
            Some(addr) => addr,
            None => {
                self.state = ClientState::NeedsToConnect;
                return;
            }
        };
        match sock::connect_stream(addr, self.config.connection_delay) {
            Ok(stream) => {
                self.socket = Some(stream);
                self.state = if self.state == ClientState::Reconnecting {
                    ClientState::RequestingId
                } else {
                    ClientState::ReceivingId
                };
                self.aliveness_timer.restart();
                self.timeout_timer.restart();
                self.timeout_delay = MAX_TIMEOUT_MS;
                self.ping = 0.0;
                info!(server = %addr, "stream connected");
            }
            Err(err) => {
                self.connection_attempts += 1;
                self.connection_timer.restart();
                let budget = if self.state == ClientState::Connecting {
                    self.config.max_connection_attempts
                } else {
                    self.config.max_reconnection_attempts
                };
                if self.connection_attempts >= budget || !sock::connect_is_retryable(&err) {
                    warn!(server = %addr, attempts = self.connection_attempts, error = %err,
                        "giving up on connection");
                    self.disconnect_internal(false);
                } else {
                    debug!(server = %addr, attempt = self.connection_attempts, error = %err,
                        "connection attempt failed");
                }
            }
        }
    }

    // ----------------------------------------------------------------- recv

    fn service_tcp(&mut self) {
        for _ in 0..self.config.max_tcp_transmits_per_update {
            if self.tcp_len >= self.tcp_buf.len() {
                return;
            }
            let outcome = {
                let socket = match &self.socket {
                    Some(socket) => socket,
                    None => return,
                };
                match sock::recv_stream(socket, &mut self.tcp_buf[self.tcp_len..]) {
                    Ok(Some(0)) => ReadOutcome::Closed,
                    Ok(Some(received)) => {
                        self.tcp_len += received;
                        ReadOutcome::Data
                    }
                    Ok(None) => ReadOutcome::Empty,
                    Err(err) if sock::is_reset(&err) => ReadOutcome::Closed,
                    Err(err) => {
                        debug!(error = %err, "stream receive failed");
                        ReadOutcome::Empty
                    }
                }
            };
            match outcome {
                ReadOutcome::Data => {
                    self.drain_tcp_buffer();
                    if !self.is_running() {
                        return;
                    }
                }
                ReadOutcome::Closed => {
                    self.disconnect_internal(true);
                    return;
                }
                ReadOutcome::Empty => return,
            }
        }
    }

    fn drain_tcp_buffer(&mut self) {
        let chunk = self.tcp_buf[..self.tcp_len].to_vec();
        let mut pos = 0;
        while self.is_running() && pos < chunk.len() {
            let used = self.on_frame(&chunk[pos..], TransportKind::Tcp);
            if used == 0 {
                break;
            }
            pos += used;
        }
        // the consumed prefix leaves; the partial tail returns to the front
        self.tcp_buf.copy_within(pos..self.tcp_len, 0);
        self.tcp_len -= pos;
    }

    fn service_udp(&mut self) {
        if !self.stream_is_bound {
            self.bind_stream_socket();
            return;
        }
        let server_addr = match self.server_addr {
            Some(addr) => addr,
            None => return,
        };
        for _ in 0..self.config.max_udp_transmits_per_update {
            if self.is_disconnected() || self.udp_len >= self.udp_buf.len() {
                return;
            }
            let received = {
                let socket = match &self.udp_socket {
                    Some(socket) => socket,
                    None => return,
                };
                sock::recv_dgram(socket, &mut self.udp_buf[self.udp_len..])
            };
            match received {
                Ok(Some((bytes, from))) if bytes > 0 && from == server_addr => {
                    self.udp_len += bytes;
                    self.drain_udp_buffer();
                    if !self.is_running() || !self.stream_is_bound {
                        return;
                    }
                }
                // datagrams from anyone but the server are dropped silently
                Ok(Some(_)) => {}
                Ok(None) => return,
                Err(err) if sock::is_reset(&err) => {
                    debug!("datagram socket reset, rebinding next update");
                    self.udp_socket = None;
                    self.stream_is_bound = false;
                    self.udp_len = 0;
                    return;
                }
                Err(err) => {
                    debug!(error = %err, "datagram receive failed");
                    return;
                }
            }
        }
    }

    /// Bind the UDP socket to the stream's local address so both transports
    /// share one endpoint.
    fn bind_stream_socket(&mut self) {
        if self.udp_socket.is_some() {
            self.stream_is_bound = true;
            return;
        }
        let local = match self.socket.as_ref().and_then(|s| s.local_addr().ok()) {
            Some(addr) => addr,
            None => return,
        };
        match sock::bind_udp(local) {
            Ok(socket) => {
                debug!(local = %local, "datagram socket bound");
                self.udp_socket = Some(socket);
                self.stream_is_bound = true;
            }
            Err(err) => {
                debug!(local = %local, error = %err, "datagram bind failed, retrying next update");
            }
        }
    }

    fn drain_udp_buffer(&mut self) {
        let chunk = self.udp_buf[..self.udp_len].to_vec();
        let mut pos = 0;
        while self.is_running() && self.stream_is_bound && pos < chunk.len() {
            let used = self.on_frame(&chunk[pos..], TransportKind::Udp);
            if used == 0 {
                break;
            }
            pos += used;
        }
        self.udp_buf.copy_within(pos..self.udp_len, 0);
        self.udp_len -= pos;
    }

    // ------------------------------------------------------------- protocol

    fn on_frame(&mut self, data: &[u8], method: TransportKind) -> usize {
        let header = match codec::peek_header(data) {
            Some(header) => header,
            None => return 0,
        };
        if header.payload_len as usize > MAX_PAYLOAD {
            // malformed framing poisons the rest of this receive
            self.emit_transmit_error(None, method, TransmitError::InvalidPayloadSize);
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

        match pack.data_id() {
            data_id::HANDSHAKE => self.handle_handshake(),
            data_id::INIT_CLIENT_ID | data_id::RECONNECT => self.handle_identity(&pack),
            data_id::DISCONNECT => self.disconnect_internal(false),
            data_id::INIT_CUSTOM_DATA_LIST => self.handle_data_list(&pack),
            data_id::ALIVENESS_TEST => {
                self.ping = (self.timeout_timer.elapsed_ms() - self.timeout_delay).max(0.0);
                self.timeout_timer.restart();
                self.timeout_delay = pack.remove::<f32>().unwrap_or(0.0) as f64;
            }
            _ => self.dispatch_custom(&pack, method),
        }

        frame_len
    }

    fn handle_handshake(&mut self) {
        if self.state == ClientState::ReceivingId || self.client_id == 0 {
            let mut pack = Packet::with_data_id(data_id::INIT_CLIENT_ID);
            let _ = self.send_to_server(&mut pack, true);
        } else {
            let mut pack = Packet::with_data_id(data_id::RECONNECT);
            let _ = pack.add::<ClientId>(self.client_id);
            let _ = self.send_to_server(&mut pack, true);
        }
        self.fire(self.callbacks.handshake.clone());
    }

    /// An `INIT_CLIENT_ID` or `RECONNECT` reply carrying our identity.
    fn handle_identity(&mut self, pack: &Packet<'_>) {
        let previous_state = self.state;

        self.timeout_timer.restart();
        self.timeout_delay = MAX_TIMEOUT_MS;
        self.ping = 0.0;

        let delay_ms = duration_ms(self.config.aliveness_test_delay);
        let mut test = Packet::with_data_id(data_id::ALIVENESS_TEST);
        let _ = test.add::<f32>(((delay_ms + self.ping) * TIMEOUT_FACTOR) as f32);
        let _ = self.send_to_server(&mut test, true);

        let new_id = pack.remove::<ClientId>().unwrap_or(0);
        if new_id != 0 {
            self.state = ClientState::ReceivingDataList;
            self.client_id = new_id;
            if pack.data_id() == data_id::RECONNECT {
                info!(client = new_id, "reconnected under previous identity");
                self.fire(self.callbacks.reconnect.clone());
            } else {
                if previous_state == ClientState::RequestingId {
                    info!(client = new_id, "previous identity unavailable, connected fresh");
                    self.fire(self.callbacks.failed_reconnect.clone());
                } else {
                    info!(client = new_id, "connected");
                }
                self.fire(self.callbacks.connect.clone());
            }
            let mut request = Packet::with_data_id(data_id::INIT_CUSTOM_DATA_LIST);
            let _ = self.send_to_server(&mut request, true);
        } else {
            // the server could not assign an ID; repeat the original request
            let mut retry = if previous_state == ClientState::ReceivingId {
                Packet::with_data_id(data_id::INIT_CLIENT_ID)
            } else {
                let mut pack = Packet::with_data_id(data_id::RECONNECT);
                let _ = pack.add::<ClientId>(self.client_id);
                pack
            };
            let _ = self.send_to_server(&mut retry, true);
        }
    }

    fn handle_data_list(&mut self, pack: &Packet<'_>) {
        let total = pack.remove::<u16>().unwrap_or(0);
        let index = pack.remove::<u16>().unwrap_or(0);
        let name = pack.remove_string().unwrap_or_default();
        let assigned = pack.remove::<DataId>().unwrap_or(data_id::UNKNOWN);

        if total > 0 {
            let position = self.data_table.register_type(&name);
            self.data_table.assign_id(position, assigned);
        }

        if self.is_ready() || index + 1 >= total {
            self.data_table.rebuild_index();
            if !self.is_ready() {
                let mut pack = Packet::with_data_id(data_id::HANDSHAKE);
                let _ = self.send_to_server(&mut pack, true);
                self.state = ClientState::Connected;
                info!(client = self.client_id, names = self.data_table.len(), "session ready");
                self.fire(self.callbacks.ready.clone());
            }
        }
    }

    fn dispatch_custom(&mut self, pack: &Packet<'_>, method: TransportKind) {
        let id = pack.data_id();
        let deliverable =
            id != data_id::UNKNOWN && (method == TransportKind::Tcp || pack.is_valid());
        if deliverable {
            if let Some(receive) = self.callbacks.receive.clone() {
                receive(self, pack, method);
                pack.reset();
            }
            if let Some(callbacks) = self.data_table.callbacks_for_id(id) {
                // later registrations run first
                for callback in callbacks.iter().rev() {
                    if self.is_disconnected() {
                        break;
                    }
                    callback(self, pack, method);
                    pack.reset();
                }
            }
        } else {
            let error = if id == data_id::UNKNOWN {
                TransmitError::InvalidDataId
            } else {
                TransmitError::InvalidChecksum
            };
            self.emit_transmit_error(Some(pack), method, error);
        }
    }

    fn emit_transmit_error(
        &mut self,
        pack: Option<&Packet<'_>>,
        method: TransportKind,
        error: TransmitError,
    ) {
        debug!(%method, %error, "transmit error");
        if let Some(hook) = self.callbacks.transmit_error.clone() {
            hook(self, pack, method, error);
        }
    }

    fn fire(&mut self, hook: Option<Rc<ClientHook>>) {
        if let Some(hook) = hook {
            hook(self);
        }
    }

    // ------------------------------------------------------------------ send

    /// Send a packet reliably to the server. Returns the number of bytes
    /// sent.
    pub fn send_to_server(
        &self,
        pack: &mut Packet<'_>,
        block_until_sent: bool,
    ) -> Result<usize, TransmitError> {
        if matches!(
            self.state,
            ClientState::NeedsToConnect | ClientState::Connecting | ClientState::Reconnecting
        ) {
            return Err(TransmitError::ClientNotConnected);
        }
        let socket = self
            .socket
            .as_ref()
            .ok_or(TransmitError::ClientNotConnected)?;
        sock::send_stream(socket, pack.serialize(), block_until_sent)
    }

    /// Send a packet unreliably to the server over the shared endpoint.
    /// Finalizes the packet with this client's sender ID if the caller has
    /// not already done so.
    pub fn stream_to_server(
        &self,
        pack: &mut Packet<'_>,
        block_until_sent: bool,
    ) -> Result<usize, TransmitError> {
        if matches!(
            self.state,
            ClientState::NeedsToConnect | ClientState::Connecting | ClientState::Reconnecting
        ) {
            return Err(TransmitError::ClientNotConnected);
        }
        if !self.stream_is_bound {
            return Err(TransmitError::StreamNotBound);
        }
        if !pack.is_finalized() {
            pack.finalize(false, true, self.client_id());
        }
        let socket = self
            .udp_socket
            .as_ref()
            .ok_or(TransmitError::StreamNotBound)?;
        let server = self.server_addr.ok_or(TransmitError::ClientNotConnected)?;
        sock::send_dgram(socket, pack.serialize(), server, block_until_sent)
    }

    // ---------------------------------------------------------- registration

    /// Register a handler for a data name. Handlers for an existing name
    /// append to its list; new names are rejected while a session is
    /// running.
    pub fn add_data_handler<F>(&mut self, name: &str, handler: F) -> bool
    where
        F: Fn(&mut ClientSession, &Packet<'_>, TransportKind) + 'static,
    {
        if self.data_table.position(name).is_none() && self.state != ClientState::NeedsToConnect {
            return false;
        }
        self.data_table.register_handler(name, Rc::new(handler));
        true
    }

    // ------------------------------------------------------------- accessors

    /// The negotiated client ID, or `0` until the session has one.
    pub fn client_id(&self) -> ClientId {
        match self.state {
            ClientState::Connected | ClientState::ReceivingDataList => self.client_id,
            _ => 0,
        }
    }

    /// The client's lifecycle state.
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// The most recent server address.
    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.server_addr
    }

    /// The local address of the stream socket, shared by the datagram
    /// socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Most recent measured round trip in milliseconds.
    pub fn ping(&self) -> f64 {
        self.ping
    }

    /// Whether a session is active or being established.
    pub fn is_running(&self) -> bool {
        self.state != ClientState::NeedsToConnect
    }

    /// Whether the stream connection is established.
    pub fn is_connected(&self) -> bool {
        self.is_running()
            && self.state != ClientState::Connecting
            && self.state != ClientState::Reconnecting
    }

    /// Whether no session is active.
    pub fn is_disconnected(&self) -> bool {
        self.state == ClientState::NeedsToConnect
    }

    /// Whether the session is ready to transmit custom data.
    pub fn is_ready(&self) -> bool {
        self.state == ClientState::Connected
    }

    /// Whether the shared datagram socket is bound.
    pub fn is_stream_bound(&self) -> bool {
        self.stream_is_bound
    }

    /// Resolve a data name to its negotiated ID, or [`data_id::UNKNOWN`]
    /// outside a ready session.
    pub fn data_id_for_name(&self, name: &str) -> DataId {
        if self.state == ClientState::Connected {
            self.data_table
                .id_for_name(name)
                .unwrap_or(data_id::UNKNOWN)
        } else {
            data_id::UNKNOWN
        }
    }

    /// Resolve a negotiated data ID back to its name.
    pub fn name_for_data_id(&self, id: DataId) -> Option<&str> {
        if self.state == ClientState::Connected {
            self.data_table.name_for_id(id)
        } else {
            None
        }
    }

    /// Create an empty packet carrying the ID negotiated for `name`.
    pub fn create_packet(&self, name: &str) -> Packet<'static> {
        Packet::with_data_id(self.data_id_for_name(name))
    }

    /// Current configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Replace the configuration. When the aliveness delay changes while
    /// running, the server is told the new timeout window right away.
    pub fn set_config(&mut self, config: ClientConfig) {
        if self.is_running() && self.config.aliveness_test_delay != config.aliveness_test_delay {
            let delay_ms = duration_ms(config.aliveness_test_delay);
            let mut test = Packet::with_data_id(data_id::ALIVENESS_TEST);
            let _ = test.add::<f32>(((delay_ms + self.ping) * TIMEOUT_FACTOR) as f32);
            let _ = self.send_to_server(&mut test, true);
        }
        self.config = config;
    }

    // -------------------------------------------------------------- handlers

    /// Called when the session has a valid client ID for the first time.
    pub fn on_connect<F: Fn(&mut ClientSession) + 'static>(&mut self, hook: F) {
        self.callbacks.connect = Some(Rc::new(hook));
    }

    /// Called when the data-list exchange completes and custom data can
    /// flow.
    pub fn on_ready<F: Fn(&mut ClientSession) + 'static>(&mut self, hook: F) {
        self.callbacks.ready = Some(Rc::new(hook));
    }

    /// Called when the session ends without a reconnect attempt.
    pub fn on_disconnect<F: Fn(&mut ClientSession) + 'static>(&mut self, hook: F) {
        self.callbacks.disconnect = Some(Rc::new(hook));
    }

    /// Called when a lost session triggers the reconnect path.
    pub fn on_attempt_reconnect<F: Fn(&mut ClientSession) + 'static>(&mut self, hook: F) {
        self.callbacks.attempt_reconnect = Some(Rc::new(hook));
    }

    /// Called when the server honored our previous identity.
    pub fn on_reconnect<F: Fn(&mut ClientSession) + 'static>(&mut self, hook: F) {
        self.callbacks.reconnect = Some(Rc::new(hook));
    }

    /// Called when the server could not honor our previous identity and
    /// assigned a fresh one.
    pub fn on_failed_reconnect<F: Fn(&mut ClientSession) + 'static>(&mut self, hook: F) {
        self.callbacks.failed_reconnect = Some(Rc::new(hook));
    }

    /// Called when the server opens the identification exchange.
    pub fn on_handshake<F: Fn(&mut ClientSession) + 'static>(&mut self, hook: F) {
        self.callbacks.handshake = Some(Rc::new(hook));
    }

    /// Catch-all hook for every valid custom packet, before per-name
    /// handlers.
    pub fn on_receive<F>(&mut self, hook: F)
    where
        F: Fn(&mut ClientSession, &Packet<'_>, TransportKind) + 'static,
    {
        self.callbacks.receive = Some(Rc::new(hook));
    }

    /// Hook for protocol-level receive failures. Depending on the error the
    /// packet may be absent.
    pub fn on_transmit_error<F>(&mut self, hook: F)
    where
        F: Fn(&mut ClientSession, Option<&Packet<'_>>, TransportKind, TransmitError) + 'static,
    {
        self.callbacks.transmit_error = Some(Rc::new(hook));
    }
}

fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
