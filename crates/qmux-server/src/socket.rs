use crate::config::{
    ConfigError, SocketConfig, SocketSecrets, DISABLE_STATELESS_RESET, VALIDATE_ADDRESS,
    VALIDATE_ADDRESS_LRU,
};
use crate::endpoint::{Endpoint, EndpointId, SendId};
use crate::listener::{ListenerChain, ListenerId, SocketListener};
use crate::session::{SecureContext, ServerSessionFactory, Session, SessionParams, SERVER_BUSY};
use crate::stats::{monotonic_nanos, SocketStats};
use crate::tables::{CidTable, PeerCounters, ResetTokenTable};
use crate::validated::ValidatedAddressCache;
use qmux_core::token::{
    build_retry_token, derive_reset_token, verify_retry_token, RESET_TOKEN_LEN,
};
use qmux_core::version::{reserved_version, PROTOCOL_VERSION};
use qmux_core::{classify_initial, wire, Cid, InitialClassification, PacketBuffer, MAX_CID_LEN};
use rand::Rng;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketState {
    Init,
    Listening,
    Stopped,
    Destroyed,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ListenError {
    #[error("socket is already listening")]
    AlreadyListening,
    #[error("socket has been destroyed")]
    Destroyed,
}

struct ServerContext {
    secure_ctx: Arc<dyn SecureContext>,
    alpn: String,
    options: u32,
    preferred_address: Option<SocketAddr>,
}

/// How `accept_initial` disposed of a packet that matched no session.
enum AcceptOutcome {
    /// A new server session was created; deliver the packet to it.
    Session(Arc<dyn Session>),
    /// The socket answered statelessly (version negotiation or retry);
    /// the packet is consumed and counts as neither received nor ignored.
    Responded,
    /// Nothing could be done with the packet.
    NoSession,
}

/// Outbound buffer (and the session keeping it alive, if any) parked until
/// the UDP layer reports completion. Nothing else touches the bytes in the
/// meantime.
struct SendRecord {
    endpoint: usize,
    remote: SocketAddr,
    packet: PacketBuffer,
    _session: Option<Arc<dyn Session>>,
}

/// Server-side QUIC socket demultiplexer.
///
/// One logical endpoint over any number of bound UDP sockets: classifies
/// each inbound datagram as belonging to a known session, as a stateless
/// reset from a peer, or as the first packet of a new connection, and
/// answers the last case with version negotiation, retry, a new server
/// session, or a stateless reset of its own.
///
/// All methods are synchronous and non-blocking; callers on a
/// multi-threaded runtime must serialize access onto a single task (see
/// [`crate::driver::UdpDriver`]).
pub struct QuicSocket {
    config: SocketConfig,
    secrets: SocketSecrets,
    factory: Arc<dyn ServerSessionFactory>,
    state: SocketState,
    busy: bool,
    stateless_reset_disabled: bool,
    server: Option<ServerContext>,
    sessions: CidTable,
    reset_tokens: ResetTokenTable,
    addr_counts: PeerCounters,
    reset_counts: PeerCounters,
    validated_addrs: ValidatedAddressCache,
    endpoints: Vec<Endpoint>,
    preferred_endpoint: Option<usize>,
    listeners: ListenerChain,
    stats: SocketStats,
    rx_loss: f64,
    tx_loss: f64,
    in_flight: HashMap<SendId, SendRecord>,
    next_send_id: SendId,
}

impl QuicSocket {
    pub fn new(
        config: SocketConfig,
        factory: Arc<dyn ServerSessionFactory>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let secrets = SocketSecrets::from_config(&config);
        let stateless_reset_disabled = config.option_set(DISABLE_STATELESS_RESET);
        let stats = SocketStats {
            created_at: monotonic_nanos(),
            ..SocketStats::default()
        };
        debug!(target: "qmux::socket", "new quic socket created");
        Ok(Self {
            config,
            secrets,
            factory,
            state: SocketState::Init,
            busy: false,
            stateless_reset_disabled,
            server: None,
            sessions: CidTable::default(),
            reset_tokens: ResetTokenTable::default(),
            addr_counts: PeerCounters::default(),
            reset_counts: PeerCounters::default(),
            validated_addrs: ValidatedAddressCache::new(),
            endpoints: Vec::new(),
            preferred_endpoint: None,
            listeners: ListenerChain::default(),
            stats,
            rx_loss: 0.0,
            tx_loss: 0.0,
            in_flight: HashMap::new(),
            next_send_id: 0,
        })
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Attach a bound endpoint. The first endpoint (or any added with
    /// `preferred`) becomes the one all outbound datagrams use.
    pub fn add_endpoint(&mut self, mut endpoint: Endpoint, preferred: bool) -> EndpointId {
        if self.state == SocketState::Listening {
            endpoint.set_receiving(true);
        }
        let id = EndpointId(self.endpoints.len());
        if preferred || self.preferred_endpoint.is_none() {
            self.preferred_endpoint = Some(id.0);
        }
        if self.stats.bound_at == 0 {
            self.stats.bound_at = monotonic_nanos();
        }
        debug!(
            target: "qmux::socket",
            local = %endpoint.local_addr(),
            preferred,
            "endpoint bound"
        );
        self.endpoints.push(endpoint);
        id
    }

    /// Start accepting server sessions.
    pub fn listen(
        &mut self,
        secure_ctx: Arc<dyn SecureContext>,
        preferred_address: Option<SocketAddr>,
        alpn: impl Into<String>,
        options: u32,
    ) -> Result<(), ListenError> {
        match self.state {
            SocketState::Init => {}
            SocketState::Destroyed => return Err(ListenError::Destroyed),
            _ => return Err(ListenError::AlreadyListening),
        }
        self.server = Some(ServerContext {
            secure_ctx,
            alpn: alpn.into(),
            options,
            preferred_address,
        });
        self.state = SocketState::Listening;
        self.stats.listen_at = monotonic_nanos();
        for endpoint in &mut self.endpoints {
            endpoint.set_receiving(true);
        }
        debug!(target: "qmux::socket", "starting to listen");
        Ok(())
    }

    /// Stop admitting new sessions while continuing to serve existing
    /// ones. Idempotent.
    pub fn stop_listening(&mut self) {
        if self.state == SocketState::Listening {
            self.state = SocketState::Stopped;
            debug!(target: "qmux::socket", "no longer accepting new connections");
        }
    }

    /// While busy, new connections are still created but immediately
    /// refused with `SERVER_BUSY`.
    pub fn set_server_busy(&mut self, busy: bool) {
        if self.state == SocketState::Destroyed {
            return;
        }
        self.busy = busy;
        debug!(target: "qmux::socket", busy, "server busy state changed");
        self.listeners.emit_server_busy(busy);
    }

    pub fn is_server_busy(&self) -> bool {
        self.busy
    }

    /// Flip stateless-reset emission and detection. Returns the new
    /// enabled state.
    pub fn toggle_stateless_reset(&mut self) -> bool {
        self.stateless_reset_disabled = !self.stateless_reset_disabled;
        !self.stateless_reset_disabled
    }

    /// Configure random drop probabilities for inbound (`rx`) and outbound
    /// (`tx`) datagrams. Diagnostic aid, not a production control.
    pub fn set_diagnostic_packet_loss(&mut self, rx: f64, tx: f64) -> Result<(), ConfigError> {
        for probability in [rx, tx] {
            if !(0.0..=1.0).contains(&probability) {
                return Err(ConfigError::LossProbability(probability));
            }
        }
        self.rx_loss = rx;
        self.tx_loss = tx;
        Ok(())
    }

    /// Terminal operation: stops receive on every endpoint, reports the
    /// final statistics, and tears down the listener chain. Send
    /// completions that arrive afterwards still release their buffers.
    pub fn destroy(&mut self) {
        if self.state == SocketState::Destroyed {
            return;
        }
        self.state = SocketState::Destroyed;
        for endpoint in &mut self.endpoints {
            endpoint.set_receiving(false);
        }
        let now = monotonic_nanos();
        let stats = &self.stats;
        debug!(
            target: "qmux::socket",
            duration = now.saturating_sub(stats.created_at),
            bound_duration = if stats.bound_at > 0 { now - stats.bound_at } else { 0 },
            listen_duration = if stats.listen_at > 0 { now - stats.listen_at } else { 0 },
            bytes_received = stats.bytes_received,
            bytes_sent = stats.bytes_sent,
            packets_received = stats.packets_received,
            packets_sent = stats.packets_sent,
            packets_ignored = stats.packets_ignored,
            server_sessions = stats.server_sessions,
            client_sessions = stats.client_sessions,
            stateless_resets = stats.stateless_reset_count,
            "socket destroyed"
        );
        self.listeners.emit_destroy();
        self.listeners.clear();
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    pub fn push_listener(&mut self, listener: Box<dyn SocketListener>) -> ListenerId {
        self.listeners.push(listener)
    }

    /// Detach a listener. Panics if the listener is not attached; see
    /// [`crate::listener::ListenerChain`].
    pub fn remove_listener(&mut self, id: ListenerId) -> Box<dyn SocketListener> {
        self.listeners.remove(id)
    }

    // ------------------------------------------------------------------
    // Session table maintenance
    // ------------------------------------------------------------------

    /// Register a session under its primary connection id. The matching
    /// stateless-reset token is derived and registered alongside, and the
    /// peer's connection count advances.
    pub fn add_session(&mut self, cid: Cid, session: Arc<dyn Session>, remote: SocketAddr) {
        let token = derive_reset_token(&self.secrets.reset_token_secret, &cid);
        self.sessions.insert(cid, Arc::clone(&session));
        self.reset_tokens.insert(token, session);
        self.addr_counts.increment(remote.ip());
        self.stats.server_sessions += 1;
    }

    /// Route an additional connection id to an already-registered session.
    pub fn associate_cid(&mut self, alias: Cid, primary: Cid) -> bool {
        self.sessions.associate(alias, primary)
    }

    pub fn disassociate_cid(&mut self, alias: &Cid) {
        self.sessions.disassociate(alias);
    }

    /// Register an additional stateless-reset token for a session that
    /// issued a new connection id.
    pub fn associate_reset_token(
        &mut self,
        token: [u8; RESET_TOKEN_LEN],
        session: Arc<dyn Session>,
    ) {
        self.reset_tokens.insert(token, session);
    }

    pub fn disassociate_reset_token(&mut self, token: &[u8; RESET_TOKEN_LEN]) {
        self.reset_tokens.remove(token);
    }

    /// Remove a session and every table entry that references it: aliases,
    /// reset tokens, and the peer's connection count.
    pub fn remove_session(&mut self, cid: &Cid, remote: SocketAddr) {
        if let Some(session) = self.sessions.remove(cid) {
            self.reset_tokens.remove_session(&session);
            self.addr_counts.decrement(remote.ip());
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.session_count()
    }

    pub fn connections_for(&self, ip: IpAddr) -> usize {
        self.addr_counts.get(ip)
    }

    pub fn stateless_resets_for(&self, ip: IpAddr) -> usize {
        self.reset_counts.get(ip)
    }

    pub fn address_is_validated(&self, ip: IpAddr) -> bool {
        self.validated_addrs.peek(ip)
    }

    pub fn stats(&self) -> &SocketStats {
        &self.stats
    }

    pub fn stats_snapshot(&self) -> [u64; 11] {
        self.stats.snapshot()
    }

    // ------------------------------------------------------------------
    // Receive path
    // ------------------------------------------------------------------

    /// Entry point for every datagram the UDP layer delivers.
    pub fn on_receive(&mut self, datagram: &[u8], local: SocketAddr, remote: SocketAddr) {
        if !matches!(self.state, SocketState::Listening | SocketState::Stopped) {
            return;
        }
        trace!(
            target: "qmux::socket",
            len = datagram.len(),
            %remote,
            "receiving datagram"
        );
        if diagnostic_loss(self.rx_loss) {
            trace!(target: "qmux::socket", "simulating received packet loss");
            return;
        }
        self.stats.bytes_received += datagram.len() as u64;

        let header = match qmux_core::decode_version_cid(datagram, self.config.server_cid_len) {
            Ok(header) => header,
            Err(err) => {
                trace!(target: "qmux::socket", %err, "undecodable packet header");
                if self.config.count_undecodable {
                    self.stats.packets_ignored += 1;
                }
                return;
            }
        };
        // Non-standard connection-id lengths are legal in QUIC generally
        // but never issued by this socket, so nothing here can match.
        if header.dcid.len() > MAX_CID_LEN || header.scid.len() > MAX_CID_LEN {
            self.stats.packets_ignored += 1;
            return;
        }
        let (Ok(dcid), Ok(scid)) = (Cid::new(header.dcid), Cid::new(header.scid)) else {
            self.stats.packets_ignored += 1;
            return;
        };
        let short_header = !header.long;

        let session = match self.sessions.lookup(&dcid) {
            Some(session) => session,
            None => {
                trace!(target: "qmux::socket", %dcid, "no existing session for dcid");

                // A short-header packet for an unknown id may be a peer's
                // stateless reset: the token rides in the trailing bytes.
                if short_header
                    && !self.stateless_reset_disabled
                    && datagram.len() >= RESET_TOKEN_LEN
                {
                    let mut candidate = [0u8; RESET_TOKEN_LEN];
                    candidate.copy_from_slice(&datagram[datagram.len() - RESET_TOKEN_LEN..]);
                    if let Some(session) = self.reset_tokens.lookup(&candidate) {
                        debug!(target: "qmux::socket", "received a stateless reset token");
                        if session.deliver(datagram, local, remote) {
                            self.stats.packets_received += 1;
                        } else {
                            self.stats.packets_ignored += 1;
                        }
                        return;
                    }
                }

                match self.accept_initial(datagram, header.version, &dcid, &scid, local, remote) {
                    AcceptOutcome::Session(session) => session,
                    AcceptOutcome::Responded => return,
                    AcceptOutcome::NoSession => {
                        // No session could be created. For short headers
                        // the polite answer is a stateless reset; anything
                        // else is ignored so an attacker cannot spend our
                        // resources.
                        if short_header
                            && self.send_stateless_reset(&dcid, local, remote, datagram.len())
                        {
                            debug!(target: "qmux::socket", "sent stateless reset");
                            self.stats.stateless_reset_count += 1;
                            return;
                        }
                        self.stats.packets_ignored += 1;
                        return;
                    }
                }
            }
        };

        if session.deliver(datagram, local, remote) {
            self.stats.packets_received += 1;
            self.qlog_event("transport:datagram_received", datagram.len(), remote);
        } else {
            self.stats.packets_ignored += 1;
        }
    }

    /// Validate and admit the first packet of a new connection.
    fn accept_initial(
        &mut self,
        datagram: &[u8],
        version: u32,
        dcid: &Cid,
        scid: &Cid,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> AcceptOutcome {
        if self.state != SocketState::Listening {
            trace!(target: "qmux::socket", "socket is not listening");
            return AcceptOutcome::NoSession;
        }

        let initial = match classify_initial(datagram) {
            InitialClassification::VersionNegotiate => {
                self.send_version_negotiation(version, dcid, scid, local, remote);
                return AcceptOutcome::Responded;
            }
            InitialClassification::Retry => {
                debug!(target: "qmux::socket", "0-rtt packet before validation; sending retry");
                self.send_retry(version, dcid, scid, local, remote);
                return AcceptOutcome::Responded;
            }
            InitialClassification::Ignore => return AcceptOutcome::NoSession,
            InitialClassification::Accept(initial) => initial,
        };

        let mut initial_close = None;
        if self.busy {
            debug!(target: "qmux::socket", "server is busy; connection will be refused");
            initial_close = Some(SERVER_BUSY);
        }
        if self.addr_counts.get(remote.ip()) >= self.config.max_connections_per_host {
            debug!(
                target: "qmux::socket",
                ip = %remote.ip(),
                "connection count for address exceeded"
            );
            initial_close = Some(SERVER_BUSY);
        }

        // Explicit address validation. Skipped when the connection is
        // already marked for refusal: there is no point making the peer
        // round-trip a token for a connection we will close.
        let mut original_dcid = None;
        if initial_close.is_none() && self.config.option_set(VALIDATE_ADDRESS) {
            let recently_validated = self.config.option_set(VALIDATE_ADDRESS_LRU)
                && self.validated_addrs.contains(remote.ip());
            if recently_validated {
                trace!(target: "qmux::socket", "skipping validation for recently validated address");
            } else {
                debug!(target: "qmux::socket", "performing explicit address validation");
                match verify_retry_token(
                    &initial.token,
                    remote,
                    &self.secrets.token_secret,
                    self.config.retry_token_expiration,
                    SystemTime::now(),
                ) {
                    Ok(ocid) => {
                        trace!(target: "qmux::socket", "valid retry token found; continuing");
                        self.validated_addrs.mark(remote.ip());
                        original_dcid = Some(ocid);
                    }
                    Err(err) => {
                        debug!(target: "qmux::socket", %err, "no valid retry token; sending retry");
                        self.send_retry(version, dcid, scid, local, remote);
                        return AcceptOutcome::Responded;
                    }
                }
            }
        }

        let Some(server) = self.server.as_ref() else {
            return AcceptOutcome::NoSession;
        };
        let server_cid = Cid::random(self.config.server_cid_len);
        let params = SessionParams {
            server_cid,
            client_dcid: *dcid,
            client_scid: *scid,
            original_dcid,
            version,
            alpn: server.alpn.clone(),
            options: server.options,
            local,
            remote,
            preferred_address: server.preferred_address,
            initial_close,
            secure_ctx: Arc::clone(&server.secure_ctx),
            qlog: self.config.qlog,
        };
        let session = self.factory.create(params);
        self.add_session(server_cid, Arc::clone(&session), remote);
        self.associate_cid(*dcid, server_cid);
        debug!(target: "qmux::socket", cid = %server_cid, %remote, "server session created");
        self.listeners.emit_session_ready(&session);
        AcceptOutcome::Session(session)
    }

    // ------------------------------------------------------------------
    // Stateless responses
    // ------------------------------------------------------------------

    fn send_version_negotiation(
        &mut self,
        version: u32,
        dcid: &Cid,
        scid: &Cid,
        local: SocketAddr,
        remote: SocketAddr,
    ) {
        let versions = [reserved_version(remote, version), PROTOCOL_VERSION];
        // Outgoing header swaps the incoming connection ids.
        let payload =
            wire::write_version_negotiation(scid.as_slice(), dcid.as_slice(), &versions);
        let packet = PacketBuffer::from_vec("version negotiation", payload);
        let _ = self.send_packet(local, remote, packet, None);
    }

    /// Answer an unroutable short-header packet with a stateless reset,
    /// unless policy forbids it: resets can be disabled outright, are
    /// capped per host to stop reset loops, and must be strictly smaller
    /// than their trigger.
    fn send_stateless_reset(
        &mut self,
        dcid: &Cid,
        local: SocketAddr,
        remote: SocketAddr,
        source_len: usize,
    ) -> bool {
        if self.stateless_reset_disabled {
            return false;
        }
        if self.reset_counts.get(remote.ip()) >= self.config.max_stateless_resets_per_host {
            return false;
        }
        let pktlen = source_len.saturating_sub(1);
        let token = derive_reset_token(&self.secrets.reset_token_secret, dcid);
        let payload = match wire::write_stateless_reset(token, pktlen) {
            Ok(payload) => payload,
            Err(_) => return false,
        };
        let packet = PacketBuffer::from_vec("stateless reset", payload);
        self.reset_counts.increment(remote.ip());
        self.send_packet(local, remote, packet, None).is_ok()
    }

    fn send_retry(
        &mut self,
        version: u32,
        dcid: &Cid,
        scid: &Cid,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> bool {
        let token = build_retry_token(remote, dcid, &self.secrets.token_secret);
        let new_scid = Cid::random(self.config.server_cid_len);
        let payload = match wire::write_retry(version, scid, &new_scid, dcid, &token) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(target: "qmux::socket", %err, "failed to encode retry packet");
                return false;
            }
        };
        let packet = PacketBuffer::from_vec("retry", payload);
        self.send_packet(local, remote, packet, None).is_ok()
    }

    // ------------------------------------------------------------------
    // Send path
    // ------------------------------------------------------------------

    /// Submit a packet through the preferred endpoint. Ownership of the
    /// buffer transfers to the in-flight record until the completion for
    /// it arrives via [`QuicSocket::on_send_done`].
    pub fn send_packet(
        &mut self,
        local: SocketAddr,
        remote: SocketAddr,
        packet: PacketBuffer,
        session: Option<Arc<dyn Session>>,
    ) -> io::Result<()> {
        if packet.is_empty() {
            return Ok(());
        }
        debug!(
            target: "qmux::socket",
            len = packet.len(),
            %remote,
            %local,
            label = packet.label(),
            "sending packet"
        );
        if diagnostic_loss(self.tx_loss) {
            trace!(target: "qmux::socket", "simulating transmitted packet loss");
            return Ok(());
        }
        let Some(index) = self.preferred_endpoint else {
            let err = io::Error::new(io::ErrorKind::NotConnected, "no endpoint attached");
            self.trace_send_failure(&packet, &err);
            return Err(err);
        };
        let id = self.next_send_id;
        self.next_send_id += 1;
        match self.endpoints[index].submit(id, &packet, remote) {
            Ok(()) => {
                self.in_flight.insert(
                    id,
                    SendRecord {
                        endpoint: index,
                        remote,
                        packet,
                        _session: session,
                    },
                );
                Ok(())
            }
            Err(err) => {
                self.trace_send_failure(&packet, &err);
                Err(err)
            }
        }
    }

    /// Completion for a previously queued send. Safe to call after
    /// `destroy`; only buffer ownership is released then.
    pub fn on_send_done(&mut self, id: SendId, status: io::Result<()>) {
        let Some(record) = self.in_flight.remove(&id) else {
            return;
        };
        let drained = self.endpoints[record.endpoint].complete();
        if self.state == SocketState::Destroyed {
            return;
        }
        match status {
            Ok(()) => {
                self.stats.bytes_sent += record.packet.len() as u64;
                self.stats.packets_sent += 1;
                trace!(
                    target: "qmux::socket",
                    len = record.packet.len(),
                    label = record.packet.label(),
                    "sent packet"
                );
                self.qlog_event("transport:packet_sent", record.packet.len(), record.remote);
            }
            Err(err) => self.trace_send_failure(&record.packet, &err),
        }
        if drained {
            debug!(target: "qmux::socket", "endpoint has no pending callbacks");
            self.listeners.emit_endpoint_done(EndpointId(record.endpoint));
        }
    }

    /// Surface a UDP read failure to the host. The socket itself keeps
    /// running; one bad read never aborts the receive loop.
    pub fn on_endpoint_error(&mut self, endpoint: EndpointId, error: &io::Error) {
        debug!(
            target: "qmux::socket",
            endpoint = endpoint.0,
            %error,
            "reading from udp socket failed"
        );
        let code = error.raw_os_error().map(|c| -(c as i64)).unwrap_or(-1);
        self.listeners.emit_error(code);
    }

    /// Transition an endpoint into draining; `endpoint_done` fires once
    /// its pending completions reach zero (immediately, if already idle).
    pub fn wait_for_pending_callbacks(&mut self, id: EndpointId) {
        if let Some(endpoint) = self.endpoints.get_mut(id.0) {
            if endpoint.begin_drain() {
                debug!(target: "qmux::socket", "endpoint has no pending callbacks");
                self.listeners.emit_endpoint_done(id);
            }
        }
    }

    fn trace_send_failure(&self, packet: &PacketBuffer, err: &io::Error) {
        warn!(
            target: "qmux::socket",
            len = packet.len(),
            label = packet.label(),
            error = %err,
            "failed to send packet"
        );
    }

    fn qlog_event(&self, name: &str, length: usize, remote: SocketAddr) {
        if !self.config.qlog {
            return;
        }
        let event = serde_json::json!({
            "name": name,
            "data": { "length": length, "remote": remote.to_string() },
        });
        trace!(target: "qmux::qlog", event = %event);
    }
}

fn diagnostic_loss(probability: f64) -> bool {
    probability > 0.0 && rand::thread_rng().gen::<f64>() < probability
}
