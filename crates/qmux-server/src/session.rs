use qmux_core::Cid;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// Transport error a new session is told to close with when admission
/// control rejects the peer.
pub const SERVER_BUSY: u64 = 0x2;

/// Opaque TLS-backed context handed through to session construction. The
/// demultiplexer never looks inside it.
pub trait SecureContext: Send + Sync + fmt::Debug {}

/// A per-connection state machine owned outside the socket.
///
/// The socket holds shared references and routes datagrams in; everything
/// else about the connection (handshake, streams, recovery) happens behind
/// this trait. `deliver` returns false when the session could not process
/// the datagram, which the socket records as an ignored packet.
pub trait Session: Send + Sync {
    fn deliver(&self, datagram: &[u8], local: SocketAddr, remote: SocketAddr) -> bool;
}

/// Everything a factory needs to construct a server session.
#[derive(Debug, Clone)]
pub struct SessionParams {
    /// Connection id issued by the socket; peers route to this session
    /// with it.
    pub server_cid: Cid,
    /// DCID carried by the packet that created the session.
    pub client_dcid: Cid,
    /// SCID the client chose for itself.
    pub client_scid: Cid,
    /// DCID recovered from a retry token, when explicit validation ran.
    pub original_dcid: Option<Cid>,
    pub version: u32,
    pub alpn: String,
    /// Server options passed to `listen`, forwarded verbatim.
    pub options: u32,
    pub local: SocketAddr,
    pub remote: SocketAddr,
    /// Address the server advertises for connection migration, when
    /// configured at `listen` time.
    pub preferred_address: Option<SocketAddr>,
    /// When set, the session must close immediately with this transport
    /// error once initial keys are installed.
    pub initial_close: Option<u64>,
    pub secure_ctx: Arc<dyn SecureContext>,
    pub qlog: bool,
}

/// Builds server sessions for accepted initial packets.
pub trait ServerSessionFactory: Send + Sync {
    fn create(&self, params: SessionParams) -> Arc<dyn Session>;
}
