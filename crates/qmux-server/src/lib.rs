//! Server-side QUIC socket demultiplexer.
//!
//! A [`QuicSocket`] is one logical endpoint over any number of bound UDP
//! sockets. It routes inbound datagrams to externally-owned session state
//! machines by connection id, detects peer-issued stateless-reset tokens,
//! and performs the address-validation and denial-of-service defenses a
//! QUIC server owes the network: version negotiation, retry tokens,
//! stateless resets, per-peer connection caps, and busy admission control.
//!
//! The core is synchronous and single-writer. [`driver::UdpDriver`] wires
//! it to a tokio UDP socket by owning it on a single task; other runtimes
//! can do the same with their own [`endpoint::DatagramSink`].

pub mod config;
pub mod driver;
pub mod endpoint;
pub mod listener;
pub mod session;
pub mod socket;
pub mod stats;

mod tables;
mod validated;

pub use config::{
    ConfigError, SocketConfig, DEFAULT_MAX_CONNECTIONS_PER_HOST,
    DEFAULT_MAX_STATELESS_RESETS_PER_HOST, DEFAULT_RETRY_TOKEN_EXPIRATION, DEFAULT_SERVER_CID_LEN,
    DISABLE_STATELESS_RESET, MAX_RETRY_TOKEN_EXPIRATION, MIN_RETRY_TOKEN_EXPIRATION,
    VALIDATE_ADDRESS, VALIDATE_ADDRESS_LRU,
};
pub use driver::{DriverError, UdpDriver};
pub use endpoint::{
    memory_endpoint, DatagramSink, Endpoint, EndpointId, MemorySink, SendId, SentDatagram, SentLog,
};
pub use listener::{ListenerId, Prev, SocketListener};
pub use session::{
    SecureContext, ServerSessionFactory, Session, SessionParams, SERVER_BUSY,
};
pub use socket::{ListenError, QuicSocket};
pub use stats::SocketStats;
