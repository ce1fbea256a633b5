//! Wire-level primitives for the qmux QUIC socket demultiplexer.
//!
//! Everything in this crate is pure and I/O-free: connection-id values,
//! header decoding and initial-packet classification, the writers for the
//! three stateless server responses (version negotiation, retry, stateless
//! reset), and the token engine that authenticates retry tokens and derives
//! stateless-reset tokens. The stateful demultiplexer lives in
//! `qmux-server`.

pub mod buffer;
pub mod cid;
pub mod entropy;
pub mod packet;
pub mod token;
pub mod version;
pub mod wire;

pub use buffer::{PacketBuffer, MAX_PACKET_SIZE};
pub use cid::{Cid, CidLengthError, MAX_CID_LEN};
pub use packet::{
    classify_initial, decode_version_cid, InitialClassification, InitialHeader, LongPacketType,
    PacketDecodeError, RawHeader, MIN_INITIAL_SIZE,
};
pub use token::{
    build_retry_token, derive_reset_token, verify_retry_token, RetryTokenError, RESET_SECRET_LEN,
    RESET_TOKEN_LEN, RETRY_TOKEN_MAX, TOKEN_SECRET_LEN,
};
pub use version::{is_supported, reserved_version, PROTOCOL_VERSION};
pub use wire::{
    write_retry, write_stateless_reset, write_version_negotiation, WireError,
    MIN_STATELESS_RESET_LEN,
};
