use std::net::SocketAddr;

/// QUIC v1.
pub const PROTOCOL_VERSION: u32 = 0x0000_0001;

pub fn is_supported(version: u32) -> bool {
    version == PROTOCOL_VERSION
}

/// Canonical byte encoding of a socket address: family tag, IP octets,
/// big-endian port. Shared by the token engine and the reserved-version
/// hash so both bind to the same view of the peer.
pub(crate) fn sockaddr_bytes(addr: SocketAddr) -> Vec<u8> {
    let mut out = Vec::with_capacity(19);
    match addr.ip() {
        std::net::IpAddr::V4(v4) => {
            out.push(4);
            out.extend_from_slice(&v4.octets());
        }
        std::net::IpAddr::V6(v6) => {
            out.push(6);
            out.extend_from_slice(&v6.octets());
        }
    }
    out.extend_from_slice(&addr.port().to_be_bytes());
    out
}

/// Compute the greased version advertised first in a version-negotiation
/// packet.
///
/// FNV-1a over the canonical peer address followed by the network-order
/// received version, masked into the reserved `0x?a?a?a?a` pattern so
/// conforming clients recognise it as a probe and never select it.
pub fn reserved_version(remote: SocketAddr, received: u32) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    let mut mix = |byte: u8| {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    };
    for byte in sockaddr_bytes(remote) {
        mix(byte);
    }
    for byte in received.to_be_bytes() {
        mix(byte);
    }
    (hash & 0xf0f0_f0f0) | 0x0a0a_0a0a
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    #[test]
    fn reserved_version_keeps_grease_pattern() {
        let addrs = [
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)), 51000),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 2)), 4433),
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 443),
        ];
        for addr in addrs {
            for received in [0u32, 1, 0xBABA_BABA, 0xffff_ffff] {
                let v = reserved_version(addr, received);
                assert_eq!(v & 0x0f0f_0f0f, 0x0a0a_0a0a, "{addr} {received:#x}");
                assert_ne!(v, PROTOCOL_VERSION);
            }
        }
    }

    #[test]
    fn reserved_version_varies_with_peer() {
        let a = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)), 51000);
        let b = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 8)), 51000);
        assert_ne!(
            reserved_version(a, 0xBABA_BABA),
            reserved_version(b, 0xBABA_BABA)
        );
        assert_eq!(
            reserved_version(a, 0xBABA_BABA),
            reserved_version(a, 0xBABA_BABA)
        );
    }
}
