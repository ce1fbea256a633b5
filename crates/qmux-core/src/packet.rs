use crate::cid::{Cid, MAX_CID_LEN};
use crate::version::{is_supported, PROTOCOL_VERSION};
use bytes::Buf;

/// Smallest UDP datagram a client may use to open a connection. Anything
/// shorter is dropped before the server spends state or bandwidth on it.
pub const MIN_INITIAL_SIZE: usize = 1200;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PacketDecodeError {
    #[error("datagram is too short for a QUIC header")]
    Truncated,
    #[error("header claims more connection-id bytes than provided")]
    LengthMismatch,
}

/// Raw header fields lifted off a datagram before any length policy is
/// applied. Connection-id slices may exceed [`MAX_CID_LEN`]; the receive
/// path decides what to do with those.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHeader<'a> {
    pub version: u32,
    pub dcid: &'a [u8],
    pub scid: &'a [u8],
    pub long: bool,
}

/// Extract (version, DCID, SCID) from either header form.
///
/// Short headers carry no explicit DCID length, so the server's own
/// connection-id length `short_cid_len` is assumed, and the version is
/// reported as the current protocol version with an empty SCID.
pub fn decode_version_cid(
    datagram: &[u8],
    short_cid_len: usize,
) -> Result<RawHeader<'_>, PacketDecodeError> {
    let first = *datagram.first().ok_or(PacketDecodeError::Truncated)?;

    if first & 0b1000_0000 == 0 {
        if datagram.len() < 1 + short_cid_len {
            return Err(PacketDecodeError::Truncated);
        }
        return Ok(RawHeader {
            version: PROTOCOL_VERSION,
            dcid: &datagram[1..1 + short_cid_len],
            scid: &[],
            long: false,
        });
    }

    if datagram.len() < 6 {
        return Err(PacketDecodeError::Truncated);
    }
    let mut cursor = &datagram[1..];
    let version = cursor.get_u32();

    let dcid_len = cursor.get_u8() as usize;
    if cursor.remaining() < dcid_len + 1 {
        return Err(PacketDecodeError::LengthMismatch);
    }
    let dcid = &cursor[..dcid_len];
    cursor.advance(dcid_len);

    let scid_len = cursor.get_u8() as usize;
    if cursor.remaining() < scid_len {
        return Err(PacketDecodeError::LengthMismatch);
    }
    let scid = &cursor[..scid_len];

    Ok(RawHeader {
        version,
        dcid,
        scid,
        long: true,
    })
}

/// Long-header packet forms of QUIC v1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LongPacketType {
    Initial,
    ZeroRtt,
    Handshake,
    Retry,
}

fn long_packet_type(first: u8) -> LongPacketType {
    match (first >> 4) & 0b11 {
        0b00 => LongPacketType::Initial,
        0b01 => LongPacketType::ZeroRtt,
        0b10 => LongPacketType::Handshake,
        _ => LongPacketType::Retry,
    }
}

/// Fields of an acceptable INITIAL packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialHeader {
    pub version: u32,
    pub dcid: Cid,
    pub scid: Cid,
    pub token: Vec<u8>,
}

/// Verdict on a datagram that matched no existing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitialClassification {
    /// Well-formed INITIAL for a supported version; handshake may proceed.
    Accept(InitialHeader),
    /// Long header with a version this server does not speak.
    VersionNegotiate,
    /// 0-RTT attempt before address validation; answer with a retry.
    Retry,
    /// Nothing a server should react to.
    Ignore,
}

/// Decide how to treat the first packet of a would-be connection.
///
/// The undersized-datagram check comes first: responding to tiny packets
/// would hand an attacker amplification regardless of what the header says.
pub fn classify_initial(datagram: &[u8]) -> InitialClassification {
    let first = match datagram.first() {
        Some(first) if first & 0b1000_0000 != 0 => *first,
        _ => return InitialClassification::Ignore,
    };
    if datagram.len() < MIN_INITIAL_SIZE {
        return InitialClassification::Ignore;
    }

    let header = match decode_version_cid(datagram, 0) {
        Ok(header) => header,
        Err(_) => return InitialClassification::Ignore,
    };
    if header.dcid.len() > MAX_CID_LEN || header.scid.len() > MAX_CID_LEN {
        return InitialClassification::Ignore;
    }
    if !is_supported(header.version) {
        return InitialClassification::VersionNegotiate;
    }

    match long_packet_type(first) {
        LongPacketType::ZeroRtt => return InitialClassification::Retry,
        LongPacketType::Initial => {}
        _ => return InitialClassification::Ignore,
    }

    // Past the connection ids sits the token, QUIC-varint prefixed.
    let offset = 1 + 4 + 1 + header.dcid.len() + 1 + header.scid.len();
    let mut cursor = &datagram[offset..];
    let token_len = match get_varint(&mut cursor) {
        Some(len) => len as usize,
        None => return InitialClassification::Ignore,
    };
    if cursor.len() < token_len {
        return InitialClassification::Ignore;
    }
    let token = cursor[..token_len].to_vec();

    let (Ok(dcid), Ok(scid)) = (Cid::new(header.dcid), Cid::new(header.scid)) else {
        return InitialClassification::Ignore;
    };
    InitialClassification::Accept(InitialHeader {
        version: header.version,
        dcid,
        scid,
        token,
    })
}

fn get_varint(cursor: &mut &[u8]) -> Option<u64> {
    let first = *cursor.first()?;
    let len = 1usize << (first >> 6);
    if cursor.len() < len {
        return None;
    }
    let mut value = (first & 0b0011_1111) as u64;
    for byte in &cursor[1..len] {
        value = (value << 8) | *byte as u64;
    }
    cursor.advance(len);
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_initial(
        version: u32,
        dcid: &[u8],
        scid: &[u8],
        token: &[u8],
        total_len: usize,
    ) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(0b1100_0000); // long form, fixed bit, Initial
        buf.extend_from_slice(&version.to_be_bytes());
        buf.push(dcid.len() as u8);
        buf.extend_from_slice(dcid);
        buf.push(scid.len() as u8);
        buf.extend_from_slice(scid);
        assert!(token.len() < 64);
        buf.push(token.len() as u8); // single-byte varint
        buf.extend_from_slice(token);
        assert!(buf.len() <= total_len);
        buf.resize(total_len, 0);
        buf
    }

    #[test]
    fn decodes_long_header() {
        let packet = build_initial(1, &[0x11; 8], &[0x22; 4], &[], MIN_INITIAL_SIZE);
        let header = decode_version_cid(&packet, 18).expect("decode");
        assert_eq!(header.version, 1);
        assert_eq!(header.dcid, &[0x11; 8]);
        assert_eq!(header.scid, &[0x22; 4]);
        assert!(header.long);
    }

    #[test]
    fn decodes_short_header_with_assumed_cid_len() {
        let mut packet = vec![0b0100_0000];
        packet.extend_from_slice(&[0xab; 30]);
        let header = decode_version_cid(&packet, 18).expect("decode");
        assert!(!header.long);
        assert_eq!(header.version, PROTOCOL_VERSION);
        assert_eq!(header.dcid, &[0xab; 18]);
        assert!(header.scid.is_empty());
    }

    #[test]
    fn truncated_headers_are_rejected() {
        assert_eq!(
            decode_version_cid(&[0xc0, 0x00, 0x00], 18),
            Err(PacketDecodeError::Truncated)
        );
        // Header claims an eight-byte DCID but provides three.
        let lying = [0xc0, 0, 0, 0, 1, 8, 0xaa, 0xbb, 0xcc];
        assert_eq!(
            decode_version_cid(&lying, 18),
            Err(PacketDecodeError::LengthMismatch)
        );
    }

    #[test]
    fn unsupported_version_wants_negotiation() {
        let packet = build_initial(0xBABA_BABA, &[0x01; 8], &[0x02; 4], &[], MIN_INITIAL_SIZE);
        assert_eq!(classify_initial(&packet), InitialClassification::VersionNegotiate);
    }

    #[test]
    fn undersized_initial_is_ignored_even_with_bad_version() {
        let packet = build_initial(0xBABA_BABA, &[0x01; 8], &[0x02; 4], &[], 600);
        assert_eq!(classify_initial(&packet), InitialClassification::Ignore);
    }

    #[test]
    fn zero_rtt_requires_retry() {
        let mut packet = build_initial(1, &[0x01; 8], &[0x02; 4], &[], MIN_INITIAL_SIZE);
        packet[0] = 0b1101_0000; // 0-RTT type bits
        assert_eq!(classify_initial(&packet), InitialClassification::Retry);
    }

    #[test]
    fn handshake_packets_are_not_accept_candidates() {
        let mut packet = build_initial(1, &[0x01; 8], &[0x02; 4], &[], MIN_INITIAL_SIZE);
        packet[0] = 0b1110_0000;
        assert_eq!(classify_initial(&packet), InitialClassification::Ignore);
    }

    #[test]
    fn accepts_initial_and_extracts_token() {
        let packet = build_initial(1, &[0x01; 8], &[0x02; 4], &[9, 9, 9], MIN_INITIAL_SIZE);
        match classify_initial(&packet) {
            InitialClassification::Accept(header) => {
                assert_eq!(header.version, 1);
                assert_eq!(header.dcid.as_slice(), &[0x01; 8]);
                assert_eq!(header.scid.as_slice(), &[0x02; 4]);
                assert_eq!(header.token, vec![9, 9, 9]);
            }
            other => panic!("expected accept, got {other:?}"),
        }
    }

    #[test]
    fn short_headers_never_classify() {
        let packet = vec![0b0100_0000; MIN_INITIAL_SIZE];
        assert_eq!(classify_initial(&packet), InitialClassification::Ignore);
    }
}
