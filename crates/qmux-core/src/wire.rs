use crate::buffer::MAX_PACKET_SIZE;
use crate::cid::Cid;
use crate::entropy;
use crate::token::{RESET_TOKEN_LEN, RETRY_TOKEN_MAX};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Key, Nonce};

/// Shortest stateless-reset packet that is still indistinguishable from a
/// short-header packet with payload.
pub const MIN_STATELESS_RESET_LEN: usize = 41;

/// Fixed key and nonce for the v1 retry integrity tag (RFC 9001, 5.8).
const RETRY_INTEGRITY_KEY: [u8; 16] = [
    0xbe, 0x0c, 0x69, 0x0b, 0x9f, 0x66, 0x57, 0x5a, 0x1d, 0x76, 0x6b, 0x54, 0xe3, 0x68, 0xc8,
    0x4e,
];
const RETRY_INTEGRITY_NONCE: [u8; 12] = [
    0x46, 0x15, 0x99, 0xd3, 0x5d, 0x63, 0x2b, 0xf2, 0x23, 0x98, 0x25, 0xbb,
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("retry token of {0} bytes exceeds the wire limit")]
    TokenTooLong(usize),
    #[error("stateless reset of {0} bytes would be identifiable")]
    ResetTooShort(usize),
    #[error("packet would exceed the maximum packet size")]
    PacketTooLong,
}

/// Encode a version-negotiation packet (RFC 9000, 17.2.1).
///
/// The caller passes the connection ids already swapped: `dcid` is the
/// peer's source id, `scid` the destination id the peer sent.
pub fn write_version_negotiation(dcid: &[u8], scid: &[u8], versions: &[u32]) -> Vec<u8> {
    let [random] = entropy::random_array::<1>();
    let mut out = Vec::with_capacity(7 + dcid.len() + scid.len() + versions.len() * 4);
    out.push(0b1000_0000 | (random & 0b0111_1111));
    out.extend_from_slice(&0u32.to_be_bytes());
    out.push(dcid.len() as u8);
    out.extend_from_slice(dcid);
    out.push(scid.len() as u8);
    out.extend_from_slice(scid);
    for version in versions {
        out.extend_from_slice(&version.to_be_bytes());
    }
    out
}

/// Encode a RETRY packet (RFC 9000, 17.2.5) carrying `token`, tagged with
/// the v1 retry integrity AEAD over the pseudo-packet that prepends the
/// client's original DCID.
pub fn write_retry(
    version: u32,
    dcid: &Cid,
    scid: &Cid,
    original_dcid: &Cid,
    token: &[u8],
) -> Result<Vec<u8>, WireError> {
    if token.len() > RETRY_TOKEN_MAX {
        return Err(WireError::TokenTooLong(token.len()));
    }

    let [random] = entropy::random_array::<1>();
    let mut out = Vec::with_capacity(7 + dcid.len() + scid.len() + token.len() + 16);
    out.push(0b1111_0000 | (random & 0b0000_1111));
    out.extend_from_slice(&version.to_be_bytes());
    out.push(dcid.len() as u8);
    out.extend_from_slice(dcid.as_slice());
    out.push(scid.len() as u8);
    out.extend_from_slice(scid.as_slice());
    out.extend_from_slice(token);
    if out.len() + 16 > MAX_PACKET_SIZE {
        return Err(WireError::PacketTooLong);
    }

    let tag = retry_integrity_tag(original_dcid, &out);
    out.extend_from_slice(&tag);
    Ok(out)
}

fn retry_integrity_tag(original_dcid: &Cid, packet: &[u8]) -> [u8; 16] {
    let mut pseudo = Vec::with_capacity(1 + original_dcid.len() + packet.len());
    pseudo.push(original_dcid.len() as u8);
    pseudo.extend_from_slice(original_dcid.as_slice());
    pseudo.extend_from_slice(packet);

    let cipher = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(&RETRY_INTEGRITY_KEY));
    let sealed = cipher
        .encrypt(
            Nonce::from_slice(&RETRY_INTEGRITY_NONCE),
            Payload {
                msg: &[],
                aad: &pseudo,
            },
        )
        .expect("aead seal");
    let mut tag = [0u8; 16];
    tag.copy_from_slice(&sealed);
    tag
}

/// Encode a stateless-reset packet (RFC 9000, 10.3) of exactly `pktlen`
/// bytes: unpredictable payload with the reset token in the trailing
/// sixteen bytes.
pub fn write_stateless_reset(
    token: [u8; RESET_TOKEN_LEN],
    pktlen: usize,
) -> Result<Vec<u8>, WireError> {
    if pktlen < MIN_STATELESS_RESET_LEN {
        return Err(WireError::ResetTooShort(pktlen));
    }
    if pktlen > MAX_PACKET_SIZE {
        return Err(WireError::PacketTooLong);
    }

    let mut out = entropy::random_vec(pktlen - RESET_TOKEN_LEN);
    out[0] = 0b0100_0000 | (out[0] & 0b0011_1111);
    out.extend_from_slice(&token);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::decode_version_cid;

    #[test]
    fn version_negotiation_layout() {
        let packet = write_version_negotiation(&[0x11; 4], &[0x22; 8], &[0x1a2a_3a4a, 1]);
        assert_ne!(packet[0] & 0b1000_0000, 0);

        let header = decode_version_cid(&packet, 18).expect("decode");
        assert!(header.long);
        assert_eq!(header.version, 0);
        assert_eq!(header.dcid, &[0x11; 4]);
        assert_eq!(header.scid, &[0x22; 8]);

        let list_offset = 7 + 4 + 8;
        assert_eq!(&packet[list_offset..list_offset + 4], &0x1a2a_3a4au32.to_be_bytes());
        assert_eq!(&packet[list_offset + 4..], &1u32.to_be_bytes());
    }

    #[test]
    fn retry_layout_and_tag() {
        let dcid = Cid::new(&[0x31; 4]).unwrap();
        let scid = Cid::random(18);
        let odcid = Cid::new(&[0x99; 8]).unwrap();
        let token = vec![0xf1; 40];

        let packet = write_retry(1, &dcid, &scid, &odcid, &token).expect("retry");
        assert_eq!(packet[0] & 0b1111_0000, 0b1111_0000);

        let header = decode_version_cid(&packet, 18).expect("decode");
        assert_eq!(header.version, 1);
        assert_eq!(header.dcid, dcid.as_slice());
        assert_eq!(header.scid, scid.as_slice());

        let body_len = 7 + dcid.len() + scid.len();
        assert_eq!(&packet[body_len..body_len + token.len()], &token[..]);

        let (body, tag) = packet.split_at(packet.len() - 16);
        assert_eq!(tag, retry_integrity_tag(&odcid, body));
    }

    #[test]
    fn retry_rejects_oversized_token() {
        let cid = Cid::new(&[1; 8]).unwrap();
        let err = write_retry(1, &cid, &cid, &cid, &[0u8; RETRY_TOKEN_MAX + 1]).unwrap_err();
        assert_eq!(err, WireError::TokenTooLong(RETRY_TOKEN_MAX + 1));
    }

    #[test]
    fn stateless_reset_layout() {
        let token = [0xcd; RESET_TOKEN_LEN];
        let packet = write_stateless_reset(token, 1199).expect("reset");
        assert_eq!(packet.len(), 1199);
        assert_eq!(packet[0] & 0b1100_0000, 0b0100_0000);
        assert_eq!(&packet[packet.len() - RESET_TOKEN_LEN..], &token);
    }

    #[test]
    fn stateless_reset_refuses_identifiable_lengths() {
        let token = [0u8; RESET_TOKEN_LEN];
        assert_eq!(
            write_stateless_reset(token, MIN_STATELESS_RESET_LEN - 1),
            Err(WireError::ResetTooShort(MIN_STATELESS_RESET_LEN - 1))
        );
        assert!(write_stateless_reset(token, MIN_STATELESS_RESET_LEN).is_ok());
    }
}
