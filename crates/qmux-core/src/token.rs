use crate::cid::Cid;
use crate::entropy;
use crate::version::sockaddr_bytes;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Retry tokens never exceed this size on the wire.
pub const RETRY_TOKEN_MAX: usize = 256;
/// Stateless-reset tokens are fixed at sixteen bytes.
pub const RESET_TOKEN_LEN: usize = 16;
/// Key length for the retry-token AEAD.
pub const TOKEN_SECRET_LEN: usize = 32;
/// Key length for stateless-reset token derivation.
pub const RESET_SECRET_LEN: usize = 16;

const NONCE_LEN: usize = 12;
const TIMESTAMP_LEN: usize = 8;
const TAG_LEN: usize = 16;

/// Errors returned when validating retry tokens.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RetryTokenError {
    #[error("retry token was truncated")]
    Truncated,
    #[error("retry token failed authentication")]
    Rejected,
    #[error("retry token expired")]
    Expired,
}

type ResetTokenMac = Hmac<Sha256>;

/// Build a retry token proving the peer owns `remote`.
///
/// The original DCID and the issue timestamp are sealed under the token
/// secret with the peer address as associated data, so replaying the token
/// from any other address fails authentication rather than expiry.
pub fn build_retry_token(remote: SocketAddr, original_dcid: &Cid, secret: &[u8; TOKEN_SECRET_LEN]) -> Vec<u8> {
    let issued_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();

    let mut plaintext = Vec::with_capacity(TIMESTAMP_LEN + original_dcid.len());
    plaintext.extend_from_slice(&issued_at.to_be_bytes());
    plaintext.extend_from_slice(original_dcid.as_slice());

    let nonce: [u8; NONCE_LEN] = entropy::random_array();
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(secret));
    let sealed = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: &plaintext,
                aad: &sockaddr_bytes(remote),
            },
        )
        .expect("aead seal");

    let mut token = Vec::with_capacity(NONCE_LEN + sealed.len());
    token.extend_from_slice(&nonce);
    token.extend_from_slice(&sealed);
    debug_assert!(token.len() <= RETRY_TOKEN_MAX);
    token
}

/// Verify a retry token against the emitting address and recover the
/// original DCID.
pub fn verify_retry_token(
    token: &[u8],
    remote: SocketAddr,
    secret: &[u8; TOKEN_SECRET_LEN],
    max_age: Duration,
    now: SystemTime,
) -> Result<Cid, RetryTokenError> {
    if token.len() < NONCE_LEN + TIMESTAMP_LEN + TAG_LEN || token.len() > RETRY_TOKEN_MAX {
        return Err(RetryTokenError::Truncated);
    }
    let (nonce, sealed) = token.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(secret));
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: sealed,
                aad: &sockaddr_bytes(remote),
            },
        )
        .map_err(|_| RetryTokenError::Rejected)?;

    if plaintext.len() < TIMESTAMP_LEN {
        return Err(RetryTokenError::Truncated);
    }
    let (ts_bytes, odcid) = plaintext.split_at(TIMESTAMP_LEN);
    let mut ts = [0u8; TIMESTAMP_LEN];
    ts.copy_from_slice(ts_bytes);
    let issued_at = UNIX_EPOCH + Duration::from_secs(u64::from_be_bytes(ts));

    let age = now
        .duration_since(issued_at)
        .unwrap_or(Duration::ZERO);
    if age > max_age {
        return Err(RetryTokenError::Expired);
    }

    Cid::new(odcid).map_err(|_| RetryTokenError::Rejected)
}

/// Derive the stateless-reset token for a connection id.
///
/// Deterministic in `(secret, cid)`: the same socket always derives the same
/// token for a given id, which is what lets a rebooted server prove it once
/// owned the connection.
pub fn derive_reset_token(secret: &[u8; RESET_SECRET_LEN], cid: &Cid) -> [u8; RESET_TOKEN_LEN] {
    let mut mac = <ResetTokenMac as Mac>::new_from_slice(secret).expect("mac init");
    mac.update(cid.as_slice());
    let digest = mac.finalize().into_bytes();
    let mut token = [0u8; RESET_TOKEN_LEN];
    token.copy_from_slice(&digest[..RESET_TOKEN_LEN]);
    token
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::net::{IpAddr, Ipv4Addr};

    fn peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)), 51000)
    }

    #[test]
    fn round_trip_recovers_original_dcid() {
        let secret = [7u8; TOKEN_SECRET_LEN];
        let odcid = Cid::new(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let token = build_retry_token(peer(), &odcid, &secret);
        assert!(token.len() <= RETRY_TOKEN_MAX);

        let recovered = verify_retry_token(
            &token,
            peer(),
            &secret,
            Duration::from_secs(10),
            SystemTime::now(),
        )
        .expect("verify");
        assert_eq!(recovered, odcid);
    }

    #[test]
    fn any_flipped_byte_breaks_verification() {
        let secret = [9u8; TOKEN_SECRET_LEN];
        let odcid = Cid::new(&[0xaa; 8]).unwrap();
        let token = build_retry_token(peer(), &odcid, &secret);

        for index in 0..token.len() {
            let mut tampered = token.clone();
            tampered[index] ^= 0x01;
            let err = verify_retry_token(
                &tampered,
                peer(),
                &secret,
                Duration::from_secs(10),
                SystemTime::now(),
            )
            .unwrap_err();
            assert_eq!(err, RetryTokenError::Rejected, "byte {index}");
        }
    }

    #[test]
    fn rejects_wrong_address() {
        let secret = [4u8; TOKEN_SECRET_LEN];
        let odcid = Cid::new(&[0x55; 8]).unwrap();
        let token = build_retry_token(peer(), &odcid, &secret);

        let elsewhere = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 8)), 51000);
        let err = verify_retry_token(
            &token,
            elsewhere,
            &secret,
            Duration::from_secs(10),
            SystemTime::now(),
        )
        .unwrap_err();
        assert_eq!(err, RetryTokenError::Rejected);

        // Same IP, different port also counts as a different peer.
        let rebound = SocketAddr::new(peer().ip(), 51001);
        let err = verify_retry_token(
            &token,
            rebound,
            &secret,
            Duration::from_secs(10),
            SystemTime::now(),
        )
        .unwrap_err();
        assert_eq!(err, RetryTokenError::Rejected);
    }

    #[test]
    fn rejects_expired_token() {
        let secret = [2u8; TOKEN_SECRET_LEN];
        let odcid = Cid::new(&[0x11; 8]).unwrap();
        let token = build_retry_token(peer(), &odcid, &secret);

        let future = SystemTime::now() + Duration::from_secs(61);
        let err =
            verify_retry_token(&token, peer(), &secret, Duration::from_secs(60), future).unwrap_err();
        assert_eq!(err, RetryTokenError::Expired);
    }

    #[test]
    fn reset_token_is_deterministic_and_distinct() {
        let secret = [3u8; RESET_SECRET_LEN];
        let mut seen = HashSet::new();
        for value in 0u8..64 {
            let cid = Cid::new(&[value; 8]).unwrap();
            let token = derive_reset_token(&secret, &cid);
            assert_eq!(token, derive_reset_token(&secret, &cid));
            assert!(seen.insert(token), "collision for cid {cid}");
        }
    }

    #[test]
    fn reset_token_depends_on_secret() {
        let cid = Cid::new(&[0x42; 8]).unwrap();
        assert_ne!(
            derive_reset_token(&[1u8; RESET_SECRET_LEN], &cid),
            derive_reset_token(&[2u8; RESET_SECRET_LEN], &cid)
        );
    }
}
