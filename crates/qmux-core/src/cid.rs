use crate::entropy;
use std::fmt;

/// QUIC v1 caps connection ids at twenty bytes.
pub const MAX_CID_LEN: usize = 20;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("connection id of {0} bytes exceeds the QUIC limit")]
pub struct CidLengthError(pub usize);

/// Opaque connection identifier, 0 to 20 bytes.
///
/// Equality and hashing cover the full byte range, so a zero-length id is a
/// valid (if useless) key.
#[derive(Clone, Copy)]
pub struct Cid {
    len: u8,
    data: [u8; MAX_CID_LEN],
}

impl Cid {
    pub fn new(bytes: &[u8]) -> Result<Self, CidLengthError> {
        if bytes.len() > MAX_CID_LEN {
            return Err(CidLengthError(bytes.len()));
        }
        let mut data = [0u8; MAX_CID_LEN];
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            len: bytes.len() as u8,
            data,
        })
    }

    pub fn empty() -> Self {
        Self {
            len: 0,
            data: [0u8; MAX_CID_LEN],
        }
    }

    /// Generate a random connection id of the given length.
    pub fn random(len: usize) -> Self {
        assert!(len <= MAX_CID_LEN);
        let mut data = [0u8; MAX_CID_LEN];
        entropy::fill_bytes(&mut data[..len]);
        Self {
            len: len as u8,
            data,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl PartialEq for Cid {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for Cid {}

impl std::hash::Hash for Cid {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_slice().hash(state);
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.as_slice() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({self})")
    }
}
