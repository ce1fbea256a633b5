/// Largest UDP payload the socket will ever carry, matching the QUIC
/// maximum packet size.
pub const MAX_PACKET_SIZE: usize = 65527;

/// Owned outbound packet buffer with a diagnostic label.
///
/// The label travels with the packet through the send path so traces can say
/// *why* a datagram left the socket ("retry", "stateless reset", ...).
/// Capacity is fixed at construction; only the logical length moves.
#[derive(Clone)]
pub struct PacketBuffer {
    data: Vec<u8>,
    len: usize,
    label: &'static str,
}

impl PacketBuffer {
    pub fn new(label: &'static str, capacity: usize) -> Self {
        assert!(capacity <= MAX_PACKET_SIZE);
        Self {
            data: vec![0u8; capacity],
            len: 0,
            label,
        }
    }

    /// Wrap an already-encoded packet; the logical length covers the whole
    /// vector.
    pub fn from_vec(label: &'static str, data: Vec<u8>) -> Self {
        assert!(data.len() <= MAX_PACKET_SIZE);
        let len = data.len();
        Self { data, len, label }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Set the logical length after writing into the buffer.
    pub fn set_len(&mut self, len: usize) {
        assert!(len <= self.data.len());
        self.len = len;
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new("unspecified", 0)
    }
}

impl std::fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketBuffer")
            .field("label", &self.label)
            .field("len", &self.len)
            .field("capacity", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_length_tracks_writes() {
        let mut buf = PacketBuffer::new("retry", 64);
        assert_eq!(buf.len(), 0);
        buf.data_mut()[..3].copy_from_slice(&[1, 2, 3]);
        buf.set_len(3);
        assert_eq!(buf.data(), &[1, 2, 3]);
        assert_eq!(buf.capacity(), 64);
    }

    #[test]
    fn default_label_is_unspecified() {
        assert_eq!(PacketBuffer::default().label(), "unspecified");
    }

    #[test]
    #[should_panic]
    fn length_cannot_exceed_capacity() {
        let mut buf = PacketBuffer::new("retry", 8);
        buf.set_len(9);
    }
}
