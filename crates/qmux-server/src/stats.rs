use once_cell::sync::Lazy;
use serde::Serialize;
use std::time::Instant;

static CLOCK_BASE: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic nanoseconds since the first stats read in this process.
pub(crate) fn monotonic_nanos() -> u64 {
    CLOCK_BASE.elapsed().as_nanos() as u64
}

/// Monotonic counters for one socket.
///
/// `client_sessions` exists for layout parity with the snapshot contract;
/// this crate only implements the server acceptance path, so it never
/// advances here.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct SocketStats {
    pub created_at: u64,
    pub bound_at: u64,
    pub listen_at: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub packets_sent: u64,
    pub packets_ignored: u64,
    pub server_sessions: u64,
    pub client_sessions: u64,
    pub stateless_reset_count: u64,
}

impl SocketStats {
    /// Fixed-layout snapshot; the order is part of the host contract.
    pub fn snapshot(&self) -> [u64; 11] {
        [
            self.created_at,
            self.bound_at,
            self.listen_at,
            self.bytes_received,
            self.bytes_sent,
            self.packets_received,
            self.packets_sent,
            self.packets_ignored,
            self.server_sessions,
            self.client_sessions,
            self.stateless_reset_count,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_order_is_stable() {
        let stats = SocketStats {
            created_at: 1,
            bound_at: 2,
            listen_at: 3,
            bytes_received: 4,
            bytes_sent: 5,
            packets_received: 6,
            packets_sent: 7,
            packets_ignored: 8,
            server_sessions: 9,
            client_sessions: 10,
            stateless_reset_count: 11,
        };
        assert_eq!(stats.snapshot(), [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn clock_is_monotonic() {
        let first = monotonic_nanos();
        let second = monotonic_nanos();
        assert!(second >= first);
    }
}
