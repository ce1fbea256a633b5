use parking_lot::Mutex;
use qmux_core::PacketBuffer;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

/// Identifies one in-flight send; echoed back through
/// [`crate::QuicSocket::on_send_done`].
pub type SendId = u64;

/// Identifies an endpoint attached to a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(pub(crate) usize);

/// Downcall into the host's UDP layer.
///
/// `send` either queues the datagram (the host reports the outcome later
/// with the same `id`) or fails synchronously. Implementations must not
/// retain the packet bytes past the call; the socket owns the buffer until
/// completion.
pub trait DatagramSink: Send {
    fn send(&mut self, id: SendId, packet: &PacketBuffer, remote: SocketAddr) -> io::Result<()>;
}

/// Binds one UDP socket into the demultiplexer.
///
/// Tracks how many queued sends still await completion so a graceful
/// shutdown can drain before the underlying socket closes.
pub struct Endpoint {
    local_addr: SocketAddr,
    sink: Box<dyn DatagramSink>,
    pending: usize,
    draining: bool,
    receiving: bool,
}

impl Endpoint {
    pub fn new(local_addr: SocketAddr, sink: Box<dyn DatagramSink>) -> Self {
        Self {
            local_addr,
            sink,
            pending: 0,
            draining: false,
            receiving: false,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn has_pending_callbacks(&self) -> bool {
        self.pending > 0
    }

    pub(crate) fn submit(
        &mut self,
        id: SendId,
        packet: &PacketBuffer,
        remote: SocketAddr,
    ) -> io::Result<()> {
        self.sink.send(id, packet, remote)?;
        self.pending += 1;
        Ok(())
    }

    /// Account one completed send. Returns true when this completion
    /// finished a requested drain.
    pub(crate) fn complete(&mut self) -> bool {
        self.pending = self.pending.saturating_sub(1);
        self.draining && self.pending == 0
    }

    /// Enter the draining state. Returns true when there is nothing left to
    /// wait for.
    pub(crate) fn begin_drain(&mut self) -> bool {
        self.draining = true;
        self.pending == 0
    }

    pub(crate) fn set_receiving(&mut self, receiving: bool) {
        self.receiving = receiving;
    }

    pub fn is_receiving(&self) -> bool {
        self.receiving
    }
}

/// One datagram captured by [`MemorySink`].
#[derive(Debug, Clone)]
pub struct SentDatagram {
    pub id: SendId,
    pub label: &'static str,
    pub payload: Vec<u8>,
    pub remote: SocketAddr,
}

/// Shared log of everything a [`MemorySink`] transmitted.
pub type SentLog = Arc<Mutex<Vec<SentDatagram>>>;

/// In-memory sink that records outbound datagrams instead of hitting the
/// network. The backbone of the integration tests.
pub struct MemorySink {
    log: SentLog,
}

impl MemorySink {
    pub fn new() -> (Self, SentLog) {
        let log: SentLog = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                log: Arc::clone(&log),
            },
            log,
        )
    }
}

impl DatagramSink for MemorySink {
    fn send(&mut self, id: SendId, packet: &PacketBuffer, remote: SocketAddr) -> io::Result<()> {
        self.log.lock().push(SentDatagram {
            id,
            label: packet.label(),
            payload: packet.data().to_vec(),
            remote,
        });
        Ok(())
    }
}

/// Construct an endpoint over a fresh [`MemorySink`].
pub fn memory_endpoint(local_addr: SocketAddr) -> (Endpoint, SentLog) {
    let (sink, log) = MemorySink::new();
    (Endpoint::new(local_addr, Box::new(sink)), log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 4433)
    }

    #[test]
    fn drain_completes_when_pending_reaches_zero() {
        let (mut endpoint, log) = memory_endpoint(addr());
        let packet = PacketBuffer::from_vec("retry", vec![0xab]);
        endpoint.submit(1, &packet, addr()).unwrap();
        endpoint.submit(2, &packet, addr()).unwrap();
        assert!(endpoint.has_pending_callbacks());

        assert!(!endpoint.begin_drain());
        assert!(!endpoint.complete());
        assert!(endpoint.complete());
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn drain_of_idle_endpoint_is_immediate() {
        let (mut endpoint, _log) = memory_endpoint(addr());
        assert!(endpoint.begin_drain());
    }
}
