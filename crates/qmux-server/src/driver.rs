use crate::endpoint::{DatagramSink, Endpoint, EndpointId, SendId};
use crate::session::SecureContext;
use crate::socket::{ListenError, QuicSocket};
use qmux_core::{PacketBuffer, MAX_PACKET_SIZE};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("listen failed: {0}")]
    Listen(#[from] ListenError),
    #[error("driver task has shut down")]
    Closed,
}

enum Command {
    Listen {
        secure_ctx: Arc<dyn SecureContext>,
        preferred_address: Option<SocketAddr>,
        alpn: String,
        options: u32,
        reply: oneshot::Sender<Result<(), ListenError>>,
    },
    SetServerBusy(bool),
    Stats(oneshot::Sender<[u64; 11]>),
    Destroy,
}

/// Sink that transmits through a shared tokio UDP socket.
///
/// `try_send_to` completes synchronously, so the completion is reported
/// straight back through the channel and buffer ownership is released on
/// the driver task's next turn, the same path a truly asynchronous UDP
/// layer would use.
struct UdpSink {
    socket: Arc<UdpSocket>,
    completions: mpsc::UnboundedSender<(SendId, io::Result<()>)>,
}

impl DatagramSink for UdpSink {
    fn send(&mut self, id: SendId, packet: &PacketBuffer, remote: SocketAddr) -> io::Result<()> {
        self.socket.try_send_to(packet.data(), remote)?;
        let _ = self.completions.send((id, Ok(())));
        Ok(())
    }
}

/// Runs a [`QuicSocket`] on one task over one bound UDP socket.
///
/// The socket core is single-writer by design; the driver realizes that
/// contract on tokio by owning the core inside its task and accepting
/// host operations over a command channel.
pub struct UdpDriver {
    commands: mpsc::Sender<Command>,
    local_addr: SocketAddr,
}

impl UdpDriver {
    /// Bind `addr`, attach the bound socket to the core as its preferred
    /// endpoint, and start the drive loop.
    pub async fn launch(addr: SocketAddr, mut socket: QuicSocket) -> Result<Self, DriverError> {
        let udp = Arc::new(UdpSocket::bind(addr).await?);
        let local_addr = udp.local_addr()?;
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let endpoint = Endpoint::new(
            local_addr,
            Box::new(UdpSink {
                socket: Arc::clone(&udp),
                completions: completion_tx,
            }),
        );
        let endpoint_id = socket.add_endpoint(endpoint, true);
        let (command_tx, command_rx) = mpsc::channel(16);
        tokio::spawn(run(
            udp,
            socket,
            endpoint_id,
            local_addr,
            completion_rx,
            command_rx,
        ));
        debug!(target: "qmux::driver", %local_addr, "driver launched");
        Ok(Self {
            commands: command_tx,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn listen(
        &self,
        secure_ctx: Arc<dyn SecureContext>,
        preferred_address: Option<SocketAddr>,
        alpn: impl Into<String>,
        options: u32,
    ) -> Result<(), DriverError> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Command::Listen {
                secure_ctx,
                preferred_address,
                alpn: alpn.into(),
                options,
                reply,
            })
            .await
            .map_err(|_| DriverError::Closed)?;
        outcome.await.map_err(|_| DriverError::Closed)??;
        Ok(())
    }

    pub async fn set_server_busy(&self, busy: bool) -> Result<(), DriverError> {
        self.commands
            .send(Command::SetServerBusy(busy))
            .await
            .map_err(|_| DriverError::Closed)
    }

    pub async fn stats(&self) -> Result<[u64; 11], DriverError> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Command::Stats(reply))
            .await
            .map_err(|_| DriverError::Closed)?;
        outcome.await.map_err(|_| DriverError::Closed)
    }

    /// Destroy the core and stop the drive loop.
    pub async fn destroy(self) -> Result<(), DriverError> {
        self.commands
            .send(Command::Destroy)
            .await
            .map_err(|_| DriverError::Closed)
    }
}

async fn run(
    udp: Arc<UdpSocket>,
    mut socket: QuicSocket,
    endpoint_id: EndpointId,
    local_addr: SocketAddr,
    mut completions: mpsc::UnboundedReceiver<(SendId, io::Result<()>)>,
    mut commands: mpsc::Receiver<Command>,
) {
    let mut buf = vec![0u8; MAX_PACKET_SIZE];
    loop {
        tokio::select! {
            received = udp.recv_from(&mut buf) => match received {
                Ok((len, remote)) => socket.on_receive(&buf[..len], local_addr, remote),
                Err(err) => socket.on_endpoint_error(endpoint_id, &err),
            },
            Some((id, status)) = completions.recv() => socket.on_send_done(id, status),
            command = commands.recv() => match command {
                Some(Command::Listen { secure_ctx, preferred_address, alpn, options, reply }) => {
                    let _ = reply.send(socket.listen(secure_ctx, preferred_address, alpn, options));
                }
                Some(Command::SetServerBusy(busy)) => socket.set_server_busy(busy),
                Some(Command::Stats(reply)) => {
                    let _ = reply.send(socket.stats_snapshot());
                }
                Some(Command::Destroy) | None => {
                    socket.destroy();
                    break;
                }
            },
        }
    }
    debug!(target: "qmux::driver", "drive loop finished");
}
