//! Minimal demultiplexer wiring: bind a UDP socket, accept sessions, and
//! log what arrives. Drive it with any QUIC client (or `driver.rs`-style
//! probe) pointed at the printed address.

use anyhow::Result;
use qmux_server::{
    QuicSocket, SecureContext, ServerSessionFactory, Session, SessionParams, SocketConfig,
    UdpDriver, VALIDATE_ADDRESS,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
struct DevContext;

impl SecureContext for DevContext {}

struct LoggingSession {
    remote: SocketAddr,
}

impl Session for LoggingSession {
    fn deliver(&self, datagram: &[u8], _local: SocketAddr, remote: SocketAddr) -> bool {
        info!(len = datagram.len(), %remote, "session datagram");
        remote == self.remote
    }
}

struct LoggingFactory;

impl ServerSessionFactory for LoggingFactory {
    fn create(&self, params: SessionParams) -> Arc<dyn Session> {
        info!(
            cid = %params.server_cid,
            remote = %params.remote,
            refused = params.initial_close.is_some(),
            "session created"
        );
        Arc::new(LoggingSession {
            remote: params.remote,
        })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qmux=debug".into()),
        )
        .init();

    let config = SocketConfig::default().with_options(VALIDATE_ADDRESS);
    let socket = QuicSocket::new(config, Arc::new(LoggingFactory))?;
    let driver = UdpDriver::launch("127.0.0.1:0".parse()?, socket).await?;
    driver.listen(Arc::new(DevContext), None, "h3", 0).await?;
    info!(addr = %driver.local_addr(), "demultiplexer listening");

    tokio::signal::ctrl_c().await?;
    driver.destroy().await?;
    Ok(())
}
