//! UDP datagram ingestion.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::debug;

use super::PipelineContext;

/// Largest datagram pulled off the socket. Inspection is still capped by
/// the matcher's window; the larger buffer only avoids truncating the
/// receive call itself.
const RECV_BUFFER: usize = 65_535;

/// Opens one connectionless socket bound to the port on all interfaces,
/// with address reuse enabled. When a multicast group is given it is
/// joined receive-only; unicast traffic to the bound port still arrives.
pub(super) fn bind(port: u16, multicast_group: Option<Ipv4Addr>) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .context("failed to create UDP socket")?;
    socket
        .set_reuse_address(true)
        .context("failed to enable address reuse")?;
    socket
        .set_nonblocking(true)
        .context("failed to set UDP socket non-blocking")?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    socket
        .bind(&addr.into())
        .with_context(|| format!("failed to bind UDP port {}", port))?;

    if let Some(group) = multicast_group {
        socket
            .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
            .with_context(|| format!("failed to join multicast group {}", group))?;
    }

    UdpSocket::from_std(socket.into()).context("failed to register UDP socket with the runtime")
}

/// Receives datagrams one at a time and runs each through the pipeline.
/// Per-datagram errors are routine noise, never fatal.
pub(super) async fn recv_loop(
    socket: UdpSocket,
    ctx: Arc<PipelineContext>,
    mut shutdown: mpsc::Receiver<()>,
) {
    let mut buf = vec![0u8; RECV_BUFFER];
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, peer)) => {
                    ctx.process(&buf[..len], peer.ip());
                }
                Err(e) => {
                    debug!("UDP receive error: {}", e);
                }
            }
        }
    }
    debug!("UDP receive loop exited");
}
