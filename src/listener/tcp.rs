//! TCP connection ingestion.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::PipelineContext;
use crate::pattern::INSPECTION_WINDOW;

/// How long a connection may take to produce its first bytes. Expiry is a
/// normal outcome: the connection closes without a match.
const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Accepts connections until shutdown, handling each in its own task.
pub(super) async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<PipelineContext>,
    mut shutdown: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let ctx = Arc::clone(&ctx);
                    tokio::spawn(handle_connection(stream, peer, ctx));
                }
                Err(e) => {
                    // Transient accept failures (aborted handshakes, fd
                    // pressure) drop that connection only.
                    warn!("TCP accept error: {}", e);
                }
            }
        }
    }
    debug!("TCP accept loop exited");
}

/// Reads at most one inspection window from the connection and runs it
/// through the pipeline. The stream is dropped, and therefore closed, on
/// every exit path.
async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, ctx: Arc<PipelineContext>) {
    let mut buf = vec![0u8; INSPECTION_WINDOW];
    let len = match timeout(READ_TIMEOUT, stream.read(&mut buf)).await {
        Ok(Ok(len)) => len,
        Ok(Err(e)) => {
            debug!("TCP read error from {}: {}", peer, e);
            0
        }
        // Nothing arrived within the window.
        Err(_) => 0,
    };

    if len > 0 {
        ctx.process(&buf[..len], peer.ip());
    }
}
