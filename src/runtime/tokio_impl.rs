//! Tokio runtime: one async task per connection.
//!
//! Each task owns an [`EchoSession`] and reads straight into the session's
//! receive buffer, so the framing path is the same one the mio event loop
//! uses; only the waiting is done by tokio instead of a hand-written loop.

use crate::protocols::echo::{Echo, EchoSession};
use crate::runtime::ConnectionSettings;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace, warn};

/// Run the server on a multi-threaded tokio runtime.
///
/// `listener` must already be in non-blocking mode.
pub fn run(listener: std::net::TcpListener, settings: ConnectionSettings) -> io::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(serve(listener, settings))
}

async fn serve(listener: std::net::TcpListener, settings: ConnectionSettings) -> io::Result<()> {
    let listener = TcpListener::from_std(listener)?;
    info!(
        addr = %listener.local_addr()?,
        max_payload = settings.max_payload,
        chunk_size = settings.chunk_size,
        "Starting tokio runtime"
    );

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                if settings.nodelay {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                    }
                }

                tokio::spawn(async move {
                    debug!(peer = %peer, "Accepted connection");

                    match handle_connection(stream, settings).await {
                        Ok(()) => debug!(peer = %peer, "Connection closed"),
                        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                            warn!(peer = %peer, error = %e, "Protocol error");
                        }
                        Err(e) => debug!(peer = %peer, error = %e, "Connection error"),
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}

/// Echo frames on `stream` until the peer closes it.
pub async fn handle_connection<S>(mut stream: S, settings: ConnectionSettings) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = EchoSession::new(Echo, settings.max_payload, settings.chunk_size);
    let mut out = Vec::new();

    loop {
        let n = stream
            .read(session.buffer_mut().reserve_write_space())
            .await?;
        if n == 0 {
            trace!(discarded = session.buffered(), "Connection closed by peer");
            return Ok(());
        }
        session.buffer_mut().commit_write(n);

        session.process(&mut out)?;
        if !out.is_empty() {
            stream.write_all(&out).await?;
            out.clear();
        }
    }
}
