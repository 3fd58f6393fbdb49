//! mio-based event loop implementation.
//!
//! Readiness-based I/O using mio (epoll on Linux, kqueue on macOS).
//! One thread owns every connection; all work for an event runs to
//! completion before the next `poll`.
//!
//! Echoes are written without buffering or write interest. When the socket
//! cannot take a whole frame at once (`WouldBlock` or a short write) the
//! connection is closed, so peers must read their echoes as they go.

mod event_loop;

pub use event_loop::EventLoop;

use crate::runtime::ConnectionSettings;
use std::net::TcpListener;
use tracing::info;

/// Run the server using the mio backend on the calling thread.
pub fn run(
    listener: TcpListener,
    settings: ConnectionSettings,
    max_connections: usize,
) -> std::io::Result<()> {
    let mut event_loop = EventLoop::new(listener, settings, max_connections)?;
    info!(
        addr = %event_loop.local_addr()?,
        max_connections,
        max_payload = settings.max_payload,
        chunk_size = settings.chunk_size,
        "Starting mio runtime"
    );
    event_loop.run()
}
