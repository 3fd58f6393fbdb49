//! Thread-per-connection runtime.
//!
//! The accept loop hands each connection to its own detached thread, which
//! runs the blocking echo loop until the peer goes away. A connection's
//! buffer and decoder live on that thread's stack for its whole life, so
//! nothing is shared and nothing is locked.

use crate::protocols::echo::{serve_blocking, Echo};
use crate::runtime::ConnectionSettings;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::thread;
use tracing::{debug, error, info, warn};

/// Accept connections forever, one thread each.
pub fn run(listener: TcpListener, settings: ConnectionSettings) -> io::Result<()> {
    info!(
        addr = %listener.local_addr()?,
        max_payload = settings.max_payload,
        chunk_size = settings.chunk_size,
        "Starting threaded runtime"
    );

    let mut next_id: u64 = 0;
    for incoming in listener.incoming() {
        match incoming {
            Ok(stream) => {
                spawn_connection(next_id, stream, settings);
                next_id += 1;
            }
            Err(e) => {
                error!(error = %e, "Accept error");
            }
        }
    }

    Ok(())
}

fn spawn_connection(conn_id: u64, stream: TcpStream, settings: ConnectionSettings) {
    let peer = match stream.peer_addr() {
        Ok(peer) => peer,
        Err(e) => {
            debug!(conn_id, error = %e, "Connection gone before it was served");
            return;
        }
    };

    if settings.nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(conn_id, error = %e, "Failed to set TCP_NODELAY");
        }
    }

    // The JoinHandle is dropped: the thread runs detached
    let spawned = thread::Builder::new()
        .name(format!("conn-{conn_id}"))
        .spawn(move || {
            debug!(conn_id, peer = %peer, "Accepted connection");

            match serve_blocking(&stream, &mut Echo, settings.max_payload, settings.chunk_size) {
                Ok(()) => debug!(conn_id, peer = %peer, "Connection closed"),
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    warn!(conn_id, peer = %peer, error = %e, "Protocol error");
                }
                Err(e) => debug!(conn_id, peer = %peer, error = %e, "Connection error"),
            }
        });

    if let Err(e) = spawned {
        error!(conn_id, peer = %peer, error = %e, "Failed to spawn connection thread");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::test_support::{self, TEST_SETTINGS};
    use crate::runtime::{bind_listener, resolve};
    use std::net::SocketAddr;

    fn start() -> SocketAddr {
        let listener = bind_listener(resolve("127.0.0.1:0").unwrap(), 128, false).unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let _ = run(listener, TEST_SETTINGS);
        });
        addr
    }

    #[test]
    fn test_threaded_echo() {
        let addr = start();
        test_support::check_echo(addr);
    }

    #[test]
    fn test_threaded_oversized_frame_closes() {
        let addr = start();
        test_support::check_oversized_closes(addr);
    }

    #[test]
    fn test_threaded_connections_are_independent() {
        let addr = start();
        test_support::check_independent_connections(addr);
    }
}
