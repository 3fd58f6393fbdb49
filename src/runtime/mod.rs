//! Runtimes that drive echo connections.
//!
//! Three interchangeable concurrency models share one buffering and framing
//! core:
//! - `threaded`: one blocking thread per connection
//! - `mio_impl`: single-threaded, edge-triggered readiness loop
//!   (epoll on Linux, kqueue on macOS)
//! - `tokio_impl`: one async task per connection
//!
//! Shared pieces:
//! - `ChunkedBuffer`: per-connection FIFO receive buffer
//! - `BlockingReader`: exact-length reads for blocking streams
//! - `ConnectionRegistry`: slab of event-loop connections keyed by token

mod buffer;
mod connection;
mod mio_impl;
mod reader;
mod threaded;
mod tokio_impl;

pub use buffer::{ChunkedBuffer, CHUNK_SIZE};
pub use reader::BlockingReader;
pub(crate) use connection::{Connection, ConnectionRegistry};

use crate::config::{Config, RuntimeType};
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};

/// Per-connection settings every runtime hands to the echo core.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    /// Largest accepted payload.
    pub max_payload: usize,
    /// Receive buffer chunk capacity.
    pub chunk_size: usize,
    /// Set `TCP_NODELAY` on accepted streams.
    pub nodelay: bool,
}

impl ConnectionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_payload: config.max_message_size,
            chunk_size: config.chunk_size,
            nodelay: config.nodelay,
        }
    }
}

/// Run the server with the configured runtime. Only returns on error.
pub fn run(config: Config) -> io::Result<()> {
    let addr = resolve(&config.listen)?;
    let settings = ConnectionSettings::from_config(&config);

    match config.runtime {
        RuntimeType::Threaded => {
            let listener = bind_listener(addr, config.backlog, false)?;
            threaded::run(listener, settings)
        }
        RuntimeType::Mio => {
            let listener = bind_listener(addr, config.backlog, true)?;
            mio_impl::run(listener, settings, config.max_connections)
        }
        RuntimeType::Tokio => {
            let listener = bind_listener(addr, config.backlog, true)?;
            tokio_impl::run(listener, settings)
        }
    }
}

/// Resolve a `host:port` string to the first matching address.
pub fn resolve(listen: &str) -> io::Result<SocketAddr> {
    listen.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no address found for '{listen}'"),
        )
    })
}

/// Create a bound, listening TCP socket with `SO_REUSEADDR`.
pub fn bind_listener(addr: SocketAddr, backlog: i32, nonblocking: bool) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(nonblocking)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        let addr = resolve("127.0.0.1:54321").unwrap();
        assert_eq!(addr.port(), 54321);
        assert!(resolve("not an address").is_err());
    }

    #[test]
    fn test_bind_listener_ephemeral_port() {
        let listener = bind_listener(resolve("127.0.0.1:0").unwrap(), 16, false).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}

/// Loopback checks shared by every runtime's tests.
#[cfg(test)]
pub(crate) mod test_support {
    use super::ConnectionSettings;
    use crate::protocols::echo::parser::{encode_frame, encode_length};
    use crate::protocols::echo::DEFAULT_MAX_MESSAGE_SIZE;
    use std::io::{self, Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::thread;
    use std::time::Duration;

    pub const TEST_SETTINGS: ConnectionSettings = ConnectionSettings {
        max_payload: DEFAULT_MAX_MESSAGE_SIZE,
        chunk_size: 512,
        nodelay: true,
    };

    /// `[4]["ABCD"]`
    pub const SCENARIO: [u8; 8] = [0x04, 0x00, 0x00, 0x00, 0x41, 0x42, 0x43, 0x44];

    pub fn connect(addr: SocketAddr) -> TcpStream {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream.set_nodelay(true).unwrap();
        stream
    }

    pub fn round_trip(stream: &mut TcpStream, payload: &[u8]) {
        let frame = encode_frame(payload);
        stream.write_all(&frame).unwrap();

        let mut echoed = vec![0u8; frame.len()];
        stream.read_exact(&mut echoed).unwrap();
        assert_eq!(echoed, frame);
    }

    pub fn assert_closed(stream: &mut TcpStream) {
        let mut byte = [0u8; 1];
        match stream.read(&mut byte) {
            Ok(0) => {}
            Ok(n) => panic!("expected close, read {n} bytes"),
            Err(e) => assert!(
                matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
                ),
                "expected close, got {e}"
            ),
        }
    }

    pub fn check_echo(addr: SocketAddr) {
        let mut stream = connect(addr);

        // Header split across two deliveries
        stream.write_all(&SCENARIO[..3]).unwrap();
        thread::sleep(Duration::from_millis(20));
        stream.write_all(&SCENARIO[3..]).unwrap();
        let mut echoed = [0u8; 8];
        stream.read_exact(&mut echoed).unwrap();
        assert_eq!(echoed, SCENARIO);

        round_trip(&mut stream, b"");

        // Two frames in one write
        let mut both = encode_frame(b"hello").to_vec();
        both.extend_from_slice(&encode_frame(b"world!"));
        stream.write_all(&both).unwrap();
        let mut echoed = vec![0u8; both.len()];
        stream.read_exact(&mut echoed).unwrap();
        assert_eq!(echoed, both);

        // Spans several receive chunks
        let large: Vec<u8> = (0..DEFAULT_MAX_MESSAGE_SIZE).map(|i| i as u8).collect();
        round_trip(&mut stream, &large);
    }

    pub fn check_oversized_closes(addr: SocketAddr) {
        let mut stream = connect(addr);
        stream.write_all(&encode_length(5000)).unwrap();
        assert_closed(&mut stream);
    }

    pub fn check_independent_connections(addr: SocketAddr) {
        let mut a = connect(addr);
        let mut b = connect(addr);

        // Half a frame on `a` must not hold up `b`
        a.write_all(&encode_length(6)).unwrap();
        a.write_all(b"abc").unwrap();
        round_trip(&mut b, b"from b");

        a.write_all(b"def").unwrap();
        let mut echoed = [0u8; 10];
        a.read_exact(&mut echoed).unwrap();
        assert_eq!(&echoed[..4], &encode_length(6));
        assert_eq!(&echoed[4..], b"abcdef");

        drop(b);
        round_trip(&mut a, b"still open");
    }
}
