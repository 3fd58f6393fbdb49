//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//!
//! mio registrations are edge-triggered: a socket is reported once per
//! not-ready to ready transition. Every readable event therefore drains the
//! socket until `WouldBlock` or end-of-file, and the listener accepts until
//! `WouldBlock`. Stopping early would leave data, or a FIN, that no later
//! event announces.
//!
//! Responses are written inline with the read that completed them; there is
//! no write interest and no output queue. A write that would block or that
//! only takes part of a frame closes the connection, even if some of the
//! frame already went out. A client that keeps sending without reading its
//! echoes fills the socket's send buffer and is disconnected.

use crate::protocols::echo::Liveness;
use crate::runtime::{Connection, ConnectionRegistry, ConnectionSettings};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Registry, Token};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, error, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Number of events fetched per `poll` call.
const EVENTS_CAPACITY: usize = 1024;

/// Single-threaded echo server over one mio `Poll`.
pub struct EventLoop {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    connections: ConnectionRegistry,
    settings: ConnectionSettings,
}

impl EventLoop {
    /// Register `listener` with a new poll instance.
    pub fn new(
        listener: std::net::TcpListener,
        settings: ConnectionSettings,
        max_connections: usize,
    ) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        let mut listener = TcpListener::from_std(listener);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            listener,
            connections: ConnectionRegistry::new(max_connections),
            settings,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run forever. Returns only if polling fails.
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            self.turn(None)?;
        }
    }

    /// Wait for events (up to `timeout`) and handle all of them.
    pub fn turn(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        let Self {
            poll,
            events,
            listener,
            connections,
            settings,
        } = self;

        match poll.poll(events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => {
                    accept_connections(listener, poll.registry(), connections, settings);
                }
                Token(conn_id) => {
                    handle_readable(conn_id, poll.registry(), connections);
                }
            }
        }

        Ok(())
    }

    /// Number of open connections.
    #[cfg(test)]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

fn accept_connections(
    listener: &TcpListener,
    registry: &Registry,
    connections: &mut ConnectionRegistry,
    settings: &ConnectionSettings,
) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                if settings.nodelay {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                    }
                }

                let conn_id =
                    match connections.insert_with(|_| Connection::new(stream, peer, settings)) {
                        Some(id) => id,
                        None => {
                            warn!(
                                peer = %peer,
                                max_connections = connections.capacity(),
                                "Connection limit reached, rejecting connection"
                            );
                            continue;
                        }
                    };

                // Re-borrow after insert
                let Some(conn) = connections.get_mut(conn_id) else {
                    continue;
                };
                if let Err(e) = registry.register(&mut conn.stream, Token(conn_id), Interest::READABLE)
                {
                    error!(peer = %peer, error = %e, "Failed to register connection");
                    connections.remove(conn_id);
                    continue;
                }

                debug!(
                    conn_id,
                    peer = %peer,
                    open = connections.len(),
                    "Accepted connection"
                );
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(error = %e, "Accept error");
                break;
            }
        }
    }
}

fn handle_readable(conn_id: usize, registry: &Registry, connections: &mut ConnectionRegistry) {
    // Events for a connection closed earlier in this batch
    let Some(conn) = connections.get_mut(conn_id) else {
        return;
    };

    match conn.on_readable() {
        Ok(Liveness::Open) => {}
        Ok(Liveness::Closed) => close_connection(registry, connections, conn_id, "closed by peer"),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            warn!(conn_id, peer = %conn.peer, error = %e, "Protocol error");
            close_connection(registry, connections, conn_id, "protocol error");
        }
        Err(e) => {
            debug!(conn_id, peer = %conn.peer, error = %e, "Connection error");
            close_connection(registry, connections, conn_id, "I/O error");
        }
    }
}

fn close_connection(
    registry: &Registry,
    connections: &mut ConnectionRegistry,
    conn_id: usize,
    reason: &str,
) {
    if let Some(mut conn) = connections.remove(conn_id) {
        let _ = registry.deregister(&mut conn.stream);
        debug!(
            conn_id,
            peer = %conn.peer,
            discarded = conn.buffered(),
            reason,
            "Connection closed"
        );
    }
}
