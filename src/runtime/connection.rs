//! Event-loop connection state and the registry that owns it.
//!
//! Each connection owns its stream and its echo session (receive buffer plus
//! decoder state). Connections live in a slab so the event loop can map a
//! readiness token straight back to the connection, and dropping the slab
//! entry releases everything the connection held.

use crate::protocols::echo::{Echo, EchoSession, Liveness};
use crate::runtime::ConnectionSettings;
use mio::net::TcpStream;
use slab::Slab;
use std::io;
use std::net::SocketAddr;

/// A single client connection driven by readiness events.
#[derive(Debug)]
pub struct Connection {
    /// Non-blocking socket.
    pub stream: TcpStream,
    /// Remote address, for logging.
    pub peer: SocketAddr,
    /// Buffered input and framing state.
    session: EchoSession<Echo>,
}

impl Connection {
    /// Create a connection with an empty session.
    pub fn new(stream: TcpStream, peer: SocketAddr, settings: &ConnectionSettings) -> Self {
        Self {
            stream,
            peer,
            session: EchoSession::new(Echo, settings.max_payload, settings.chunk_size),
        }
    }

    /// Drain the socket and echo every complete frame.
    pub fn on_readable(&mut self) -> io::Result<Liveness> {
        self.session.on_readable(&mut self.stream)
    }

    /// Bytes received but not yet part of a complete frame.
    pub fn buffered(&self) -> usize {
        self.session.buffered()
    }
}

/// Registry of active connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations. The slab key is the
/// connection's readiness token.
pub struct ConnectionRegistry<C = Connection> {
    connections: Slab<C>,
    max_connections: usize,
}

impl<C> ConnectionRegistry<C> {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Check whether another connection can be admitted.
    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    /// Reserve a slot and build the connection with its key.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn insert_with(&mut self, build: impl FnOnce(usize) -> C) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        let entry = self.connections.vacant_entry();
        let id = entry.key();
        entry.insert(build(id));
        Some(id)
    }

    /// Get a mutable reference to a connection.
    pub fn get_mut(&mut self, id: usize) -> Option<&mut C> {
        self.connections.get_mut(id)
    }

    /// Remove a connection from the registry.
    pub fn remove(&mut self, id: usize) -> Option<C> {
        self.connections.try_remove(id)
    }

    /// Check if a connection exists.
    #[cfg(test)]
    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Maximum number of connections allowed.
    pub fn capacity(&self) -> usize {
        self.max_connections
    }
}
