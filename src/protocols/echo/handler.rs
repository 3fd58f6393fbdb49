//! Echo connection handlers.
//!
//! Two ways to run the same [`FrameDecoder`] over a connection:
//! - [`serve_blocking`]: owns the stream and blocks the calling thread
//!   until the peer goes away. For the thread-per-connection runtime.
//! - [`EchoSession`]: keeps per-connection state between readiness events
//!   and never blocks. For the event loop and the async runtime.

use crate::protocols::echo::parser::{FrameDecoder, Progress, HEADER_SIZE};
use crate::runtime::{BlockingReader, ChunkedBuffer};
use std::io::{self, Read, Write};
use tracing::trace;

/// Receives each complete message before it is echoed.
///
/// The payload may be modified in place; whatever it holds afterwards is
/// what goes back to the peer.
pub trait MessageHandler {
    fn handle(&mut self, payload: &mut [u8]);
}

/// Handler that leaves every payload untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

impl MessageHandler for Echo {
    fn handle(&mut self, _payload: &mut [u8]) {}
}

impl<F: FnMut(&mut [u8])> MessageHandler for F {
    fn handle(&mut self, payload: &mut [u8]) {
        self(payload)
    }
}

/// Whether a session can keep going after a readiness event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Stream is still open; wait for the next event.
    Open,
    /// Peer closed the stream; drop the session.
    Closed,
}

/// Serve one connection until the peer closes it.
///
/// Returns `Ok(())` when the peer closes, whether at a frame boundary or
/// mid-frame (a partial frame is discarded). Protocol violations surface as
/// `InvalidData` errors, nothing is echoed for the offending frame.
pub fn serve_blocking<S, H>(
    stream: S,
    handler: &mut H,
    max_payload: usize,
    chunk_size: usize,
) -> io::Result<()>
where
    S: Read + Write,
    H: MessageHandler + ?Sized,
{
    let mut reader = BlockingReader::with_buffer(stream, ChunkedBuffer::with_chunk_size(chunk_size));
    let mut decoder = FrameDecoder::new(max_payload);
    let mut message = decoder.message_buffer();

    loop {
        match decoder.decode(reader.buffer_mut(), &mut message)? {
            Progress::NeedMore(needed) => {
                if !reader.fill(needed)? {
                    trace!("Connection closed by peer");
                    return Ok(());
                }
            }
            Progress::Frame(len) => {
                handler.handle(&mut message[HEADER_SIZE..HEADER_SIZE + len]);
                write_frame(reader.get_mut(), &message[..HEADER_SIZE + len])?;
            }
        }
    }
}

/// Write a whole frame with a single `write` call.
///
/// There is no write-side buffering, so a short write is reported as
/// `WriteZero` and a `WouldBlock` is returned as is; either ends the
/// connection.
pub fn write_frame<W: Write + ?Sized>(out: &mut W, frame: &[u8]) -> io::Result<()> {
    let written = loop {
        match out.write(frame) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            result => break result?,
        }
    };

    if written != frame.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("short write: {written} of {} bytes", frame.len()),
        ));
    }
    Ok(())
}

/// Per-connection state for readiness-driven I/O.
///
/// Holds the receive buffer, the decoder state and the message buffer across
/// events, since one event may carry less than a frame or several frames.
#[derive(Debug)]
pub struct EchoSession<H = Echo> {
    buffer: ChunkedBuffer,
    decoder: FrameDecoder,
    message: Vec<u8>,
    handler: H,
}

impl<H: MessageHandler> EchoSession<H> {
    /// Create a session with an empty buffer.
    pub fn new(handler: H, max_payload: usize, chunk_size: usize) -> Self {
        let decoder = FrameDecoder::new(max_payload);
        Self {
            buffer: ChunkedBuffer::with_chunk_size(chunk_size),
            message: decoder.message_buffer(),
            decoder,
            handler,
        }
    }

    /// Handle a readable event on a non-blocking stream.
    ///
    /// Drains everything the stream has, then echoes every complete frame.
    /// Frames that completed before an end-of-file are still echoed.
    pub fn on_readable<S: Read + Write + ?Sized>(&mut self, stream: &mut S) -> io::Result<Liveness> {
        let liveness = self.drain(stream)?;
        self.process(stream)?;
        Ok(liveness)
    }

    /// Read from `stream` until it has nothing more to give right now.
    ///
    /// Only `WouldBlock` or end-of-file stop the loop. A short read is not
    /// enough: the peer's last bytes and its FIN can be queued together, and
    /// with edge-triggered notification no later event reports the EOF.
    pub fn drain<R: Read + ?Sized>(&mut self, stream: &mut R) -> io::Result<Liveness> {
        loop {
            match stream.read(self.buffer.reserve_write_space()) {
                Ok(0) => return Ok(Liveness::Closed),
                Ok(n) => self.buffer.commit_write(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Liveness::Open),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Echo every frame that is complete in the buffer.
    ///
    /// Returns the number of frames echoed.
    pub fn process<W: Write + ?Sized>(&mut self, out: &mut W) -> io::Result<usize> {
        let mut echoed = 0;

        while let Progress::Frame(len) = self.decoder.decode(&mut self.buffer, &mut self.message)? {
            self.handler.handle(&mut self.message[HEADER_SIZE..HEADER_SIZE + len]);
            write_frame(out, &self.message[..HEADER_SIZE + len])?;
            echoed += 1;
        }

        if echoed > 0 {
            trace!(frames = echoed, buffered = self.buffer.available(), "Echoed frames");
        }
        Ok(echoed)
    }

    /// Receive buffer, for drivers that read into it themselves.
    pub fn buffer_mut(&mut self) -> &mut ChunkedBuffer {
        &mut self.buffer
    }

    /// Number of received bytes not yet consumed by the decoder.
    pub fn buffered(&self) -> usize {
        self.buffer.available()
    }

    /// Get the message handler.
    #[cfg(test)]
    pub fn handler(&self) -> &H {
        &self.handler
    }
}
