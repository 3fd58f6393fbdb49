//! Blocking "read exactly N bytes" adapter over a [`ChunkedBuffer`].
//!
//! Reads from the underlying stream in chunk-sized pieces and hands bytes
//! out in whatever sizes the caller asks for. Intended for the
//! thread-per-connection runtime and for clients: every call may park the
//! calling thread until the stream delivers enough data.

#![allow(dead_code)] // Accessors are only read by tests

use crate::runtime::buffer::ChunkedBuffer;
use std::io::{self, Read};

/// Buffered blocking reader with exact-length reads.
#[derive(Debug)]
pub struct BlockingReader<R> {
    inner: R,
    buffer: ChunkedBuffer,
}

impl<R: Read> BlockingReader<R> {
    /// Wrap `inner` with a default-sized buffer.
    pub fn new(inner: R) -> Self {
        Self::with_buffer(inner, ChunkedBuffer::new())
    }

    /// Wrap `inner` with a caller-provided buffer.
    pub fn with_buffer(inner: R, buffer: ChunkedBuffer) -> Self {
        Self { inner, buffer }
    }

    /// Read exactly `destination.len()` bytes.
    ///
    /// Returns `Ok(destination.len())` once the bytes are copied, `Ok(0)` if
    /// the stream hit end-of-file first, or the stream's error. On EOF or
    /// error nothing is copied; bytes already buffered stay buffered.
    ///
    /// A zero-length destination returns `Ok(0)` without touching the stream.
    pub fn read(&mut self, destination: &mut [u8]) -> io::Result<usize> {
        if !self.fill(destination.len())? {
            return Ok(0);
        }

        let copied = self.buffer.read(destination);
        debug_assert_eq!(copied, destination.len());
        Ok(copied)
    }

    /// Block until at least `length` bytes are buffered.
    ///
    /// Returns `Ok(false)` if the stream reached end-of-file before that.
    pub fn fill(&mut self, length: usize) -> io::Result<bool> {
        while self.buffer.available() < length {
            match self.buffer.fill_from(&mut self.inner) {
                Ok(0) => return Ok(false),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Get a reference to the underlying stream.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Get a mutable reference to the underlying stream.
    ///
    /// Reading from it directly bypasses the buffer.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Get the internal buffer.
    pub fn buffer(&self) -> &ChunkedBuffer {
        &self.buffer
    }

    /// Get the internal buffer mutably.
    pub fn buffer_mut(&mut self) -> &mut ChunkedBuffer {
        &mut self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Delivers a fixed script of reads, one entry per call.
    struct Scripted {
        reads: Vec<io::Result<Vec<u8>>>,
        calls: usize,
    }

    impl Scripted {
        fn new(reads: Vec<io::Result<Vec<u8>>>) -> Self {
            Self { reads, calls: 0 }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.calls += 1;
            if self.reads.is_empty() {
                return Ok(0);
            }
            match self.reads.remove(0) {
                Ok(data) => {
                    assert!(data.len() <= buf.len(), "script entry larger than read space");
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Err(e) => Err(e),
            }
        }
    }

    #[test]
    fn test_read_exact_across_fragments() {
        let source = Scripted::new(vec![Ok(b"ab".to_vec()), Ok(b"c".to_vec()), Ok(b"def".to_vec())]);
        let mut reader = BlockingReader::new(source);

        let mut out = [0u8; 4];
        assert_eq!(reader.read(&mut out).unwrap(), 4);
        assert_eq!(&out, b"abcd");
        assert_eq!(reader.get_ref().calls, 3);

        // Remainder is already buffered: no further reads needed
        let mut out = [0u8; 2];
        assert_eq!(reader.read(&mut out).unwrap(), 2);
        assert_eq!(&out, b"ef");
        assert_eq!(reader.get_ref().calls, 3);
    }

    #[test]
    fn test_eof_before_satisfied() {
        let source = Scripted::new(vec![Ok(b"abc".to_vec())]);
        let mut reader = BlockingReader::new(source);

        let mut out = [0u8; 4];
        assert_eq!(reader.read(&mut out).unwrap(), 0);
        assert_eq!(out, [0u8; 4]);
        // Partial bytes stay buffered, never handed out short
        assert_eq!(reader.buffer().available(), 3);
    }

    #[test]
    fn test_error_propagates() {
        let source = Scripted::new(vec![
            Ok(b"a".to_vec()),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let mut reader = BlockingReader::new(source);

        let mut out = [0u8; 4];
        let err = reader.read(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn test_interrupted_is_retried() {
        let source = Scripted::new(vec![
            Err(io::Error::new(io::ErrorKind::Interrupted, "signal")),
            Ok(b"xy".to_vec()),
        ]);
        let mut reader = BlockingReader::new(source);

        let mut out = [0u8; 2];
        assert_eq!(reader.read(&mut out).unwrap(), 2);
        assert_eq!(&out, b"xy");
    }

    #[test]
    fn test_zero_length_read_skips_io() {
        let source = Scripted::new(vec![]);
        let mut reader = BlockingReader::new(source);

        assert_eq!(reader.read(&mut []).unwrap(), 0);
        assert_eq!(reader.get_ref().calls, 0);
    }

    #[test]
    fn test_read_spanning_many_chunks() {
        let data: Vec<u8> = (0..100u8).collect();
        let mut reader = BlockingReader::with_buffer(&data[..], ChunkedBuffer::with_chunk_size(7));

        let mut out = vec![0u8; 100];
        assert_eq!(reader.read(&mut out).unwrap(), 100);
        assert_eq!(out, data);
        assert_eq!(reader.buffer().available(), 0);
    }
}
