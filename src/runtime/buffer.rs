//! Growable FIFO byte buffer built from fixed-size chunks.
//!
//! Incoming bytes are written straight into chunk storage through
//! [`ChunkedBuffer::reserve_write_space`] and [`ChunkedBuffer::commit_write`],
//! so a socket read lands in the buffer without a trip through a stack
//! buffer. Consumers drain from the front with [`ChunkedBuffer::read`].
//!
//! ## Layout
//!
//! ```text
//!  front                               back
//! +-----------+-----------+-----------+
//! |  chunk 0  |  chunk 1  |  chunk 2  |
//! +-----------+-----------+-----------+
//!     ^ read_position         ^ write_position
//! ```
//!
//! Every chunk except the last is full, so the unread byte count is
//! `(chunks - 1) * chunk_size + write_position - read_position`.
//!
//! A drained chunk is freed unless it is the only one left, in which case
//! both cursors rewind to zero and the chunk is reused. No single allocation
//! is ever larger than one chunk.

#![allow(dead_code)] // Inspection methods are only read by tests

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read};

/// Default chunk capacity (one page on most systems).
pub const CHUNK_SIZE: usize = 4096;

/// FIFO byte buffer with a zero-copy write interface.
pub struct ChunkedBuffer {
    /// Chunk storage, oldest first. Never empty.
    chunks: VecDeque<Box<[u8]>>,
    /// Offset of the next unread byte in the first chunk.
    read_position: usize,
    /// Offset where the next incoming byte lands in the last chunk.
    write_position: usize,
    /// Capacity of every chunk.
    chunk_size: usize,
}

impl ChunkedBuffer {
    /// Create an empty buffer with [`CHUNK_SIZE`] chunks.
    pub fn new() -> Self {
        Self::with_chunk_size(CHUNK_SIZE)
    }

    /// Create an empty buffer with a custom chunk capacity.
    ///
    /// # Panics
    /// Panics if `chunk_size` is zero.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be non-zero");

        let mut chunks = VecDeque::with_capacity(1);
        chunks.push_back(new_chunk(chunk_size));

        Self {
            chunks,
            read_position: 0,
            write_position: 0,
            chunk_size,
        }
    }

    /// Get the writable region at the tail of the buffer.
    ///
    /// If the tail chunk is full a new chunk is appended first, so the
    /// returned slice is never empty. Bytes written into it become visible
    /// only after [`commit_write`](Self::commit_write).
    pub fn reserve_write_space(&mut self) -> &mut [u8] {
        if self.write_position == self.chunk_size {
            self.chunks.push_back(new_chunk(self.chunk_size));
            self.write_position = 0;
        }

        let tail = self.chunks.len() - 1;
        let start = self.write_position;
        &mut self.chunks[tail][start..]
    }

    /// Mark `length` bytes of the reserved region as written.
    ///
    /// # Panics
    /// Panics if `length` exceeds the space last handed out by
    /// [`reserve_write_space`](Self::reserve_write_space). That is a caller
    /// bug, not a recoverable condition.
    pub fn commit_write(&mut self, length: usize) {
        let remaining = self.chunk_size - self.write_position;
        assert!(
            length <= remaining,
            "commit of {length} bytes exceeds {remaining} bytes of reserved space"
        );
        self.write_position += length;
    }

    /// Perform one `read` call on `reader` directly into buffer storage.
    ///
    /// Returns the number of bytes read; `Ok(0)` means end of stream.
    pub fn fill_from<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<usize> {
        let n = reader.read(self.reserve_write_space())?;
        self.commit_write(n);
        Ok(n)
    }

    /// Append a copy of `data`, allocating chunks as needed.
    pub fn extend_from_slice(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let space = self.reserve_write_space();
            let n = space.len().min(data.len());
            space[..n].copy_from_slice(&data[..n]);
            self.commit_write(n);
            data = &data[n..];
        }
    }

    /// Copy up to `destination.len()` unread bytes into `destination`.
    ///
    /// Returns fewer bytes than requested only when fewer are available.
    /// Never blocks. A zero-length destination leaves the buffer untouched.
    pub fn read(&mut self, destination: &mut [u8]) -> usize {
        let mut copied = 0;

        while copied < destination.len() && self.has_bytes_available() {
            let end = if self.chunks.len() == 1 {
                self.write_position
            } else {
                self.chunk_size
            };
            let remaining_in_chunk = end - self.read_position;
            let to_copy = remaining_in_chunk.min(destination.len() - copied);

            let start = self.read_position;
            destination[copied..copied + to_copy]
                .copy_from_slice(&self.chunks[0][start..start + to_copy]);
            copied += to_copy;
            self.read_position += to_copy;

            if to_copy == remaining_in_chunk {
                self.release_front();
            }
        }

        copied
    }

    /// Number of bytes available to be read.
    pub fn available(&self) -> usize {
        (self.chunks.len() - 1) * self.chunk_size + self.write_position - self.read_position
    }

    /// Check if at least one byte can be read.
    pub fn has_bytes_available(&self) -> bool {
        self.chunks.len() > 1 || self.read_position < self.write_position
    }

    /// Number of chunks currently allocated.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Drop the fully drained front chunk, or rewind it if it is the last one.
    fn release_front(&mut self) {
        if self.chunks.len() > 1 {
            self.chunks.pop_front();
        } else {
            self.write_position = 0;
        }
        self.read_position = 0;
    }
}

impl Default for ChunkedBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChunkedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedBuffer")
            .field("chunks", &self.chunks.len())
            .field("chunk_size", &self.chunk_size)
            .field("read_position", &self.read_position)
            .field("write_position", &self.write_position)
            .finish()
    }
}

fn new_chunk(size: usize) -> Box<[u8]> {
    vec![0u8; size].into_boxed_slice()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[test]
    fn test_new_buffer_is_empty() {
        let buffer = ChunkedBuffer::new();

        assert_eq!(buffer.available(), 0);
        assert!(!buffer.has_bytes_available());
        assert_eq!(buffer.chunk_count(), 1);
    }

    #[test]
    fn test_reserve_commit_read() {
        let mut buffer = ChunkedBuffer::new();

        let space = buffer.reserve_write_space();
        assert_eq!(space.len(), CHUNK_SIZE);
        space[..5].copy_from_slice(b"hello");
        buffer.commit_write(5);

        assert_eq!(buffer.available(), 5);
        assert_eq!(buffer.reserve_write_space().len(), CHUNK_SIZE - 5);

        let mut out = [0u8; 3];
        assert_eq!(buffer.read(&mut out), 3);
        assert_eq!(&out, b"hel");
        assert_eq!(buffer.available(), 2);

        // Asking for more than is buffered returns what is there
        let mut out = [0u8; 10];
        assert_eq!(buffer.read(&mut out), 2);
        assert_eq!(&out[..2], b"lo");
        assert!(!buffer.has_bytes_available());
    }

    #[test]
    fn test_full_tail_allocates_new_chunk() {
        let mut buffer = ChunkedBuffer::with_chunk_size(8);

        let space = buffer.reserve_write_space();
        assert_eq!(space.len(), 8);
        buffer.commit_write(8);
        assert_eq!(buffer.chunk_count(), 1);

        // Tail is full: the next reservation starts a fresh chunk
        let space = buffer.reserve_write_space();
        assert_eq!(space.len(), 8);
        assert_eq!(buffer.chunk_count(), 2);
        buffer.commit_write(3);

        assert_eq!(buffer.available(), 11);
    }

    #[test]
    fn test_read_across_chunks_reclaims() {
        let mut buffer = ChunkedBuffer::with_chunk_size(8);
        let data: Vec<u8> = (0..20u8).collect();
        buffer.extend_from_slice(&data);

        assert_eq!(buffer.chunk_count(), 3);
        assert_eq!(buffer.available(), 20);

        let mut out = [0u8; 10];
        assert_eq!(buffer.read(&mut out), 10);
        assert_eq!(&out[..], &data[..10]);
        // First chunk drained and freed; second half-read
        assert_eq!(buffer.chunk_count(), 2);
        assert_eq!(buffer.available(), 10);

        let mut out = [0u8; 10];
        assert_eq!(buffer.read(&mut out), 10);
        assert_eq!(&out[..], &data[10..]);
        assert_eq!(buffer.chunk_count(), 1);
        assert_eq!(buffer.available(), 0);
    }

    #[test]
    fn test_sole_chunk_rewinds_when_drained() {
        let mut buffer = ChunkedBuffer::with_chunk_size(8);
        buffer.extend_from_slice(b"abcde");

        let mut out = [0u8; 5];
        assert_eq!(buffer.read(&mut out), 5);

        // Cursors reset: the whole chunk is writable again
        assert_eq!(buffer.chunk_count(), 1);
        assert_eq!(buffer.reserve_write_space().len(), 8);
        assert_eq!(buffer.chunk_count(), 1);
    }

    #[test]
    fn test_zero_length_read_is_noop() {
        let mut buffer = ChunkedBuffer::with_chunk_size(4);
        buffer.extend_from_slice(b"abcdef");
        let before = format!("{buffer:?}");

        assert_eq!(buffer.read(&mut []), 0);
        assert_eq!(format!("{buffer:?}"), before);
        assert_eq!(buffer.available(), 6);

        let mut empty = ChunkedBuffer::new();
        assert_eq!(empty.read(&mut []), 0);
        assert_eq!(empty.available(), 0);
    }

    #[test]
    #[should_panic(expected = "exceeds")]
    fn test_commit_past_reserved_space_panics() {
        let mut buffer = ChunkedBuffer::with_chunk_size(8);
        buffer.extend_from_slice(b"abcdef");
        let space = buffer.reserve_write_space().len();
        buffer.commit_write(space + 1);
    }

    #[test]
    fn test_fill_from_reader() {
        let mut buffer = ChunkedBuffer::with_chunk_size(4);
        let mut source: &[u8] = b"0123456789";

        // One read call never crosses the tail chunk
        assert_eq!(buffer.fill_from(&mut source).unwrap(), 4);
        assert_eq!(buffer.fill_from(&mut source).unwrap(), 4);
        assert_eq!(buffer.fill_from(&mut source).unwrap(), 2);
        assert_eq!(buffer.fill_from(&mut source).unwrap(), 0);
        assert_eq!(buffer.available(), 10);

        let mut out = [0u8; 10];
        assert_eq!(buffer.read(&mut out), 10);
        assert_eq!(&out, b"0123456789");
    }

    #[test]
    fn test_available_tracks_committed_minus_read() {
        // Compare against a VecDeque model over a deterministic pseudo-random
        // mix of partial commits and reads.
        let mut buffer = ChunkedBuffer::with_chunk_size(16);
        let mut model: VecDeque<u8> = VecDeque::new();
        let mut seed: u32 = 0x2545_f491;
        let mut next = move || {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (seed >> 16) as usize
        };
        let mut counter: u8 = 0;

        for _ in 0..2000 {
            if next() % 2 == 0 {
                let space = buffer.reserve_write_space();
                let n = next() % (space.len() + 1);
                for byte in &mut space[..n] {
                    *byte = counter;
                    model.push_back(counter);
                    counter = counter.wrapping_add(1);
                }
                buffer.commit_write(n);
            } else {
                let mut out = vec![0u8; next() % 40];
                let n = buffer.read(&mut out);
                assert_eq!(n, out.len().min(model.len()));
                for byte in &out[..n] {
                    assert_eq!(Some(*byte), model.pop_front());
                }
            }

            assert_eq!(buffer.available(), model.len());
            assert_eq!(buffer.has_bytes_available(), !model.is_empty());
        }
    }
}
