//! Frame decoder for the length-prefixed echo protocol.
//!
//! A single two-state machine drives both the blocking and the incremental
//! connection loops. The decoder pulls bytes out of a [`ChunkedBuffer`] and
//! assembles each frame into a caller-owned message buffer laid out exactly
//! as it goes back on the wire:
//!
//! ```text
//! message: [ length (4 bytes LE) | payload (length bytes) | unused ... ]
//! ```

use crate::runtime::ChunkedBuffer;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::io;

/// Size of the length prefix in bytes.
pub const HEADER_SIZE: usize = 4;

/// Default maximum payload size: a 4096-byte message holding header and payload.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4096 - HEADER_SIZE;

/// Where the decoder is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    /// Waiting for the 4-byte length prefix.
    AwaitingLength,
    /// Length consumed; waiting for this many payload bytes.
    AwaitingPayload(u32),
}

/// Outcome of a decode step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The buffer must hold at least this many bytes before the next step
    /// can make progress.
    NeedMore(usize),
    /// A frame with this payload length is complete. The message buffer
    /// holds `HEADER_SIZE + len` bytes of wire-ready frame.
    Frame(usize),
}

/// Protocol violations that end a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Declared payload length is larger than the configured maximum.
    TooLarge {
        /// Length from the frame header.
        length: u32,
        /// Configured maximum payload size.
        max: usize,
    },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::TooLarge { length, max } => {
                write!(f, "frame too large: {length} bytes (max {max})")
            }
        }
    }
}

impl std::error::Error for FrameError {}

impl From<FrameError> for io::Error {
    fn from(e: FrameError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, e)
    }
}

/// Incremental frame decoder.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    state: DecodeState,
    max_payload: usize,
}

impl FrameDecoder {
    /// Create a decoder that rejects payloads longer than `max_payload`.
    pub fn new(max_payload: usize) -> Self {
        Self {
            state: DecodeState::AwaitingLength,
            max_payload,
        }
    }

    /// Current state.
    #[cfg(test)]
    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Size of message buffer that [`decode`](Self::decode) requires.
    pub fn message_capacity(&self) -> usize {
        HEADER_SIZE + self.max_payload
    }

    /// Allocate a message buffer sized for this decoder.
    pub fn message_buffer(&self) -> Vec<u8> {
        vec![0u8; self.message_capacity()]
    }

    /// Consume as much of `buffer` as needed to advance by one step.
    ///
    /// Returns [`Progress::Frame`] when a whole frame has been assembled in
    /// `message`, or [`Progress::NeedMore`] when the buffer does not hold
    /// enough bytes yet; in that case nothing is consumed and the state is
    /// kept for the next call.
    ///
    /// # Panics
    /// Panics if `message` is shorter than [`message_capacity`](Self::message_capacity).
    pub fn decode(
        &mut self,
        buffer: &mut ChunkedBuffer,
        message: &mut [u8],
    ) -> Result<Progress, FrameError> {
        assert!(
            message.len() >= self.message_capacity(),
            "message buffer of {} bytes cannot hold a {} byte frame",
            message.len(),
            self.message_capacity()
        );

        loop {
            match self.state {
                DecodeState::AwaitingLength => {
                    if buffer.available() < HEADER_SIZE {
                        return Ok(Progress::NeedMore(HEADER_SIZE));
                    }
                    buffer.read(&mut message[..HEADER_SIZE]);

                    let length = decode_length(&message[..HEADER_SIZE]);
                    if length as usize > self.max_payload {
                        return Err(FrameError::TooLarge {
                            length,
                            max: self.max_payload,
                        });
                    }
                    self.state = DecodeState::AwaitingPayload(length);
                }
                DecodeState::AwaitingPayload(length) => {
                    let length = length as usize;
                    if buffer.available() < length {
                        return Ok(Progress::NeedMore(length));
                    }
                    buffer.read(&mut message[HEADER_SIZE..HEADER_SIZE + length]);

                    self.state = DecodeState::AwaitingLength;
                    return Ok(Progress::Frame(length));
                }
            }
        }
    }
}

/// Decode a little-endian length prefix.
///
/// # Panics
/// Panics if `header` is shorter than [`HEADER_SIZE`].
pub fn decode_length(header: &[u8]) -> u32 {
    let mut bytes = [0u8; HEADER_SIZE];
    bytes.copy_from_slice(&header[..HEADER_SIZE]);
    u32::from_le_bytes(bytes)
}

/// Encode a payload length as a wire header.
pub fn encode_length(length: u32) -> [u8; HEADER_SIZE] {
    length.to_le_bytes()
}

/// Build a complete frame for `payload`.
///
/// # Panics
/// Panics if the payload is longer than `u32::MAX` bytes.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let length = u32::try_from(payload.len()).expect("payload length exceeds u32");
    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    frame.put_slice(&encode_length(length));
    frame.put_slice(payload);
    frame.freeze()
}
