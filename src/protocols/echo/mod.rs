//! Length-prefixed echo protocol.
//!
//! Every message is a frame:
//!
//! ```text
//! offset 0..3      length   (u32, little-endian)
//! offset 4..4+len  payload  (opaque bytes)
//! ```
//!
//! There is no magic number, version or checksum. The server hands each
//! payload to a [`MessageHandler`] and writes the frame back unchanged, so
//! a response is byte-for-byte the request.
//!
//! A zero-length frame is valid and echoes as just its 4-byte header.
//! Frames declaring more than the configured maximum payload end the
//! connection without a response.
//!
//! ## Example
//!
//! ```text
//! Request:  04 00 00 00 41 42 43 44   (length 4, "ABCD")
//! Response: 04 00 00 00 41 42 43 44
//! ```

pub mod handler;
pub mod parser;

pub use handler::{serve_blocking, Echo, EchoSession, Liveness};
pub use parser::{encode_frame, DEFAULT_MAX_MESSAGE_SIZE, HEADER_SIZE};
