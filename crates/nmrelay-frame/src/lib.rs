//! Native messaging framing.
//!
//! Every message between a browser and its native host is framed as:
//! - A 4-byte signed length in native byte order
//! - Exactly that many bytes of UTF-8 JSON
//!
//! No partial reads, no buffer management in user code.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
    MAX_HOST_MESSAGE,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
