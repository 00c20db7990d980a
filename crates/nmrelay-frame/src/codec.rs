use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: a single native-endian `i32` length.
pub const HEADER_SIZE: usize = 4;

/// Default maximum inbound payload: 64 MiB (browser to host limit).
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// Maximum payload a host may send to the browser: 1 MiB.
pub const MAX_HOST_MESSAGE: usize = 1024 * 1024;

/// One native messaging payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Payload as text. Invalid UTF-8 sequences are replaced, not rejected.
    pub fn into_text(self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌─────────────────────┬──────────────────┐
/// │ Length (4B, native) │ Payload          │
/// │ i32, > 0            │ (Length bytes)   │
/// └─────────────────────┴──────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.is_empty() {
        return Err(FrameError::InvalidLength(0));
    }
    let len = i32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: i32::MAX as usize,
    })?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_i32_ne(len);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    let Some(len) = peek_length(src) else {
        return Ok(None); // Need more data
    };

    if len <= 0 {
        return Err(FrameError::InvalidLength(len));
    }
    let payload_len = len as usize;
    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    if src.len() < HEADER_SIZE + payload_len {
        return Ok(None); // Need more data
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame { payload }))
}

/// Length announced by a buffered header, if the header is complete.
pub(crate) fn peek_length(src: &[u8]) -> Option<i32> {
    let header: [u8; HEADER_SIZE] = src.get(..HEADER_SIZE)?.try_into().ok()?;
    Some(i32::from_ne_bytes(header))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 64 MiB.
    pub max_payload_size: usize,
}

impl FrameConfig {
    /// Limits for frames a host writes to the browser.
    pub fn outbound() -> Self {
        Self {
            max_payload_size: MAX_HOST_MESSAGE,
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}
