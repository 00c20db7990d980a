use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use tracing::trace;

use crate::codec::{encode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// Writes complete frames to any `Write` stream.
///
/// Header and payload go out in one buffer and are flushed immediately, so
/// the browser never sees a half-written frame sitting in a stdio buffer.
///
/// A sink that reports idle (`WouldBlock`/`TimedOut`, see
/// [`FrameError::is_idle`]) leaves the unwritten rest of the frame buffered;
/// [`resume`](Self::resume) continues from where the sink stopped.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    written: usize,
    unflushed: bool,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            written: 0,
            unflushed: false,
            config,
        }
    }

    /// Write a complete frame (blocking).
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(frame.payload.as_ref())
    }

    /// Encode and send a payload.
    ///
    /// A frame left pending by an idle sink is finished first; if the sink
    /// is still idle the error is returned and `payload` is not taken.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }
        self.resume()?;

        self.buf.clear();
        encode_frame(payload, &mut self.buf)?;
        self.written = 0;
        self.unflushed = true;
        self.resume()?;
        trace!(size = payload.len(), "frame written");
        Ok(())
    }

    /// Continue writing a frame interrupted by an idle sink.
    ///
    /// Returns `Ok(())` once nothing is pending.
    pub fn resume(&mut self) -> Result<()> {
        while self.written < self.buf.len() {
            match self.inner.write(&self.buf[self.written..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => self.written += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        if self.unflushed {
            self.flush()?;
            self.unflushed = false;
        }
        Ok(())
    }

    /// True while part of a frame is waiting for the sink.
    pub fn has_pending(&self) -> bool {
        self.written < self.buf.len() || self.unflushed
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
