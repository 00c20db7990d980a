use std::path::Path;

use crate::error::Result;

/// Capability set of a local pipe endpoint owned by the relay.
///
/// One receiver thread calls [`read_chunk`](PipeTransport::read_chunk) while a
/// sender thread calls [`write_chunk`](PipeTransport::write_chunk), so every
/// method takes `&self`. [`close`](PipeTransport::close) may run on a third
/// thread while a read is blocked and must release that read.
pub trait PipeTransport: Send + Sync {
    /// Create the endpoint and make it ready for clients.
    fn open(&self) -> Result<()>;

    /// Read the next chunk of bytes from the current client (blocking).
    ///
    /// Never returns `Ok(0)`: end of stream surfaces as
    /// [`TransportError::Disconnected`](crate::TransportError::Disconnected).
    fn read_chunk(&self, buf: &mut [u8]) -> Result<usize>;

    /// Write a complete buffer to the current client.
    fn write_chunk(&self, data: &[u8]) -> Result<()>;

    /// Release the endpoint and wake any blocked reader. Idempotent.
    fn close(&self) -> Result<()>;

    /// Filesystem path identifying the endpoint.
    fn endpoint(&self) -> &Path;

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str;
}

/// Which transport backs the local pipe.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TransportKind {
    /// Unix domain socket, one client at a time, reconnects after disconnect.
    #[default]
    Socket,
    /// A pair of named FIFOs (`<base>.in`, `<base>.out`).
    Fifo,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Socket => "unix-domain-socket",
            TransportKind::Fifo => "fifo",
        }
    }
}
