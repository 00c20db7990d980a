use std::io::ErrorKind;
use std::path::PathBuf;

/// Errors that can occur in pipe transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind or create the endpoint at the specified path.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to open an existing endpoint.
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the specified endpoint.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// No client is connected to the endpoint.
    #[error("no client connected")]
    NotConnected,

    /// The connected client went away.
    #[error("client disconnected")]
    Disconnected,

    /// `open` has not been called, or it failed.
    #[error("transport not open")]
    NotOpen,

    /// The transport is not available on this platform.
    #[error("transport unsupported: {0}")]
    Unsupported(&'static str),

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// Whether retrying the same call later can succeed.
    ///
    /// Transient failures leave the transport usable (a client may connect or
    /// reconnect); everything else is terminal for the loop that observed it.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::NotConnected
            | TransportError::Disconnected
            | TransportError::Accept(_) => true,
            TransportError::Io(err) => is_transient_io(err),
            _ => false,
        }
    }
}

pub(crate) fn is_transient_io(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
    )
}

pub type Result<T> = std::result::Result<T, TransportError>;
