/// Errors that can occur while assembling or running the relay.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] nmrelay_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] nmrelay_frame::FrameError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error while preparing a channel's streams.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `start()` was called on a channel that is already running.
    #[error("{0} channel already started")]
    AlreadyStarted(&'static str),

    /// `start()` was called after `stop()`.
    #[error("{0} channel already stopped")]
    Stopped(&'static str),

    /// A background thread could not be spawned.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// A pipe client buffered more bytes than one request may occupy.
    #[error("pipe request too large ({size} bytes, max {max})")]
    RequestTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, BridgeError>;
