use std::time::Duration;

use nmrelay_frame::{DEFAULT_MAX_PAYLOAD, MAX_HOST_MESSAGE};

/// Configuration for the extension (stdin/stdout) channel.
#[derive(Debug, Clone)]
pub struct ExtensionConfig {
    /// How long the writer waits on its queue before re-checking the stop flag.
    pub poll_interval: Duration,
    /// How long the stdin source waits for input before reporting idle.
    pub input_poll_interval: Duration,
    /// How long the stdout sink waits for the browser to drain before reporting idle.
    pub output_poll_interval: Duration,
    /// How long `stop()` waits for each loop before detaching it. Loops over
    /// streams that never report idle can stay blocked in I/O.
    pub stop_grace: Duration,
    /// Largest frame accepted from the browser.
    pub max_inbound_payload: usize,
    /// Largest frame written to the browser.
    pub max_outbound_payload: usize,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            input_poll_interval: Duration::from_millis(200),
            output_poll_interval: Duration::from_millis(200),
            stop_grace: Duration::from_secs(2),
            max_inbound_payload: DEFAULT_MAX_PAYLOAD,
            max_outbound_payload: MAX_HOST_MESSAGE,
        }
    }
}

/// Configuration for the local pipe channel.
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// Bytes requested from the transport per read.
    pub read_chunk_size: usize,
    /// How long the sender waits on its queue before re-checking the stop flag.
    pub poll_interval: Duration,
    /// Default timeout of [`PipeChannel::read_request_default`](crate::PipeChannel::read_request_default).
    pub request_timeout: Duration,
    /// Upper bound on bytes buffered while waiting for a JSON document to complete.
    pub max_pending_bytes: usize,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: 1024,
            poll_interval: Duration::from_millis(1000),
            request_timeout: Duration::from_millis(2000),
            max_pending_bytes: 64 * 1024,
        }
    }
}

/// Timeouts of the relay loop.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How long one iteration waits for a pipe request.
    pub request_timeout: Duration,
    /// How long the relay waits for the extension to answer an action.
    pub response_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(2000),
            response_timeout: Duration::from_millis(500),
        }
    }
}

/// Everything needed to assemble a relay.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    pub extension: ExtensionConfig,
    pub pipe: PipeConfig,
    pub relay: RelayConfig,
}
