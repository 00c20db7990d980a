//! Native messaging host that relays browser extension actions to a local pipe.
//!
//! A companion application writes `{"action": ...}` to a local endpoint; the
//! relay frames the action for the extension over stdout, waits briefly for
//! the extension's next message on stdin and writes `{"action", "data"}` back.
//!
//! # Crate Structure
//!
//! - [`transport`]: Local pipe transports (Unix domain socket, FIFO pair)
//! - [`frame`]: Native messaging framing (native-endian `i32` length prefix)
//! - [`bridge`]: Lifecycle queues, both channels and the relay orchestrator

/// Re-export transport types.
pub mod transport {
    pub use nmrelay_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use nmrelay_frame::*;
}

/// Re-export bridge types.
pub mod bridge {
    pub use nmrelay_bridge::*;
}
