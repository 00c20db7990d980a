//! Local pipe transports for the native messaging relay.
//!
//! The relay owns one endpoint that a companion application talks to:
//! - Unix domain socket (default, reconnecting)
//! - A pair of named FIFOs
//!
//! Both implement [`PipeTransport`], the capability set the pipe channel is
//! built on. Windows named pipes are not implemented.

pub mod endpoint;
pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod client;
#[cfg(unix)]
pub mod fifo;
#[cfg(unix)]
pub mod sys;
#[cfg(unix)]
pub mod uds;

pub use endpoint::{endpoint_path, transport_for, DEFAULT_ENDPOINT};
pub use error::{Result, TransportError};
pub use traits::{PipeTransport, TransportKind};

#[cfg(unix)]
pub use client::PipeClient;
#[cfg(unix)]
pub use fifo::FifoTransport;
#[cfg(unix)]
pub use uds::UnixSocketTransport;
