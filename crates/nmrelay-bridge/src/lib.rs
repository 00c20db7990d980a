//! The relay between a browser extension and a local pipe.
//!
//! Two channels, each a pair of [`LifecycleQueue`]s drained by background
//! threads, and one [`RelayOrchestrator`] that pulls a request from the pipe,
//! hands its action to the extension and returns whatever the extension
//! says next.

pub mod config;
pub mod error;
pub mod extension;
pub mod health;
pub mod message;
pub mod orchestrator;
pub mod pipe;
pub mod queue;

#[cfg(unix)]
pub mod stdio;

pub use config::{BridgeConfig, ExtensionConfig, PipeConfig, RelayConfig};
pub use error::{BridgeError, Result};
pub use extension::ExtensionChannel;
pub use health::ChannelHealth;
pub use message::{ExtensionRequest, PipeRequest, PipeResponse, RequestDecoder};
pub use orchestrator::{ExtensionLink, PipeLink, RelayOrchestrator, RelayStep};
pub use pipe::PipeChannel;
pub use queue::LifecycleQueue;

#[cfg(unix)]
pub use stdio::{StdinSource, StdoutSink};
