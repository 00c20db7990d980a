use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

/// Whether a channel's background loops are still running.
///
/// A channel whose loop died keeps answering reads with "no value"; this is
/// the only place the difference between "quiet" and "dead" shows up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelHealth {
    pub inbound_alive: bool,
    pub outbound_alive: bool,
}

impl ChannelHealth {
    pub fn is_healthy(&self) -> bool {
        self.inbound_alive && self.outbound_alive
    }
}

/// Stop flag and liveness flags shared by a channel and its two loops.
#[derive(Debug, Default)]
pub(crate) struct LoopState {
    stopped: AtomicBool,
    inbound: AtomicBool,
    outbound: AtomicBool,
}

impl LoopState {
    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Set the stop flag, returning whether it was already set.
    pub(crate) fn request_stop(&self) -> bool {
        self.stopped.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn health(&self) -> ChannelHealth {
        ChannelHealth {
            inbound_alive: self.inbound.load(Ordering::Acquire),
            outbound_alive: self.outbound.load(Ordering::Acquire),
        }
    }

    /// Mark the inbound loop alive until the returned guard drops.
    pub(crate) fn inbound_alive(&self) -> AliveGuard<'_> {
        AliveGuard::new(&self.inbound)
    }

    /// Mark the outbound loop alive until the returned guard drops.
    pub(crate) fn outbound_alive(&self) -> AliveGuard<'_> {
        AliveGuard::new(&self.outbound)
    }
}

/// Clears its flag on drop, including when the loop panics.
pub(crate) struct AliveGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> AliveGuard<'a> {
    fn new(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self { flag }
    }
}

impl Drop for AliveGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
