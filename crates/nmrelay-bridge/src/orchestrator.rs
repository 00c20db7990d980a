use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, info_span, trace, warn};

use crate::config::RelayConfig;
use crate::error::{BridgeError, Result};
use crate::extension::{spawn, ExtensionChannel};
use crate::message::{PipeRequest, PipeResponse};
use crate::pipe::PipeChannel;
use crate::queue::lock;

/// What the relay needs from the extension side.
pub trait ExtensionLink: Send + Sync {
    fn send_request(&self, action: &str);
    fn read_response(&self, timeout: Duration) -> Option<String>;
    fn stop(&self);

    /// False once the link can no longer deliver responses.
    fn is_responsive(&self) -> bool {
        true
    }
}

/// What the relay needs from the local pipe side.
pub trait PipeLink: Send + Sync {
    fn read_request(&self, timeout: Duration) -> Option<PipeRequest>;
    fn send_response(&self, response: PipeResponse);
    fn stop(&self);
}

impl ExtensionLink for ExtensionChannel {
    fn send_request(&self, action: &str) {
        ExtensionChannel::send_request(self, action);
    }

    fn read_response(&self, timeout: Duration) -> Option<String> {
        ExtensionChannel::read_response(self, timeout)
    }

    fn stop(&self) {
        ExtensionChannel::stop(self);
    }

    fn is_responsive(&self) -> bool {
        self.health().is_healthy()
    }
}

impl PipeLink for PipeChannel {
    fn read_request(&self, timeout: Duration) -> Option<PipeRequest> {
        PipeChannel::read_request(self, timeout)
    }

    fn send_response(&self, response: PipeResponse) {
        PipeChannel::send_response(self, response);
    }

    fn stop(&self) {
        PipeChannel::stop(self);
    }
}

/// Outcome of one relay iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayStep {
    /// No pipe request arrived before the timeout.
    Idle,
    /// A request without an action was discarded; nothing was sent anywhere.
    Dropped,
    /// The action went to the extension and a response went back to the pipe.
    Relayed { action: String, answered: bool },
}

/// Pairs each pipe request with the next extension message.
///
/// There is no request id on either wire: one round trip is in flight at a
/// time, and whatever the extension sends next is taken as the answer.
pub struct RelayOrchestrator<E, P> {
    inner: Arc<Relay<E, P>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Relay<E, P> {
    extension: Arc<E>,
    pipe: Arc<P>,
    config: RelayConfig,
    stopped: AtomicBool,
    reported_dead: AtomicBool,
}

impl<E, P> RelayOrchestrator<E, P>
where
    E: ExtensionLink + 'static,
    P: PipeLink + 'static,
{
    pub fn new(extension: Arc<E>, pipe: Arc<P>, config: RelayConfig) -> Self {
        Self {
            inner: Arc::new(Relay {
                extension,
                pipe,
                config,
                stopped: AtomicBool::new(false),
                reported_dead: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Run a single request/response iteration on the calling thread.
    pub fn relay_once(&self) -> RelayStep {
        self.inner.relay_once()
    }

    /// Relay on the calling thread until [`stop`](Self::stop) is called.
    pub fn run(&self) {
        self.inner.run();
    }

    /// Relay on a background thread.
    pub fn start(&self) -> Result<()> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Err(BridgeError::AlreadyStarted("relay"));
        }
        let relay = Arc::clone(&self.inner);
        *worker = Some(spawn("nmrelay-relay", move || relay.run())?);
        Ok(())
    }

    /// Stop the loop and both channels, then wait for the loop to exit.
    pub fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::AcqRel) {
            info!("stopping relay");
        }
        self.inner.pipe.stop();
        self.inner.extension.stop();

        if let Some(worker) = lock(&self.worker).take() {
            if worker.join().is_err() {
                warn!("relay thread panicked");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    pub fn extension(&self) -> &Arc<E> {
        &self.inner.extension
    }

    pub fn pipe(&self) -> &Arc<P> {
        &self.inner.pipe
    }
}

impl<E: ExtensionLink, P: PipeLink> Relay<E, P> {
    fn run(&self) {
        let _span = info_span!("relay", role = "orchestrator").entered();
        info!("relay running");
        while !self.stopped.load(Ordering::Acquire) {
            self.relay_once();
        }
        info!("relay stopped");
    }

    fn relay_once(&self) -> RelayStep {
        let Some(request) = self.pipe.read_request(self.config.request_timeout) else {
            trace!("no pipe request before timeout");
            return RelayStep::Idle;
        };
        if request.action.is_empty() {
            debug!("dropping pipe request without action");
            return RelayStep::Dropped;
        }

        if !self.extension.is_responsive() && !self.reported_dead.swap(true, Ordering::AcqRel) {
            warn!("extension channel is down; responses will carry empty data");
        }

        let action = request.action;
        self.extension.send_request(&action);
        let data = self.extension.read_response(self.config.response_timeout);
        let answered = data.is_some();
        if !answered {
            debug!(%action, "extension did not answer in time");
        }

        self.pipe.send_response(PipeResponse::new(action.clone(), data));
        RelayStep::Relayed { action, answered }
    }
}
