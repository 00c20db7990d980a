use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nmrelay_frame::{FrameConfig, FrameError, FrameReader, FrameWriter};
use tracing::{debug, error, info, info_span, warn};

use crate::config::ExtensionConfig;
use crate::error::{BridgeError, Result};
use crate::health::{ChannelHealth, LoopState};
use crate::message::ExtensionRequest;
use crate::queue::{lock, LifecycleQueue};

type Input = Box<dyn Read + Send>;
type Output = Box<dyn Write + Send>;

const JOIN_POLL: Duration = Duration::from_millis(10);

/// The browser side of the relay: framed JSON over the host's stdin/stdout.
///
/// A reader thread turns inbound frames into raw message strings; a writer
/// thread frames outbound action names as `{"action": ...}`. Callers only
/// touch the two queues, so [`send_request`](Self::send_request) never blocks.
///
/// Both streams should report idle (`WouldBlock`/`TimedOut`) periodically,
/// as [`StdinSource`](crate::StdinSource), [`StdoutSink`](crate::StdoutSink)
/// and sockets with timeouts do. A loop stuck in I/O on a stream that never
/// does is detached by [`stop`](Self::stop) after `stop_grace`.
pub struct ExtensionChannel {
    config: ExtensionConfig,
    outbound: Arc<LifecycleQueue<String>>,
    inbound: Arc<LifecycleQueue<String>>,
    state: Arc<LoopState>,
    streams: Mutex<Option<(Input, Output)>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ExtensionChannel {
    pub fn new(
        input: impl Read + Send + 'static,
        output: impl Write + Send + 'static,
        config: ExtensionConfig,
    ) -> Self {
        Self {
            config,
            outbound: Arc::new(LifecycleQueue::new()),
            inbound: Arc::new(LifecycleQueue::new()),
            state: Arc::new(LoopState::default()),
            streams: Mutex::new(Some((Box::new(input), Box::new(output)))),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Channel over this process's stdin and stdout.
    #[cfg(unix)]
    pub fn from_stdio(config: ExtensionConfig) -> Result<Self> {
        let input = crate::stdio::StdinSource::new(config.input_poll_interval)?;
        let output = crate::stdio::StdoutSink::new(config.output_poll_interval)?;
        Ok(Self::new(input, output, config))
    }

    /// Launch the reader and writer threads.
    pub fn start(&self) -> Result<()> {
        if self.state.is_stopped() {
            return Err(BridgeError::Stopped("extension"));
        }
        let (input, output) = lock(&self.streams)
            .take()
            .ok_or(BridgeError::AlreadyStarted("extension"))?;

        let reader = FrameReader::with_config(
            input,
            FrameConfig {
                max_payload_size: self.config.max_inbound_payload,
            },
        );
        let writer = FrameWriter::with_config(
            output,
            FrameConfig {
                max_payload_size: self.config.max_outbound_payload,
            },
        );

        let mut workers = lock(&self.workers);
        {
            let inbound = Arc::clone(&self.inbound);
            let state = Arc::clone(&self.state);
            workers.push(spawn("nmrelay-ext-reader", move || {
                read_loop(reader, &inbound, &state)
            })?);
        }
        {
            let outbound = Arc::clone(&self.outbound);
            let state = Arc::clone(&self.state);
            let poll_interval = self.config.poll_interval;
            workers.push(spawn("nmrelay-ext-writer", move || {
                write_loop(writer, &outbound, &state, poll_interval)
            })?);
        }
        info!("extension channel started");
        Ok(())
    }

    /// Queue an action for the extension. Never blocks.
    ///
    /// Returns `false` once the channel is stopped.
    pub fn send_request(&self, action: impl Into<String>) -> bool {
        self.outbound.push(action.into())
    }

    /// Next raw message from the extension, waiting at most `timeout`.
    pub fn read_response(&self, timeout: Duration) -> Option<String> {
        self.inbound.pop(timeout)
    }

    /// Stop both loops and wait for them. Idempotent.
    pub fn stop(&self) {
        if !self.state.request_stop() {
            debug!("stopping extension channel");
        }
        self.outbound.close();
        self.inbound.close();

        let workers = std::mem::take(&mut *lock(&self.workers));
        join_within(workers, self.config.stop_grace, "extension");
    }

    pub fn health(&self) -> ChannelHealth {
        self.state.health()
    }
}

impl Drop for ExtensionChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ExtensionChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionChannel")
            .field("config", &self.config)
            .field("health", &self.health())
            .field("stopped", &self.state.is_stopped())
            .finish()
    }
}

pub(crate) fn spawn(
    name: &'static str,
    body: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|source| BridgeError::Spawn { name, source })
}

/// Join `workers`, waiting at most `grace` in total. A worker still running
/// after that is detached.
pub(crate) fn join_within(workers: Vec<JoinHandle<()>>, grace: Duration, channel: &'static str) {
    let deadline = Instant::now().checked_add(grace);
    for worker in workers {
        while !worker.is_finished() && deadline.is_none_or(|deadline| Instant::now() < deadline) {
            thread::sleep(JOIN_POLL);
        }
        if !worker.is_finished() {
            warn!(
                channel,
                thread = worker.thread().name().unwrap_or("worker"),
                "loop still blocked in I/O after stop; detached"
            );
            continue;
        }
        if worker.join().is_err() {
            warn!(channel, "worker panicked");
        }
    }
}

fn read_loop(mut reader: FrameReader<Input>, inbound: &LifecycleQueue<String>, state: &LoopState) {
    let _span = info_span!("extension", role = "reader").entered();
    let _alive = state.inbound_alive();

    while !state.is_stopped() {
        match reader.read_frame() {
            Ok(frame) => {
                debug!(size = frame.payload.len(), "message from extension");
                if !inbound.push(frame.into_text()) {
                    break;
                }
            }
            Err(err) if err.is_idle() => continue,
            Err(FrameError::ConnectionClosed) => {
                info!("extension closed its end of the stream");
                break;
            }
            Err(err) => {
                error!(error = %err, "extension framing failed; reader stopped");
                break;
            }
        }
    }
}

fn write_loop(
    mut writer: FrameWriter<Output>,
    outbound: &LifecycleQueue<String>,
    state: &LoopState,
    poll_interval: Duration,
) {
    let _span = info_span!("extension", role = "writer").entered();
    let _alive = state.outbound_alive();

    while !state.is_stopped() {
        let Some(action) = outbound.pop(poll_interval) else {
            if outbound.is_closed() {
                break;
            }
            continue;
        };

        let payload = match serde_json::to_vec(&ExtensionRequest { action: &action }) {
            Ok(payload) => payload,
            Err(err) => {
                error!(error = %err, %action, "failed to encode extension request");
                continue;
            }
        };

        let mut result = writer.send(&payload);
        while matches!(&result, Err(err) if err.is_idle()) {
            if state.is_stopped() {
                debug!(%action, "extension stopped draining; frame abandoned");
                return;
            }
            result = writer.resume();
        }

        match result {
            Ok(()) => debug!(%action, "request sent to extension"),
            Err(FrameError::PayloadTooLarge { size, max }) => {
                warn!(%action, size, max, "extension request too large; skipped");
            }
            Err(err) => {
                error!(error = %err, %action, "write to extension failed; writer stopped");
                break;
            }
        }
    }
}
