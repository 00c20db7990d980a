use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nmrelay_transport::{PipeTransport, TransportError};
use tracing::{debug, error, info, info_span, warn};

use crate::config::PipeConfig;
use crate::error::{BridgeError, Result};
use crate::extension::spawn;
use crate::health::{ChannelHealth, LoopState};
use crate::message::{PipeRequest, PipeResponse, RequestDecoder};
use crate::queue::{lock, LifecycleQueue};

/// Pause after a transient transport failure before reading again.
const RETRY_BACKOFF: Duration = Duration::from_millis(25);

/// The companion-application side of the relay.
///
/// Wraps any [`PipeTransport`]: a receiver thread decodes JSON requests
/// from raw reads, a sender thread writes JSON responses. Both loops
/// survive per-message failures; only fatal transport errors end them.
pub struct PipeChannel {
    transport: Arc<dyn PipeTransport>,
    config: PipeConfig,
    outbound: Arc<LifecycleQueue<PipeResponse>>,
    inbound: Arc<LifecycleQueue<PipeRequest>>,
    state: Arc<LoopState>,
    started: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PipeChannel {
    pub fn new(transport: Arc<dyn PipeTransport>, config: PipeConfig) -> Self {
        Self {
            transport,
            config,
            outbound: Arc::new(LifecycleQueue::new()),
            inbound: Arc::new(LifecycleQueue::new()),
            state: Arc::new(LoopState::default()),
            started: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Open the transport and launch the receiver and sender threads.
    ///
    /// A transport that cannot be opened is logged and reported; nothing is
    /// retried.
    pub fn start(&self) -> Result<()> {
        if self.state.is_stopped() {
            return Err(BridgeError::Stopped("pipe"));
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(BridgeError::AlreadyStarted("pipe"));
        }

        if let Err(err) = self.transport.open() {
            error!(
                error = %err,
                endpoint = %self.transport.endpoint().display(),
                "failed to open pipe transport"
            );
            return Err(err.into());
        }

        let mut workers = lock(&self.workers);
        {
            let transport = Arc::clone(&self.transport);
            let inbound = Arc::clone(&self.inbound);
            let state = Arc::clone(&self.state);
            let config = self.config.clone();
            workers.push(spawn("nmrelay-pipe-receiver", move || {
                receive_loop(transport.as_ref(), &inbound, &state, &config)
            })?);
        }
        {
            let transport = Arc::clone(&self.transport);
            let outbound = Arc::clone(&self.outbound);
            let state = Arc::clone(&self.state);
            let poll_interval = self.config.poll_interval;
            workers.push(spawn("nmrelay-pipe-sender", move || {
                send_loop(transport.as_ref(), &outbound, &state, poll_interval)
            })?);
        }

        info!(
            transport = self.transport.transport_name(),
            endpoint = %self.transport.endpoint().display(),
            "pipe channel started"
        );
        Ok(())
    }

    /// Queue a response for the pipe client. Never blocks.
    pub fn send_response(&self, response: PipeResponse) -> bool {
        self.outbound.push(response)
    }

    /// Next request from the pipe client, waiting at most `timeout`.
    pub fn read_request(&self, timeout: Duration) -> Option<PipeRequest> {
        self.inbound.pop(timeout)
    }

    /// [`read_request`](Self::read_request) with the configured default timeout.
    pub fn read_request_default(&self) -> Option<PipeRequest> {
        self.read_request(self.config.request_timeout)
    }

    /// Stop both loops, release the transport and join. Idempotent.
    ///
    /// The transport is closed before joining so a receiver blocked in a
    /// read is woken. Close failures are logged, not returned.
    pub fn stop(&self) {
        if !self.state.request_stop() {
            debug!("stopping pipe channel");
        }
        self.outbound.close();
        self.inbound.close();

        if let Err(err) = self.transport.close() {
            warn!(error = %err, "failed to close pipe transport");
        }

        let workers = std::mem::take(&mut *lock(&self.workers));
        for worker in workers {
            if worker.join().is_err() {
                warn!("pipe worker panicked");
            }
        }
    }

    pub fn health(&self) -> ChannelHealth {
        self.state.health()
    }

    pub fn transport(&self) -> &dyn PipeTransport {
        self.transport.as_ref()
    }
}

impl Drop for PipeChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PipeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeChannel")
            .field("transport", &self.transport.transport_name())
            .field("endpoint", &self.transport.endpoint())
            .field("health", &self.health())
            .finish()
    }
}

fn receive_loop(
    transport: &dyn PipeTransport,
    inbound: &LifecycleQueue<PipeRequest>,
    state: &LoopState,
    config: &PipeConfig,
) {
    let _span = info_span!("pipe", role = "receiver").entered();
    let _alive = state.inbound_alive();

    let mut buf = vec![0u8; config.read_chunk_size.max(1)];
    let mut decoder = RequestDecoder::new(config.max_pending_bytes);

    while !state.is_stopped() {
        let read = match transport.read_chunk(&mut buf) {
            Ok(n) => n,
            Err(_) if state.is_stopped() => break,
            Err(TransportError::Shutdown) => break,
            Err(err) if err.is_transient() => {
                debug!(error = %err, "pipe client unavailable");
                decoder.reset();
                thread::sleep(RETRY_BACKOFF);
                continue;
            }
            Err(err) => {
                error!(error = %err, "pipe read failed; receiver stopped");
                break;
            }
        };

        if let Err(err) = decoder.push_chunk(&buf[..read]) {
            warn!(error = %err, "dropping pipe input");
            continue;
        }
        loop {
            match decoder.next_request() {
                Ok(Some(request)) => {
                    debug!(action = %request.action, "request from pipe");
                    if !inbound.push(request) {
                        return;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "dropping malformed pipe request");
                    break;
                }
            }
        }
    }
}

fn send_loop(
    transport: &dyn PipeTransport,
    outbound: &LifecycleQueue<PipeResponse>,
    state: &LoopState,
    poll_interval: Duration,
) {
    let _span = info_span!("pipe", role = "sender").entered();
    let _alive = state.outbound_alive();

    while !state.is_stopped() {
        let Some(response) = outbound.pop(poll_interval) else {
            if outbound.is_closed() {
                break;
            }
            continue;
        };

        let payload = match serde_json::to_vec(&response) {
            Ok(payload) => payload,
            Err(err) => {
                error!(error = %err, action = %response.action, "failed to encode pipe response");
                continue;
            }
        };

        match transport.write_chunk(&payload) {
            Ok(()) => debug!(action = %response.action, "response sent to pipe"),
            Err(_) if state.is_stopped() => {
                debug!(action = %response.action, "response abandoned at stop");
                break;
            }
            Err(err) if err.is_transient() => {
                warn!(error = %err, action = %response.action, "pipe response dropped");
            }
            Err(err) => {
                error!(error = %err, "pipe write failed; sender stopped");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Instant;

    use nmrelay_transport::{PipeClient, TransportKind, UnixSocketTransport};

    use super::*;

    fn make_sock_path(tag: &str) -> PathBuf {
        let dir = PathBuf::from(format!(
            "/tmp/nmrelay-pipe-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir.join("relay.sock")
    }

    fn cleanup(path: &std::path::Path) {
        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    fn socket_channel(path: &std::path::Path) -> PipeChannel {
        let transport = UnixSocketTransport::new(path).expect("socket path should be valid");
        PipeChannel::new(
            Arc::new(transport),
            PipeConfig {
                poll_interval: Duration::from_millis(20),
                ..PipeConfig::default()
            },
        )
    }

    fn recv_text(client: &mut PipeClient) -> String {
        let mut buf = [0u8; 1024];
        let n = client
            .recv(&mut buf, Duration::from_secs(5))
            .expect("response should arrive");
        String::from_utf8(buf[..n].to_vec()).unwrap()
    }

    #[test]
    fn request_and_response_round_trip() {
        let path = make_sock_path("roundtrip");
        let channel = socket_channel(&path);
        channel.start().expect("channel should start");

        let mut client = PipeClient::connect(TransportKind::Socket, &path).unwrap();
        client.send(br#"{"action":"tabInfo","tab":3}"#).unwrap();

        let request = channel
            .read_request(Duration::from_secs(5))
            .expect("request should arrive");
        assert_eq!(request.action, "tabInfo");
        assert!(request.extra.contains_key("tab"));

        channel.send_response(PipeResponse::new("tabInfo", Some("ok".into())));
        assert_eq!(recv_text(&mut client), r#"{"action":"tabInfo","data":"ok"}"#);

        channel.stop();
        cleanup(&path);
    }

    #[test]
    fn coalesced_requests_are_all_delivered() {
        let path = make_sock_path("coalesced");
        let channel = socket_channel(&path);
        channel.start().unwrap();

        let mut client = PipeClient::connect(TransportKind::Socket, &path).unwrap();
        client
            .send(br#"{"action":"one"}{"action":"two"}"#)
            .unwrap();

        let first = channel.read_request(Duration::from_secs(5)).unwrap();
        let second = channel.read_request(Duration::from_secs(5)).unwrap();
        assert_eq!((first.action.as_str(), second.action.as_str()), ("one", "two"));

        channel.stop();
        cleanup(&path);
    }

    #[test]
    fn next_client_is_served_after_disconnect() {
        let path = make_sock_path("reconnect");
        let channel = socket_channel(&path);
        channel.start().unwrap();

        let mut first = PipeClient::connect(TransportKind::Socket, &path).unwrap();
        first.send(br#"{"action":"first"}"#).unwrap();
        assert_eq!(
            channel.read_request(Duration::from_secs(5)).unwrap().action,
            "first"
        );
        drop(first);

        let mut second = PipeClient::connect(TransportKind::Socket, &path).unwrap();
        second.send(br#"{"action":"second"}"#).unwrap();
        assert_eq!(
            channel.read_request(Duration::from_secs(5)).unwrap().action,
            "second"
        );
        assert!(channel.health().is_healthy());

        channel.stop();
        cleanup(&path);
    }

    #[test]
    fn read_request_default_times_out() {
        let path = make_sock_path("timeout");
        let transport = UnixSocketTransport::new(&path).unwrap();
        let channel = PipeChannel::new(
            Arc::new(transport),
            PipeConfig {
                request_timeout: Duration::from_millis(40),
                ..PipeConfig::default()
            },
        );
        channel.start().unwrap();

        let started = Instant::now();
        assert!(channel.read_request_default().is_none());
        assert!(started.elapsed() >= Duration::from_millis(40));

        channel.stop();
        cleanup(&path);
    }

    #[test]
    fn stop_releases_receiver_waiting_for_a_client() {
        let path = make_sock_path("stop");
        let channel = socket_channel(&path);
        channel.start().unwrap();
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        channel.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(channel.health(), ChannelHealth::default());
        assert!(!path.exists());

        channel.stop();
        cleanup(&path);
    }

    #[test]
    fn stop_releases_receiver_blocked_on_connected_client() {
        let path = make_sock_path("stop-client");
        let channel = socket_channel(&path);
        channel.start().unwrap();

        let mut client = PipeClient::connect(TransportKind::Socket, &path).unwrap();
        client.send(br#"{"action":"ping"}"#).unwrap();
        assert!(channel.read_request(Duration::from_secs(5)).is_some());

        let started = Instant::now();
        channel.stop();
        assert!(started.elapsed() < Duration::from_secs(2));

        cleanup(&path);
    }

    #[test]
    fn start_fails_when_transport_cannot_open() {
        let path = make_sock_path("occupied");
        std::fs::write(&path, b"not a socket").unwrap();

        let channel = socket_channel(&path);
        assert!(matches!(channel.start(), Err(BridgeError::Transport(_))));
        assert!(path.exists());
        assert!(matches!(
            channel.start(),
            Err(BridgeError::AlreadyStarted("pipe"))
        ));

        cleanup(&path);
    }

    fn fifo_channel(base: &std::path::Path) -> PipeChannel {
        PipeChannel::new(
            Arc::new(nmrelay_transport::FifoTransport::new(base)),
            PipeConfig {
                poll_interval: Duration::from_millis(20),
                ..PipeConfig::default()
            },
        )
    }

    fn recv_response(client: &mut PipeClient, pending: &mut Vec<u8>) -> PipeResponse {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let (next, used) = {
                let mut stream = serde_json::Deserializer::from_slice(pending.as_slice())
                    .into_iter::<PipeResponse>();
                let next = stream.next();
                (next, stream.byte_offset())
            };
            match next {
                Some(Ok(response)) => {
                    pending.drain(..used);
                    return response;
                }
                Some(Err(err)) if !err.is_eof() => {
                    panic!("corrupt response after {} bytes: {err}", pending.len())
                }
                _ => {}
            }

            let n = client
                .recv(&mut buf, Duration::from_secs(5))
                .expect("response bytes should arrive");
            pending.extend_from_slice(&buf[..n]);
        }
    }

    #[test]
    fn stop_is_bounded_when_socket_client_stops_reading() {
        let path = make_sock_path("stalled");
        let channel = socket_channel(&path);
        channel.start().unwrap();

        let mut client = PipeClient::connect(TransportKind::Socket, &path).unwrap();
        client.send(br#"{"action":"x"}"#).unwrap();
        assert!(channel.read_request(Duration::from_secs(5)).is_some());

        channel.send_response(PipeResponse::new("x", Some("y".repeat(4 * 1024 * 1024))));
        thread::sleep(Duration::from_millis(200));

        let started = Instant::now();
        channel.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(channel.health(), ChannelHealth::default());
        cleanup(&path);
    }

    #[test]
    fn fifo_response_larger_than_pipe_capacity_arrives_whole() {
        let base = make_sock_path("fifo-large").with_extension("");
        let channel = fifo_channel(&base);
        channel.start().unwrap();
        let mut client = PipeClient::connect(TransportKind::Fifo, &base).unwrap();

        let data = "z".repeat(200 * 1024);
        channel.send_response(PipeResponse::new("big", Some(data.clone())));
        channel.send_response(PipeResponse::new("small", Some("ok".into())));

        let mut pending = Vec::new();
        let first = recv_response(&mut client, &mut pending);
        assert_eq!(first.action, "big");
        assert_eq!(first.data, data);
        assert_eq!(recv_response(&mut client, &mut pending).action, "small");

        channel.stop();
        cleanup(&base);
    }

    #[test]
    fn stop_is_bounded_when_fifo_client_stops_reading() {
        let base = make_sock_path("fifo-stalled").with_extension("");
        let channel = fifo_channel(&base);
        channel.start().unwrap();
        let _client = PipeClient::connect(TransportKind::Fifo, &base).unwrap();

        channel.send_response(PipeResponse::new("big", Some("z".repeat(200 * 1024))));
        thread::sleep(Duration::from_millis(200));

        let started = Instant::now();
        channel.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(channel.health(), ChannelHealth::default());
        cleanup(&base);
    }

    #[cfg(unix)]
    #[test]
    fn fifo_transport_round_trip() {
        use nmrelay_transport::FifoTransport;

        let base = make_sock_path("fifo").with_extension("");
        let channel = PipeChannel::new(
            Arc::new(FifoTransport::new(&base)),
            PipeConfig {
                poll_interval: Duration::from_millis(20),
                ..PipeConfig::default()
            },
        );
        channel.start().unwrap();

        let mut client = PipeClient::connect(TransportKind::Fifo, &base).unwrap();
        client.send(br#"{"action":"urlInfo"}"#).unwrap();
        assert_eq!(
            channel.read_request(Duration::from_secs(5)).unwrap().action,
            "urlInfo"
        );

        channel.send_response(PipeResponse::new("urlInfo", None));
        assert_eq!(recv_text(&mut client), r#"{"action":"urlInfo","data":""}"#);

        let started = Instant::now();
        channel.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
        cleanup(&base);
    }
}
