use std::io::{ErrorKind, Read, Write};
use std::net::Shutdown;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::endpoint::check_socket_path;
use crate::error::{Result, TransportError};
use crate::sys::lock;
use crate::traits::PipeTransport;

/// Granularity of a stalled write; each step re-checks `closed`.
const WRITE_STEP: Duration = Duration::from_millis(100);

/// Unix domain socket backend for the local pipe.
///
/// Serves one client at a time. When the client hangs up the next
/// [`read_chunk`](PipeTransport::read_chunk) accepts the next one, so the
/// companion application can restart without restarting the relay.
///
/// A client that stops reading stalls responses for at most the write
/// timeout: a response that has not started is dropped, and a client left
/// holding half a response is disconnected.
pub struct UnixSocketTransport {
    path: PathBuf,
    mode: u32,
    write_timeout: Duration,
    listener: Mutex<Option<UnixListener>>,
    created_inode: Mutex<Option<(u64, u64)>>,
    /// Write half of the current client, held by the sender for a whole response.
    writer: Mutex<Option<UnixStream>>,
    /// Read half of the current client, owned by the receiving thread.
    reader: Mutex<Option<UnixStream>>,
    /// Handle used only to shut the current client down; never held across I/O.
    control: Mutex<Option<UnixStream>>,
    closed: AtomicBool,
}

impl UnixSocketTransport {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Default bound on how long one response may wait for a client to read.
    pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Prepare a transport for `path`. Nothing is created until `open`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        check_socket_path(&path)?;
        Ok(Self {
            path,
            mode: Self::DEFAULT_SOCKET_MODE,
            write_timeout: Self::DEFAULT_WRITE_TIMEOUT,
            listener: Mutex::new(None),
            created_inode: Mutex::new(None),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            control: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Override the permission mode applied to the socket file.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Override how long a response may stall on a client that is not reading.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    fn bind(&self) -> Result<UnixListener> {
        let path = &self.path;
        let bind_err = |source: std::io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };

        // Remove a stale socket, but never remove non-socket files.
        if let Ok(metadata) = std::fs::symlink_metadata(path) {
            if metadata.file_type().is_socket() {
                debug!(?path, "removing stale socket");
                std::fs::remove_file(path).map_err(bind_err)?;
            } else {
                return Err(bind_err(std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
        }

        let listener = UnixListener::bind(path).map_err(bind_err)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(self.mode))
            .map_err(bind_err)?;
        let created = std::fs::symlink_metadata(path).map_err(bind_err)?;
        *lock(&self.created_inode) = Some((created.dev(), created.ino()));

        info!(?path, "listening on unix domain socket");
        Ok(listener)
    }

    fn accept_client(&self) -> Result<UnixStream> {
        let listener = {
            let guard = lock(&self.listener);
            match guard.as_ref() {
                Some(listener) => listener.try_clone()?,
                None if self.closed.load(Ordering::SeqCst) => return Err(TransportError::Shutdown),
                None => return Err(TransportError::NotOpen),
            }
        };

        let (stream, _addr) = listener.accept().map_err(TransportError::Accept)?;
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Shutdown);
        }

        // SO_SNDTIMEO is shared by every clone; reads are unaffected.
        stream.set_write_timeout(Some(WRITE_STEP))?;
        let control = stream.try_clone()?;
        if let Some(previous) = lock(&self.control).replace(control) {
            let _ = previous.shutdown(Shutdown::Both);
        }
        let writer = stream.try_clone()?;
        *lock(&self.writer) = Some(writer);
        info!(path = ?self.path, "pipe client connected");
        Ok(stream)
    }

    /// Shut the current client down. A sender mid-write fails with EPIPE.
    fn drop_client(&self) {
        if let Some(stream) = lock(&self.control).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn remove_socket_file(&self) -> Result<()> {
        let Some((expected_dev, expected_ino)) = lock(&self.created_inode).take() else {
            return Ok(());
        };
        match std::fs::symlink_metadata(&self.path) {
            Ok(metadata)
                if metadata.file_type().is_socket()
                    && metadata.dev() == expected_dev
                    && metadata.ino() == expected_ino =>
            {
                debug!(path = ?self.path, "cleaning up socket file");
                std::fs::remove_file(&self.path)?;
            }
            Ok(_) => {
                debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }
}

impl PipeTransport for UnixSocketTransport {
    fn open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Shutdown);
        }
        let mut guard = lock(&self.listener);
        if guard.is_none() {
            *guard = Some(self.bind()?);
        }
        Ok(())
    }

    fn read_chunk(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut reader = lock(&self.reader);
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Shutdown);
            }

            if reader.is_none() {
                *reader = Some(self.accept_client()?);
            }
            let Some(stream) = reader.as_mut() else {
                continue;
            };

            match stream.read(buf) {
                Ok(0) => {
                    *reader = None;
                    self.drop_client();
                    if self.closed.load(Ordering::SeqCst) {
                        return Err(TransportError::Shutdown);
                    }
                    debug!(path = ?self.path, "pipe client disconnected");
                    return Err(TransportError::Disconnected);
                }
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    *reader = None;
                    self.drop_client();
                    if self.closed.load(Ordering::SeqCst) {
                        return Err(TransportError::Shutdown);
                    }
                    return Err(TransportError::Io(err));
                }
            }
        }
    }

    fn write_chunk(&self, data: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Shutdown);
        }

        let mut guard = lock(&self.writer);
        let Some(stream) = guard.as_mut() else {
            return Err(TransportError::NotConnected);
        };

        let mut written = 0usize;
        let mut stalled_since: Option<Instant> = None;
        while written < data.len() {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Shutdown);
            }
            match stream.write(&data[written..]) {
                Ok(0) => {
                    guard.take();
                    return Err(TransportError::Disconnected);
                }
                Ok(n) => {
                    written += n;
                    stalled_since = None;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    let since = *stalled_since.get_or_insert_with(Instant::now);
                    if since.elapsed() < self.write_timeout {
                        continue;
                    }
                    if written == 0 {
                        return Err(TransportError::Io(std::io::Error::new(
                            ErrorKind::TimedOut,
                            "pipe client is not reading responses",
                        )));
                    }
                    warn!(
                        path = ?self.path,
                        written,
                        total = data.len(),
                        "pipe client stalled mid-response; disconnecting"
                    );
                    if let Some(stream) = guard.take() {
                        let _ = stream.shutdown(Shutdown::Both);
                    }
                    return Err(TransportError::Disconnected);
                }
                Err(_) if self.closed.load(Ordering::SeqCst) => {
                    return Err(TransportError::Shutdown);
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::NotConnected
                    ) =>
                {
                    guard.take();
                    return Err(TransportError::Disconnected);
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Shutting down the shared socket releases a reader parked in read()
        // and a sender parked in write(), without waiting for either lock.
        self.drop_client();

        let listener = lock(&self.listener).take();
        if listener.is_some() {
            // A reader parked in accept() holds a cloned listener; hand it a
            // throwaway connection so it returns and observes `closed`.
            let _ = UnixStream::connect(&self.path);
        }
        drop(listener);

        self.remove_socket_file()
    }

    fn endpoint(&self) -> &Path {
        &self.path
    }

    fn transport_name(&self) -> &'static str {
        "unix-domain-socket"
    }
}

impl Drop for UnixSocketTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for UnixSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixSocketTransport")
            .field("path", &self.path)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn sock_path(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "nmr-uds-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("relay.sock")
    }

    fn cleanup(path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn read_and_write_with_one_client() {
        let path = sock_path("rw");
        let transport = UnixSocketTransport::new(&path).unwrap();
        transport.open().unwrap();

        let mut client = UnixStream::connect(&path).unwrap();
        client.write_all(b"{\"action\":\"tabInfo\"}").unwrap();

        let mut buf = [0u8; 64];
        let n = transport.read_chunk(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"{\"action\":\"tabInfo\"}");

        transport.write_chunk(b"reply").unwrap();
        let mut reply = [0u8; 5];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"reply");

        transport.close().unwrap();
        assert!(!path.exists(), "socket file should be removed on close");
        cleanup(&path);
    }

    #[test]
    fn write_without_client_is_transient() {
        let path = sock_path("noclient");
        let transport = UnixSocketTransport::new(&path).unwrap();
        transport.open().unwrap();

        let err = transport.write_chunk(b"lost").unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
        assert!(err.is_transient());
        cleanup(&path);
    }

    #[test]
    fn disconnect_then_reconnect() {
        let path = sock_path("reconnect");
        let transport = UnixSocketTransport::new(&path).unwrap();
        transport.open().unwrap();

        let client = UnixStream::connect(&path).unwrap();
        drop(client);

        let mut buf = [0u8; 16];
        let err = transport.read_chunk(&mut buf).unwrap_err();
        assert!(matches!(err, TransportError::Disconnected));

        let mut second = UnixStream::connect(&path).unwrap();
        second.write_all(b"again").unwrap();
        let n = transport.read_chunk(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"again");
        cleanup(&path);
    }

    #[test]
    fn close_releases_blocked_read() {
        let path = sock_path("close-read");
        let transport = Arc::new(UnixSocketTransport::new(&path).unwrap());
        transport.open().unwrap();
        let _client = UnixStream::connect(&path).unwrap();

        let reader = {
            let transport = Arc::clone(&transport);
            thread::spawn(move || {
                let mut buf = [0u8; 16];
                transport.read_chunk(&mut buf)
            })
        };

        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        transport.close().unwrap();
        let result = reader.join().unwrap();

        assert!(matches!(result, Err(TransportError::Shutdown)));
        assert!(started.elapsed() < Duration::from_secs(2));
        cleanup(&path);
    }

    #[test]
    fn close_releases_blocked_accept() {
        let path = sock_path("close-accept");
        let transport = Arc::new(UnixSocketTransport::new(&path).unwrap());
        transport.open().unwrap();

        let reader = {
            let transport = Arc::clone(&transport);
            thread::spawn(move || {
                let mut buf = [0u8; 16];
                transport.read_chunk(&mut buf)
            })
        };

        thread::sleep(Duration::from_millis(50));
        transport.close().unwrap();
        let result = reader.join().unwrap();
        assert!(matches!(result, Err(TransportError::Shutdown)));
        cleanup(&path);
    }

    fn accept_reading_client(transport: &UnixSocketTransport, path: &Path) -> UnixStream {
        let mut client = UnixStream::connect(path).unwrap();
        client.write_all(b"{\"action\":\"x\"}").unwrap();
        let mut buf = [0u8; 64];
        transport.read_chunk(&mut buf).unwrap();
        client
    }

    #[test]
    fn close_releases_sender_stalled_on_unread_client() {
        let path = sock_path("stalled-close");
        let transport = Arc::new(UnixSocketTransport::new(&path).unwrap());
        transport.open().unwrap();
        let _client = accept_reading_client(&transport, &path);

        let writer = {
            let transport = Arc::clone(&transport);
            thread::spawn(move || transport.write_chunk(&vec![b'x'; 4 * 1024 * 1024]))
        };

        thread::sleep(Duration::from_millis(200));
        let started = Instant::now();
        transport.close().unwrap();
        let result = writer.join().unwrap();

        assert!(matches!(result, Err(TransportError::Shutdown)));
        assert!(started.elapsed() < Duration::from_secs(2));
        cleanup(&path);
    }

    #[test]
    fn client_stalled_mid_response_is_disconnected() {
        let path = sock_path("stalled-timeout");
        let transport =
            UnixSocketTransport::new(&path).unwrap().with_write_timeout(Duration::from_millis(200));
        transport.open().unwrap();
        let mut client = accept_reading_client(&transport, &path);

        let started = Instant::now();
        let err = transport.write_chunk(&vec![b'x'; 4 * 1024 * 1024]).unwrap_err();
        assert!(matches!(err, TransportError::Disconnected));
        assert!(started.elapsed() < Duration::from_secs(3));

        // The client sees end-of-stream after the partial response, never a spliced one.
        let mut sink = Vec::new();
        client.read_to_end(&mut sink).unwrap();
        assert!(sink.len() < 4 * 1024 * 1024);

        transport.close().unwrap();
        cleanup(&path);
    }

    #[test]
    fn open_applies_hardened_permissions() {
        let path = sock_path("perms");
        let transport = UnixSocketTransport::new(&path).unwrap();
        transport.open().unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        cleanup(&path);
    }

    #[test]
    fn open_rejects_existing_non_socket_file() {
        let path = sock_path("regular");
        std::fs::write(&path, b"regular-file").unwrap();

        let transport = UnixSocketTransport::new(&path).unwrap();
        let result = transport.open();
        assert!(matches!(result, Err(TransportError::Bind { .. })));
        assert!(path.exists(), "non-socket files must never be removed");
        cleanup(&path);
    }

    #[test]
    fn close_skips_replaced_path() {
        let path = sock_path("replaced");
        let transport = UnixSocketTransport::new(&path).unwrap();
        transport.open().unwrap();

        std::fs::remove_file(&path).unwrap();
        std::fs::write(&path, b"replacement-file").unwrap();

        transport.close().unwrap();
        assert!(path.exists(), "close must not remove a path it did not create");
        cleanup(&path);
    }
}
