use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::sys::{lock, poll_writable};
use crate::traits::PipeTransport;

/// Granularity of a wait for response space; each step re-checks `closed`.
const WRITE_STEP: Duration = Duration::from_millis(100);

/// Suffix of the FIFO carrying requests from the client to the relay.
pub const REQUEST_SUFFIX: &str = "in";
/// Suffix of the FIFO carrying responses from the relay to the client.
pub const RESPONSE_SUFFIX: &str = "out";

/// Paths of the request and response FIFOs for a base path.
pub fn fifo_paths(base: &Path) -> (PathBuf, PathBuf) {
    let with_suffix = |suffix: &str| {
        let mut name = base.as_os_str().to_os_string();
        name.push(".");
        name.push(suffix);
        PathBuf::from(name)
    };
    (with_suffix(REQUEST_SUFFIX), with_suffix(RESPONSE_SUFFIX))
}

/// Named-pipe backend: one FIFO per direction.
///
/// Both FIFOs are opened read+write by the relay, so opening never waits for
/// a client and reads never see end-of-stream. Each client write of at most
/// `PIPE_BUF` bytes arrives as one chunk.
///
/// Responses are written whole: once the first byte of a response is in the
/// FIFO the sender waits for the reader to make room, however long that
/// takes, until the transport is closed. A response that finds the FIFO full
/// for longer than the write timeout is dropped before any of it is written.
///
/// The relay keeps `<base>.out` open, so responses nobody reads stay in the
/// FIFO and are read by whichever client opens it next. Clients should read
/// the answer to every request they send.
pub struct FifoTransport {
    base: PathBuf,
    request_path: PathBuf,
    response_path: PathBuf,
    mode: u32,
    write_timeout: Duration,
    inbound: Mutex<Option<Arc<File>>>,
    outbound: Mutex<Option<File>>,
    opened: AtomicBool,
    closed: AtomicBool,
}

impl FifoTransport {
    /// Default permission mode for created FIFOs.
    pub const DEFAULT_FIFO_MODE: u32 = 0o600;
    /// Default bound on how long a response may wait for FIFO space before it starts.
    pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Prepare a transport rooted at `base`. Nothing is created until `open`.
    pub fn new(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref().to_path_buf();
        let (request_path, response_path) = fifo_paths(&base);
        Self {
            base,
            request_path,
            response_path,
            mode: Self::DEFAULT_FIFO_MODE,
            write_timeout: Self::DEFAULT_WRITE_TIMEOUT,
            inbound: Mutex::new(None),
            outbound: Mutex::new(None),
            opened: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Override the permission mode applied to created FIFOs.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Override how long a response may wait for FIFO space before it starts.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// FIFO the client writes requests into.
    pub fn request_path(&self) -> &Path {
        &self.request_path
    }

    /// FIFO the client reads responses from.
    pub fn response_path(&self) -> &Path {
        &self.response_path
    }

    fn make_fifo(&self, path: &Path) -> Result<()> {
        let bind_err = |source: std::io::Error| TransportError::Bind {
            path: path.to_path_buf(),
            source,
        };

        match std::fs::symlink_metadata(path) {
            Ok(metadata) if metadata.file_type().is_fifo() => {
                debug!(?path, "reusing existing fifo");
                return Ok(());
            }
            Ok(_) => {
                return Err(bind_err(std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    "existing path is not a fifo",
                )));
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(bind_err(err)),
        }

        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            bind_err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "path contains an interior NUL byte",
            ))
        })?;

        // SAFETY: `c_path` is a valid NUL-terminated string that outlives the call.
        let rc = unsafe { libc::mkfifo(c_path.as_ptr(), self.mode as libc::mode_t) };
        if rc == -1 {
            return Err(bind_err(std::io::Error::last_os_error()));
        }

        // mkfifo honours the umask; apply the exact mode afterwards.
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(self.mode))
            .map_err(bind_err)?;
        Ok(())
    }

    fn open_fifo(path: &Path, nonblocking: bool) -> Result<File> {
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        if nonblocking {
            options.custom_flags(libc::O_NONBLOCK);
        }
        options.open(path).map_err(|source| TransportError::Open {
            path: path.to_path_buf(),
            source,
        })
    }

    fn unlink_fifo(path: &Path) -> Result<()> {
        match std::fs::symlink_metadata(path) {
            Ok(metadata) if metadata.file_type().is_fifo() => {
                debug!(?path, "removing fifo");
                std::fs::remove_file(path)?;
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl PipeTransport for FifoTransport {
    fn open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Shutdown);
        }
        if self.opened.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.make_fifo(&self.request_path)?;
        self.make_fifo(&self.response_path)?;

        let inbound = Self::open_fifo(&self.request_path, false)?;
        // Non-blocking so a full FIFO surfaces as WouldBlock and the sender can poll.
        let outbound = Self::open_fifo(&self.response_path, true)?;

        *lock(&self.inbound) = Some(Arc::new(inbound));
        *lock(&self.outbound) = Some(outbound);
        self.opened.store(true, Ordering::SeqCst);

        info!(base = ?self.base, "listening on fifo pair");
        Ok(())
    }

    fn read_chunk(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Shutdown);
            }
            let file = lock(&self.inbound).clone().ok_or(TransportError::NotOpen)?;

            match (&*file).read(buf) {
                _ if self.closed.load(Ordering::SeqCst) => return Err(TransportError::Shutdown),
                Ok(0) => return Err(TransportError::Disconnected),
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    fn write_chunk(&self, data: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Shutdown);
        }

        let guard = lock(&self.outbound);
        let Some(file) = guard.as_ref() else {
            return Err(TransportError::NotOpen);
        };

        let mut written = 0usize;
        let started = Instant::now();
        while written < data.len() {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Shutdown);
            }
            match (&*file).write(&data[written..]) {
                Ok(0) => return Err(TransportError::Io(ErrorKind::WriteZero.into())),
                Ok(n) => written += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if written == 0 && started.elapsed() >= self.write_timeout {
                        return Err(TransportError::Io(std::io::Error::new(
                            ErrorKind::WouldBlock,
                            "response fifo is full",
                        )));
                    }
                    poll_writable(file.as_raw_fd(), WRITE_STEP)?;
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

        if let Some(inbound) = lock(&self.inbound).take() {
            // Wake a reader parked in read(); it re-checks `closed` and bails.
            let _ = (&*inbound).write(b"\n");
        }
        // A sender waiting for FIFO space notices `closed` within one step.
        lock(&self.outbound).take();

        if !self.opened.load(Ordering::SeqCst) {
            return Ok(());
        }
        let request = Self::unlink_fifo(&self.request_path);
        let response = Self::unlink_fifo(&self.response_path);
        request.and(response)
    }

    fn endpoint(&self) -> &Path {
        &self.base
    }

    fn transport_name(&self) -> &'static str {
        "fifo"
    }
}

impl Drop for FifoTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for FifoTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FifoTransport")
            .field("base", &self.base)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}
