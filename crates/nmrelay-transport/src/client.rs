use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::fifo::fifo_paths;
use crate::sys::poll_readable;
use crate::traits::TransportKind;

/// Companion-side connection to a relay endpoint.
#[derive(Debug)]
pub enum PipeClient {
    Socket(UnixStream),
    Fifo { requests: File, responses: File },
}

impl PipeClient {
    /// Connect to the endpoint served by a running relay.
    pub fn connect(kind: TransportKind, endpoint: impl AsRef<Path>) -> Result<Self> {
        let endpoint = endpoint.as_ref();
        match kind {
            TransportKind::Socket => {
                let stream = UnixStream::connect(endpoint).map_err(|source| {
                    TransportError::Connect {
                        path: endpoint.to_path_buf(),
                        source,
                    }
                })?;
                debug!(path = ?endpoint, "connected to relay socket");
                Ok(Self::Socket(stream))
            }
            TransportKind::Fifo => {
                let (request_path, response_path) = fifo_paths(endpoint);
                let connect_err = |path: &Path, source| TransportError::Connect {
                    path: path.to_path_buf(),
                    source,
                };
                // O_NONBLOCK makes the open fail fast (ENXIO) when no relay holds the FIFO.
                let requests = OpenOptions::new()
                    .write(true)
                    .custom_flags(libc::O_NONBLOCK)
                    .open(&request_path)
                    .map_err(|err| connect_err(&request_path, err))?;
                let responses = OpenOptions::new()
                    .read(true)
                    .custom_flags(libc::O_NONBLOCK)
                    .open(&response_path)
                    .map_err(|err| connect_err(&response_path, err))?;
                debug!(path = ?endpoint, "connected to relay fifo pair");
                Ok(Self::Fifo {
                    requests,
                    responses,
                })
            }
        }
    }

    /// Write one complete request document.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        match self {
            Self::Socket(stream) => {
                stream.write_all(payload)?;
                stream.flush()?;
            }
            Self::Fifo { requests, .. } => {
                requests.write_all(payload)?;
                requests.flush()?;
            }
        }
        Ok(())
    }

    /// Read the next chunk of response bytes, waiting at most `timeout`.
    pub fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let fd = match self {
            Self::Socket(stream) => stream.as_raw_fd(),
            Self::Fifo { responses, .. } => responses.as_raw_fd(),
        };
        if !poll_readable(fd, timeout)? {
            return Err(TransportError::Io(std::io::Error::new(
                ErrorKind::TimedOut,
                "timed out waiting for relay response",
            )));
        }

        let read = match self {
            Self::Socket(stream) => stream.read(buf)?,
            Self::Fifo { responses, .. } => responses.read(buf)?,
        };
        if read == 0 && !buf.is_empty() {
            return Err(TransportError::Disconnected);
        }
        Ok(read)
    }
}
