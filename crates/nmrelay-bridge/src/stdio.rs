use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::time::Duration;

use nmrelay_transport::sys::{poll_readable, poll_writable};

/// Largest write issued after a readiness check. POSIX guarantees `PIPE_BUF`
/// is at least this, and a pipe reporting writable has room for `PIPE_BUF`.
const WRITE_CHUNK: usize = 512;

/// Unbuffered reader over the browser's stdin that never blocks for long.
///
/// Each read waits at most `poll_interval` for input and otherwise fails
/// with [`ErrorKind::TimedOut`], which `FrameReader` callers treat as idle.
/// That lets the extension reader notice `stop()` without closing stdin.
#[derive(Debug)]
pub struct StdinSource {
    file: File,
    poll_interval: Duration,
}

impl StdinSource {
    /// Duplicate the process's stdin descriptor.
    pub fn new(poll_interval: Duration) -> io::Result<Self> {
        let fd = io::stdin().as_fd().try_clone_to_owned()?;
        Ok(Self::from_fd(fd, poll_interval))
    }

    /// Read from an arbitrary descriptor (a pipe or socket end).
    pub fn from_fd(fd: OwnedFd, poll_interval: Duration) -> Self {
        Self {
            file: File::from(fd),
            poll_interval,
        }
    }
}

impl Read for StdinSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !poll_readable(self.file.as_raw_fd(), self.poll_interval)? {
            return Err(io::Error::new(ErrorKind::TimedOut, "no input from extension"));
        }
        self.file.read(buf)
    }
}

/// Unbuffered writer over the browser's stdout that never blocks for long.
///
/// Each write waits at most `poll_interval` for the browser to drain the
/// pipe and otherwise fails with [`ErrorKind::TimedOut`]. `FrameWriter`
/// keeps the rest of the frame, so the extension writer can check for
/// `stop()` and resume.
#[derive(Debug)]
pub struct StdoutSink {
    file: File,
    poll_interval: Duration,
}

impl StdoutSink {
    /// Duplicate the process's stdout descriptor.
    pub fn new(poll_interval: Duration) -> io::Result<Self> {
        let fd = io::stdout().as_fd().try_clone_to_owned()?;
        Ok(Self::from_fd(fd, poll_interval))
    }

    /// Write to an arbitrary descriptor (a pipe or socket end).
    pub fn from_fd(fd: OwnedFd, poll_interval: Duration) -> Self {
        Self {
            file: File::from(fd),
            poll_interval,
        }
    }
}

impl Write for StdoutSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if !poll_writable(self.file.as_raw_fd(), self.poll_interval)? {
            return Err(io::Error::new(ErrorKind::TimedOut, "extension is not reading"));
        }
        let len = buf.len().min(WRITE_CHUNK);
        self.file.write(&buf[..len])
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::os::unix::net::UnixStream;
    use std::time::Instant;

    use super::*;

    #[test]
    fn idle_input_times_out() {
        let (left, _right) = UnixStream::pair().unwrap();
        let mut source = StdinSource::from_fd(OwnedFd::from(left), Duration::from_millis(30));

        let started = Instant::now();
        let err = source.read(&mut [0u8; 8]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn reads_available_input() {
        let (left, mut right) = UnixStream::pair().unwrap();
        right.write_all(b"hi").unwrap();
        let mut source = StdinSource::from_fd(OwnedFd::from(left), Duration::from_millis(500));

        let mut buf = [0u8; 8];
        let n = source.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi");
    }

    #[test]
    fn sink_writes_when_reader_drains() {
        let (left, mut right) = UnixStream::pair().unwrap();
        let mut sink = StdoutSink::from_fd(OwnedFd::from(left), Duration::from_millis(500));
        sink.write_all(b"frame").unwrap();

        let mut buf = [0u8; 5];
        right.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"frame");
    }

    #[test]
    fn sink_times_out_when_reader_stops_draining() {
        let (left, _right) = UnixStream::pair().unwrap();
        let mut sink = StdoutSink::from_fd(OwnedFd::from(left), Duration::from_millis(20));

        let chunk = vec![0u8; 64 * 1024];
        let started = Instant::now();
        let err = loop {
            if let Err(err) = sink.write(&chunk) {
                break err;
            }
            assert!(started.elapsed() < Duration::from_secs(5), "sink never filled");
        };
        assert_eq!(err.kind(), ErrorKind::TimedOut);
    }

    #[test]
    fn closed_input_reads_zero() {
        let (left, right) = UnixStream::pair().unwrap();
        drop(right);
        let mut source = StdinSource::from_fd(OwnedFd::from(left), Duration::from_millis(500));
        assert_eq!(source.read(&mut [0u8; 8]).unwrap(), 0);
    }
}
