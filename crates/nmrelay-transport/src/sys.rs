//! Small OS helpers shared by the transports and the stdio source.

use std::os::fd::RawFd;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Wait until `fd` is readable (or hung up) for at most `timeout`.
///
/// Returns `Ok(false)` when the timeout elapsed with nothing to read.
pub fn poll_readable(fd: RawFd, timeout: Duration) -> std::io::Result<bool> {
    poll_one(fd, libc::POLLIN, timeout)
}

/// Wait until `fd` accepts more output for at most `timeout`.
///
/// Errors and hang-ups also report ready; the following write surfaces them.
/// On a pipe, ready means at least `PIPE_BUF` bytes can be written.
pub fn poll_writable(fd: RawFd, timeout: Duration) -> std::io::Result<bool> {
    poll_one(fd, libc::POLLOUT, timeout)
}

fn poll_one(fd: RawFd, events: libc::c_short, timeout: Duration) -> std::io::Result<bool> {
    let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };

    loop {
        // SAFETY: `pfd` is a valid, writable pollfd and we pass a count of exactly one.
        let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
        if rc >= 0 {
            return Ok(rc > 0);
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn idle_descriptor_times_out() {
        let (left, _right) = UnixStream::pair().unwrap();
        let ready = poll_readable(left.as_raw_fd(), Duration::from_millis(20)).unwrap();
        assert!(!ready);
    }

    #[test]
    fn pending_data_is_readable() {
        let (left, mut right) = UnixStream::pair().unwrap();
        right.write_all(b"x").unwrap();
        let ready = poll_readable(left.as_raw_fd(), Duration::from_millis(500)).unwrap();
        assert!(ready);
    }

    #[test]
    fn fresh_socket_is_writable() {
        let (left, _right) = UnixStream::pair().unwrap();
        assert!(poll_writable(left.as_raw_fd(), Duration::from_millis(500)).unwrap());
    }

    #[test]
    fn full_socket_is_not_writable() {
        let (left, _right) = UnixStream::pair().unwrap();
        left.set_nonblocking(true).unwrap();
        let chunk = [0u8; 4096];
        while (&left).write(&chunk).is_ok() {}

        let ready = poll_writable(left.as_raw_fd(), Duration::from_millis(20)).unwrap();
        assert!(!ready);
    }

    #[test]
    fn hangup_is_readable() {
        let (left, right) = UnixStream::pair().unwrap();
        drop(right);
        let ready = poll_readable(left.as_raw_fd(), Duration::from_millis(500)).unwrap();
        assert!(ready);
    }
}
