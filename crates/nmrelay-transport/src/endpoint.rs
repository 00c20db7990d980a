use std::path::{Path, PathBuf};

use crate::error::{Result, TransportError};
use crate::traits::{PipeTransport, TransportKind};

/// Well-known endpoint name the companion application connects to.
pub const DEFAULT_ENDPOINT: &str = "com.snapcast.chrome.nativehost.service";

/// Resolve an endpoint name to a filesystem path for the given transport.
///
/// Names containing `/` are used verbatim. Bare names land in the system temp
/// directory: `<tmp>/<name>.sock` for sockets, `<tmp>/<name>` as the FIFO base.
pub fn endpoint_path(name: &str, kind: TransportKind) -> PathBuf {
    if name.contains('/') {
        return PathBuf::from(name);
    }
    let dir = std::env::temp_dir();
    match kind {
        TransportKind::Socket => dir.join(format!("{name}.sock")),
        TransportKind::Fifo => dir.join(name),
    }
}

/// Construct the transport for `kind` at `path` without opening it.
pub fn transport_for(
    kind: TransportKind,
    path: impl AsRef<Path>,
) -> Result<Box<dyn PipeTransport>> {
    #[cfg(unix)]
    {
        let path = path.as_ref();
        match kind {
            TransportKind::Socket => Ok(Box::new(crate::uds::UnixSocketTransport::new(path)?)),
            TransportKind::Fifo => Ok(Box::new(crate::fifo::FifoTransport::new(path))),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = (kind, path);
        Err(TransportError::Unsupported(
            "windows named pipes are not implemented",
        ))
    }
}

/// Validate a socket path against the platform's `sun_path` limit.
#[cfg(unix)]
pub(crate) fn check_socket_path(path: &Path) -> Result<()> {
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    let len = path.as_os_str().len();
    if len >= MAX_PATH_LEN {
        return Err(TransportError::PathTooLong {
            path: path.to_path_buf(),
            len,
            max: MAX_PATH_LEN,
        });
    }
    Ok(())
}
