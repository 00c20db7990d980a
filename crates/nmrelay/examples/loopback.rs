//! In-process relay with a simulated browser extension.
//!
//! Run with:
//!   cargo run --example loopback
//!
//! A socket pair stands in for the browser's stdin/stdout; the "extension"
//! answers every action with a small JSON document.

use std::fs;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nmrelay::bridge::{BridgeConfig, ExtensionChannel, PipeChannel, RelayOrchestrator};
use nmrelay::frame::{FrameReader, FrameWriter};
use nmrelay::transport::{PipeClient, TransportKind, UnixSocketTransport};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sock_dir = std::env::temp_dir().join(format!("nmrelay-loopback-{}", std::process::id()));
    fs::create_dir_all(&sock_dir)?;
    let sock_path = sock_dir.join("relay.sock");

    let (host, browser) = UnixStream::pair()?;
    host.set_read_timeout(Some(Duration::from_millis(200)))?;
    let host_out = host.try_clone()?;

    let extension_thread = thread::spawn(move || -> Result<(), BoxError> {
        let mut reader = FrameReader::new(browser.try_clone()?);
        let mut writer = FrameWriter::new(browser);
        while let Ok(frame) = reader.read_frame() {
            let request: serde_json::Value = serde_json::from_slice(&frame.payload)?;
            eprintln!("extension got {request}");
            let reply = serde_json::json!({ "echo": request["action"] }).to_string();
            writer.send(reply.as_bytes())?;
        }
        Ok(())
    });

    let config = BridgeConfig::default();
    let extension = Arc::new(ExtensionChannel::new(host, host_out, config.extension));
    let pipe = Arc::new(PipeChannel::new(
        Arc::new(UnixSocketTransport::new(&sock_path)?),
        config.pipe,
    ));
    pipe.start()?;
    extension.start()?;
    let relay = RelayOrchestrator::new(extension, pipe, config.relay);
    relay.start()?;
    eprintln!("Relaying on {}", sock_path.display());

    let mut client = PipeClient::connect(TransportKind::Socket, &sock_path)?;
    for action in ["urlInfo", "tabInfo"] {
        client.send(format!(r#"{{"action":"{action}"}}"#).as_bytes())?;
        let mut buf = [0u8; 1024];
        let n = client.recv(&mut buf, Duration::from_secs(5))?;
        println!("{}", String::from_utf8_lossy(&buf[..n]));
    }

    relay.stop();
    drop(relay);
    let _ = extension_thread.join();
    let _ = fs::remove_dir_all(&sock_dir);
    Ok(())
}
