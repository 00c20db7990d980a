use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use nmrelay_bridge::{BridgeConfig, ExtensionChannel, PipeChannel, RelayConfig, RelayOrchestrator};
use nmrelay_transport::transport_for;
use tracing::info;

use crate::cmd::{parse_duration, EndpointArgs, RunArgs};
use crate::exit::{
    bridge_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS, TRANSPORT_ERROR,
};

/// How often the main thread checks for shutdown conditions.
const SUPERVISE_INTERVAL: Duration = Duration::from_millis(100);

/// Relay between stdin/stdout and the local pipe until interrupted.
///
/// Without `--keep-alive` the relay also exits once the browser closes
/// stdin, which is how browsers ask a native host to terminate.
pub fn run(args: RunArgs, endpoint: &EndpointArgs) -> CliResult<i32> {
    let config = BridgeConfig {
        relay: RelayConfig {
            request_timeout: parse_duration(&args.request_timeout)?,
            response_timeout: parse_duration(&args.response_timeout)?,
        },
        ..BridgeConfig::default()
    };
    info!(
        browser_args = ?args.browser_args,
        parent_window = ?args.parent_window,
        version = env!("CARGO_PKG_VERSION"),
        "native messaging host launched"
    );

    let path = endpoint.path();
    let transport = transport_for(endpoint.kind(), &path)
        .map_err(|err| transport_error("pipe transport unavailable", err))?;
    let pipe = Arc::new(PipeChannel::new(Arc::from(transport), config.pipe.clone()));
    pipe.start().map_err(|err| {
        CliError::new(
            TRANSPORT_ERROR,
            format!("pipe channel failed to start at {}: {err}", path.display()),
        )
    })?;

    let extension = match open_extension(&config) {
        Ok(extension) => Arc::new(extension),
        Err(err) => {
            pipe.stop();
            return Err(err);
        }
    };
    if let Err(err) = extension.start() {
        pipe.stop();
        return Err(bridge_error("extension channel failed to start", err));
    }

    let relay = RelayOrchestrator::new(Arc::clone(&extension), pipe, config.relay);
    if let Err(err) = relay.start() {
        relay.stop();
        return Err(bridge_error("relay failed to start", err));
    }

    let (signal_tx, signal_rx) = mpsc::channel();
    if let Err(err) = ctrlc::set_handler(move || {
        let _ = signal_tx.send(());
    }) {
        relay.stop();
        return Err(CliError::new(
            INTERNAL,
            format!("failed to install signal handler: {err}"),
        ));
    }

    loop {
        match signal_rx.recv_timeout(SUPERVISE_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                info!("interrupt received; shutting down");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
        if !args.keep_alive && !extension.health().inbound_alive {
            info!("extension input closed; shutting down");
            break;
        }
    }

    relay.stop();
    Ok(SUCCESS)
}

#[cfg(unix)]
fn open_extension(config: &BridgeConfig) -> CliResult<ExtensionChannel> {
    ExtensionChannel::from_stdio(config.extension.clone())
        .map_err(|err| bridge_error("failed to open stdio", err))
}

#[cfg(not(unix))]
fn open_extension(config: &BridgeConfig) -> CliResult<ExtensionChannel> {
    Ok(ExtensionChannel::new(
        std::io::stdin(),
        std::io::stdout(),
        config.extension.clone(),
    ))
}
