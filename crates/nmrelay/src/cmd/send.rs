use std::time::{Duration, Instant};

use nmrelay_bridge::{PipeRequest, PipeResponse};
use nmrelay_transport::{PipeClient, TransportError};

use crate::cmd::{parse_duration, EndpointArgs, SendArgs};
use crate::exit::{transport_error, CliError, CliResult, DATA_INVALID, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_response, OutputFormat};

pub fn run(args: SendArgs, endpoint: &EndpointArgs, format: OutputFormat) -> CliResult<i32> {
    if args.action.is_empty() {
        // The relay silently drops requests without an action.
        return Err(CliError::new(USAGE, "action must not be empty"));
    }
    let timeout = parse_duration(&args.timeout)?;
    let path = endpoint.path();

    let mut client = PipeClient::connect(endpoint.kind(), &path)
        .map_err(|err| transport_error("connect failed", err))?;
    let payload = serde_json::to_vec(&PipeRequest::new(args.action))
        .map_err(|err| CliError::new(DATA_INVALID, format!("failed to encode request: {err}")))?;
    client
        .send(&payload)
        .map_err(|err| transport_error("send failed", err))?;

    let response = read_response(&mut client, timeout)?;
    print_response(&response, &path, format);
    Ok(SUCCESS)
}

trait ResponseSource {
    fn recv_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;
}

impl ResponseSource for PipeClient {
    fn recv_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        self.recv(buf, timeout)
    }
}

/// Collect chunks until they form one complete response document.
fn read_response<S: ResponseSource>(source: &mut S, timeout: Duration) -> CliResult<PipeResponse> {
    let deadline = Instant::now() + timeout;
    let mut pending = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(CliError::new(
                TIMEOUT,
                format!("no response within {timeout:?}"),
            ));
        }

        let read = source
            .recv_chunk(&mut buf, remaining)
            .map_err(|err| transport_error("receive failed", err))?;
        pending.extend_from_slice(&buf[..read]);

        match serde_json::from_slice::<PipeResponse>(&pending) {
            Ok(response) => return Ok(response),
            Err(err) if err.is_eof() => continue,
            Err(err) => {
                return Err(CliError::new(
                    DATA_INVALID,
                    format!("relay sent an invalid response: {err}"),
                ))
            }
        }
    }
}
