use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use nmrelay_transport::{endpoint_path, TransportKind, DEFAULT_ENDPOINT};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod doctor;
pub mod run;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one action through a running relay and print the response.
    Send(SendArgs),
    /// Run local environment health checks.
    Doctor(DoctorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn dispatch(command: Command, endpoint: &EndpointArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, endpoint, format),
        Command::Doctor(args) => doctor::run(args, endpoint, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum TransportArg {
    /// Unix domain socket.
    Socket,
    /// Named FIFO pair (`<endpoint>.in`, `<endpoint>.out`).
    Fifo,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Socket => TransportKind::Socket,
            TransportArg::Fifo => TransportKind::Fifo,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct EndpointArgs {
    /// Local pipe endpoint: a name placed in the temp dir, or a path.
    #[arg(
        long,
        value_name = "NAME",
        env = "NMRELAY_ENDPOINT",
        default_value = DEFAULT_ENDPOINT,
        global = true
    )]
    pub endpoint: String,

    /// Local pipe transport.
    #[arg(
        long,
        value_name = "KIND",
        env = "NMRELAY_TRANSPORT",
        default_value = "socket",
        global = true
    )]
    pub transport: TransportArg,
}

impl EndpointArgs {
    pub fn kind(&self) -> TransportKind {
        self.transport.into()
    }

    pub fn path(&self) -> PathBuf {
        endpoint_path(&self.endpoint, self.kind())
    }
}

/// Options of the relay itself (no subcommand).
#[derive(Args, Debug)]
pub struct RunArgs {
    /// How long each relay iteration waits for a pipe request (e.g. 2s, 500ms).
    #[arg(long, value_name = "DURATION", default_value = "2s")]
    pub request_timeout: String,

    /// How long to wait for the extension to answer an action.
    #[arg(long, value_name = "DURATION", default_value = "500ms")]
    pub response_timeout: String,

    /// Keep relaying after the browser closes stdin.
    #[arg(long)]
    pub keep_alive: bool,

    /// Native window handle passed by Chrome on Windows.
    #[arg(long, value_name = "HANDLE", hide = true)]
    pub parent_window: Option<String>,

    /// Arguments supplied by the browser (extension origin, or manifest path and extension id).
    #[arg(value_name = "BROWSER_ARG")]
    pub browser_args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Action to request from the extension.
    pub action: String,
    /// Maximum time to wait for the relay's response (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
