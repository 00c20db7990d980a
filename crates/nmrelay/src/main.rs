mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;

use crate::cmd::{Command, EndpointArgs, RunArgs};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "nmrelay",
    version,
    about = "Native messaging host relaying browser extension actions to a local pipe"
)]
struct Cli {
    /// Output format for subcommands.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format.
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level.
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Append logs to this file instead of stderr.
    #[arg(long, value_name = "PATH", env = "NMRELAY_LOG_FILE", global = true)]
    log_file: Option<PathBuf>,

    #[command(flatten)]
    endpoint: EndpointArgs,

    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level, cli.log_file.as_deref());

    let result = match cli.command {
        None => cmd::run::run(cli.run, &cli.endpoint),
        Some(command) => {
            let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
            cmd::dispatch(command, &cli.endpoint, format)
        }
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            tracing::error!(code = err.code, "{err}");
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::TransportArg;

    #[test]
    fn no_subcommand_runs_the_relay_with_browser_args() {
        let cli = Cli::try_parse_from([
            "nmrelay",
            "chrome-extension://abcdefghijklmnop/",
            "--parent-window=0",
        ])
        .expect("browser launch args should parse");

        assert!(cli.command.is_none());
        assert_eq!(cli.run.browser_args, ["chrome-extension://abcdefghijklmnop/"]);
        assert_eq!(cli.run.parent_window.as_deref(), Some("0"));
        assert!(!cli.run.keep_alive);
    }

    #[test]
    fn firefox_launch_args_parse() {
        let cli = Cli::try_parse_from([
            "nmrelay",
            "/usr/lib/mozilla/native-messaging-hosts/relay.json",
            "relay@example.org",
        ])
        .expect("firefox launch args should parse");
        assert_eq!(cli.run.browser_args.len(), 2);
    }

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "nmrelay",
            "send",
            "urlInfo",
            "--endpoint",
            "/tmp/relay.sock",
            "--timeout",
            "2s",
        ])
        .expect("send args should parse");

        assert_eq!(cli.endpoint.endpoint, "/tmp/relay.sock");
        match cli.command {
            Some(Command::Send(args)) => {
                assert_eq!(args.action, "urlInfo");
                assert_eq!(args.timeout, "2s");
            }
            other => panic!("expected send, got {other:?}"),
        }
    }

    #[test]
    fn parses_transport_and_relay_options() {
        let cli = Cli::try_parse_from([
            "nmrelay",
            "--transport",
            "fifo",
            "--request-timeout",
            "1s",
            "--response-timeout",
            "250ms",
            "--keep-alive",
        ])
        .expect("relay options should parse");

        assert_eq!(cli.endpoint.transport, TransportArg::Fifo);
        assert_eq!(cli.run.request_timeout, "1s");
        assert_eq!(cli.run.response_timeout, "250ms");
        assert!(cli.run.keep_alive);
    }

    #[test]
    fn rejects_unknown_transport() {
        let err = Cli::try_parse_from(["nmrelay", "--transport", "pipe"])
            .expect_err("unknown transport should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }
}
