use std::path::{Path, PathBuf};

use nmrelay_transport::{transport_for, TransportKind};
use serde::Serialize;

use crate::cmd::{DoctorArgs, EndpointArgs};
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::OutputFormat;

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Info,
    Skip,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    endpoint: String,
    transport: &'static str,
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(_args: DoctorArgs, endpoint: &EndpointArgs, format: OutputFormat) -> CliResult<i32> {
    let kind = endpoint.kind();
    let path = endpoint.path();
    let checks = vec![
        platform_transport_check(),
        temp_dir_writable_check(),
        endpoint_path_check(kind, &path),
        endpoint_state_check(kind, &path),
        compiled_features_check(),
    ];

    let has_fail = checks.iter().any(|c| matches!(c.status, CheckStatus::Fail));
    let output = DoctorOutput {
        endpoint: path.display().to_string(),
        transport: kind.as_str(),
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };

    print_doctor(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("nmrelay doctor ({} at {})\n", output.transport, output.endpoint);
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<22} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Warn => "WARN",
        CheckStatus::Info => "INFO",
        CheckStatus::Skip => "SKIP",
    }
}

fn platform_transport_check() -> CheckResult {
    if cfg!(unix) {
        CheckResult::new(
            "platform_transport",
            CheckStatus::Pass,
            "Unix domain sockets and FIFOs available",
        )
    } else {
        CheckResult::new(
            "platform_transport",
            CheckStatus::Fail,
            "no local pipe backend on this platform (named pipes not implemented)",
        )
    }
}

fn temp_dir_writable_check() -> CheckResult {
    let dir = std::env::temp_dir().join(format!(
        "nmrelay-doctor-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default()
    ));
    if let Err(err) = std::fs::create_dir_all(&dir) {
        return CheckResult::new(
            "temp_dir_writable",
            CheckStatus::Fail,
            format!("{}: {err}", dir.display()),
        );
    }

    let result =
        transport_for(TransportKind::Socket, dir.join("doctor.sock")).and_then(|transport| {
            transport.open()?;
            transport.close()
        });
    let _ = std::fs::remove_dir_all(&dir);

    match result {
        Ok(()) => CheckResult::new(
            "temp_dir_writable",
            CheckStatus::Pass,
            "temp dir socket bind succeeded",
        ),
        Err(err) => CheckResult::new(
            "temp_dir_writable",
            CheckStatus::Fail,
            format!("temp dir socket bind failed: {err}"),
        ),
    }
}

fn endpoint_path_check(kind: TransportKind, path: &Path) -> CheckResult {
    match transport_for(kind, path) {
        Ok(_) => CheckResult::new("endpoint_path", CheckStatus::Pass, path.display().to_string()),
        Err(err) => CheckResult::new("endpoint_path", CheckStatus::Fail, err.to_string()),
    }
}

fn endpoint_state_check(kind: TransportKind, path: &Path) -> CheckResult {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;

        let probe: Vec<PathBuf> = match kind {
            TransportKind::Socket => vec![path.to_path_buf()],
            TransportKind::Fifo => {
                let (requests, responses) = nmrelay_transport::fifo::fifo_paths(path);
                vec![requests, responses]
            }
        };

        let mut present = Vec::new();
        for candidate in &probe {
            let Ok(metadata) = std::fs::symlink_metadata(candidate) else {
                continue;
            };
            let expected = match kind {
                TransportKind::Socket => metadata.file_type().is_socket(),
                TransportKind::Fifo => metadata.file_type().is_fifo(),
            };
            if !expected {
                return CheckResult::new(
                    "endpoint_state",
                    CheckStatus::Fail,
                    format!("{} exists and is not a {}", candidate.display(), kind.as_str()),
                );
            }
            present.push(candidate);
        }

        if present.is_empty() {
            return CheckResult::new("endpoint_state", CheckStatus::Info, "endpoint not present");
        }
        match kind {
            TransportKind::Fifo => CheckResult::new(
                "endpoint_state",
                CheckStatus::Info,
                format!("{} of 2 fifos present; existing fifos are reused", present.len()),
            ),
            TransportKind::Socket if std::os::unix::net::UnixStream::connect(path).is_ok() => {
                CheckResult::new(
                    "endpoint_state",
                    CheckStatus::Info,
                    "a relay is listening on this endpoint",
                )
            }
            TransportKind::Socket => CheckResult::new(
                "endpoint_state",
                CheckStatus::Warn,
                "stale socket; it will be replaced on start",
            ),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = (kind, path);
        CheckResult::new(
            "endpoint_state",
            CheckStatus::Skip,
            "endpoint probe not implemented on this platform",
        )
    }
}

fn compiled_features_check() -> CheckResult {
    let mut features = Vec::new();
    if cfg!(feature = "cli") {
        features.push("cli");
    }
    CheckResult::new("compiled_features", CheckStatus::Info, features.join(", "))
}
