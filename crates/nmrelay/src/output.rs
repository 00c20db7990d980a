use std::io::IsTerminal;
use std::path::Path;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use nmrelay_bridge::PipeResponse;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ResponseOutput<'a> {
    action: &'a str,
    answered: bool,
    data: &'a str,
    endpoint: String,
}

pub fn print_response(response: &PipeResponse, endpoint: &Path, format: OutputFormat) {
    let answered = !response.data.is_empty();
    match format {
        OutputFormat::Json => {
            let out = ResponseOutput {
                action: &response.action,
                answered,
                data: &response.data,
                endpoint: endpoint.display().to_string(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ACTION", "ANSWERED", "DATA"])
                .add_row(vec![
                    response.action.clone(),
                    answered.to_string(),
                    data_preview(&response.data),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "action={} answered={} data={}",
                response.action,
                answered,
                data_preview(&response.data)
            );
        }
    }
}

/// Extension messages are usually JSON; show them indented when they are.
fn data_preview(data: &str) -> String {
    if data.is_empty() {
        return "<no response>".to_string();
    }
    serde_json::from_str::<serde_json::Value>(data)
        .and_then(|value| serde_json::to_string_pretty(&value))
        .unwrap_or_else(|_| data.to_string())
}
