//! Config commands - read and write the configuration namespace.

use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use control_plane_shared_types::{ConfigMap, Envelope};

use crate::client::ApiClient;
use crate::output::{self, print_data, print_serialized};
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show every stored configuration key
    Get,
    /// Store one or more keys and rewrite the env mirror
    Set(SetArgs),
}

#[derive(Args)]
pub struct SetArgs {
    /// Entries in KEY=VALUE format
    #[arg(required = true, value_parser = parse_key_value)]
    entries: Vec<(String, String)>,
}

/// Parse `KEY=VALUE`. The value may itself contain `=`.
pub fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("Invalid format '{}', expected KEY=VALUE", s)),
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct ConfigResponse {
    success: bool,
    config: ConfigMap,
}

#[derive(Debug, Deserialize, Serialize)]
struct MirrorInfo {
    path: String,
    in_sync: bool,
}

#[derive(Debug, Deserialize, Serialize)]
struct SaveResponse {
    #[serde(flatten)]
    envelope: Envelope,
    keys: Vec<String>,
    env_mirror: MirrorInfo,
}

#[derive(Debug, Serialize, Tabled)]
struct ConfigRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
}

pub async fn execute(command: ConfigCommand, api_url: &str, format: OutputFormat) -> anyhow::Result<()> {
    let client = ApiClient::new(api_url);

    match command {
        ConfigCommand::Get => {
            let response: ConfigResponse = client.get("/api/config").await?;
            if format != OutputFormat::Table {
                print_serialized(&response.config, format)?;
                return Ok(());
            }
            let rows: Vec<ConfigRow> = response
                .config
                .into_iter()
                .map(|(key, value)| ConfigRow { key, value })
                .collect();
            print_data(&rows, format)?;
        }
        ConfigCommand::Set(args) => {
            let config: ConfigMap = args.entries.into_iter().collect();
            let response: SaveResponse = client.post("/api/config", &config).await?;
            if format != OutputFormat::Table {
                print_serialized(&response, format)?;
                return Ok(());
            }
            if let Some(message) = &response.envelope.output {
                output::success(message);
            }
            if !response.env_mirror.in_sync {
                output::warn(&format!(
                    "Env mirror {} is out of date; it will be rewritten on the next save",
                    response.env_mirror.path
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("S3_BUCKET=backups").unwrap(),
            ("S3_BUCKET".to_string(), "backups".to_string())
        );
        assert_eq!(
            parse_key_value("URL=http://h/?a=b").unwrap(),
            ("URL".to_string(), "http://h/?a=b".to_string())
        );
        assert_eq!(parse_key_value("EMPTY=").unwrap().1, "");
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }
}
