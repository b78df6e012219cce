//! Status command - show server state and dependency health.

use std::collections::BTreeMap;

use clap::Args;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use control_plane_shared_types::{Envelope, ServerState, ServerType, ServiceHealth};

use crate::client::ApiClient;
use crate::output::{self, flag, print_data, print_serialized, section};
use crate::OutputFormat;

/// Arguments for the status command.
#[derive(Args)]
pub struct StatusArgs {
    /// Also print the raw server CLI report
    #[arg(short, long)]
    detailed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MirrorInfo {
    pub path: String,
    pub in_sync: bool,
}

/// Status response from API.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub services: ServiceHealth,
    pub servers: BTreeMap<ServerType, ServerState>,
    pub env_mirror: MirrorInfo,
}

#[derive(Debug, Serialize, Tabled)]
struct ServerRow {
    #[tabled(rename = "Server")]
    server: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Updated")]
    updated: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

impl ServerRow {
    fn new(server_type: &ServerType, state: &ServerState) -> Self {
        Self {
            server: server_type.to_string(),
            status: state.status.to_string(),
            updated: state
                .updated_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
            detail: state.detail.clone().unwrap_or_default(),
        }
    }
}

/// Execute the status command.
pub async fn execute(args: StatusArgs, api_url: &str, format: OutputFormat) -> anyhow::Result<()> {
    let client = ApiClient::new(api_url);
    let status: StatusResponse = client.get("/api/status").await?;

    if format != OutputFormat::Table {
        print_serialized(&status, format)?;
        return Ok(());
    }

    section("Services");
    println!("  Consul:          {}", flag(status.services.consul_reachable));
    println!("  Object storage:  {}", flag(status.services.object_storage_configured));
    println!(
        "  Env mirror:      {} ({})",
        flag(status.env_mirror.in_sync),
        status.env_mirror.path
    );

    section("Servers");
    let rows: Vec<ServerRow> = status
        .servers
        .iter()
        .map(|(server_type, state)| ServerRow::new(server_type, state))
        .collect();
    print_data(&rows, format)?;

    if args.detailed {
        section("Server CLI");
        match status.envelope.output.as_deref().map(str::trim) {
            Some(report) if !report.is_empty() => println!("{}", report),
            _ => output::info("The server CLI reported nothing"),
        }
    }

    Ok(())
}
