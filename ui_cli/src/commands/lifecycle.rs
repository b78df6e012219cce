//! Start and stop commands.

use clap::Args;
use serde::{Deserialize, Serialize};

use control_plane_shared_types::{Envelope, ServerType};

use crate::client::ApiClient;
use crate::output::{self, print_serialized};
use crate::OutputFormat;

#[derive(Args)]
pub struct LifecycleArgs {
    /// Server type (app or gpu)
    server_type: ServerType,
}

/// Start, stop and playbook response from API.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActionResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl ActionResponse {
    /// Print captured output in table mode.
    pub fn print_output(&self) {
        if let Some(stdout) = self.envelope.output.as_deref().map(str::trim) {
            if !stdout.is_empty() {
                println!("{}", stdout);
            }
        }
        if let Some(stderr) = self.stderr.as_deref().map(str::trim) {
            if !stderr.is_empty() {
                output::warn(stderr);
            }
        }
    }
}

pub async fn start(args: LifecycleArgs, api_url: &str, format: OutputFormat) -> anyhow::Result<()> {
    run(args.server_type, "start", api_url, format).await
}

pub async fn stop(args: LifecycleArgs, api_url: &str, format: OutputFormat) -> anyhow::Result<()> {
    run(args.server_type, "stop", api_url, format).await
}

async fn run(server_type: ServerType, verb: &str, api_url: &str, format: OutputFormat) -> anyhow::Result<()> {
    let client = ApiClient::new(api_url);

    if format == OutputFormat::Table {
        output::info(&format!("Requesting {} of the {} server...", verb, server_type));
    }
    let response: ActionResponse = client
        .post_empty(&format!("/api/{}/{}", verb, server_type))
        .await?;

    if format != OutputFormat::Table {
        print_serialized(&response, format)?;
        return Ok(());
    }

    response.print_output();
    let past = if verb == "start" { "started" } else { "stopped" };
    output::success(&format!("The {} server {}", server_type, past));
    Ok(())
}
