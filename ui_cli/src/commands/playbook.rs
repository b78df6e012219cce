//! Playbook command - run a provisioning playbook.

use clap::Args;
use serde_json::{Map, Value};

use crate::client::ApiClient;
use crate::commands::config::parse_key_value;
use crate::commands::lifecycle::ActionResponse;
use crate::output::{self, print_serialized};
use crate::OutputFormat;

#[derive(Args)]
pub struct PlaybookArgs {
    /// Playbook name, without the .yml extension
    name: String,

    /// Extra variables (key=value format, can be repeated)
    #[arg(short, long = "var", value_parser = parse_key_value)]
    vars: Vec<(String, String)>,
}

fn vars_object(vars: Vec<(String, String)>) -> Value {
    Value::Object(
        vars.into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect::<Map<String, Value>>(),
    )
}

pub async fn execute(args: PlaybookArgs, api_url: &str, format: OutputFormat) -> anyhow::Result<()> {
    let client = ApiClient::new(api_url);

    if format == OutputFormat::Table {
        output::info(&format!("Running playbook '{}'...", args.name));
    }
    let path = format!("/api/ansible/playbook/{}", args.name);
    let response: ActionResponse = client.post(&path, &vars_object(args.vars)).await?;

    if format != OutputFormat::Table {
        print_serialized(&response, format)?;
        return Ok(());
    }

    response.print_output();
    output::success(&format!("Playbook '{}' finished", args.name));
    Ok(())
}
