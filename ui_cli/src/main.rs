//! cpctl - operator CLI for the server control plane.

use clap::{Parser, Subcommand, ValueEnum};

mod client;
mod commands;
mod error;
mod output;

use commands::{config, lifecycle, playbook, settings, status};

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

#[derive(Parser)]
#[command(name = "cpctl")]
#[command(about = "Start, stop and configure managed servers")]
#[command(version)]
struct Cli {
    /// Control plane API URL
    #[arg(long, env = "CPCTL_API_URL", default_value = "http://127.0.0.1:3000", global = true)]
    api_url: String,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table, global = true)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show server state and dependency health
    Status(status::StatusArgs),
    /// Start a server
    Start(lifecycle::LifecycleArgs),
    /// Stop a server
    Stop(lifecycle::LifecycleArgs),
    /// Show effective settings
    Settings {
        /// Print secret values unmasked
        #[arg(long)]
        reveal: bool,
    },
    /// Read or write configuration
    #[command(subcommand)]
    Config(config::ConfigCommand),
    /// Run a provisioning playbook
    Playbook(playbook::PlaybookArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let api_url = cli.api_url.as_str();
    let format = cli.output;

    let result = match cli.command {
        Command::Status(args) => status::execute(args, api_url, format).await,
        Command::Start(args) => lifecycle::start(args, api_url, format).await,
        Command::Stop(args) => lifecycle::stop(args, api_url, format).await,
        Command::Settings { reveal } => settings::execute(reveal, api_url, format).await,
        Command::Config(command) => config::execute(command, api_url, format).await,
        Command::Playbook(args) => playbook::execute(args, api_url, format).await,
    };

    if let Err(e) = result {
        output::error(&e.to_string());
        std::process::exit(1);
    }
}
