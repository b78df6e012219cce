//! Terminal output helpers.

use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use crate::error::CliError;
use crate::OutputFormat;

pub fn info(message: &str) {
    println!("{} {}", "info:".blue().bold(), message);
}

pub fn success(message: &str) {
    println!("{} {}", "ok:".green().bold(), message);
}

pub fn warn(message: &str) {
    eprintln!("{} {}", "warning:".yellow().bold(), message);
}

pub fn error(message: &str) {
    eprintln!("{} {}", "error:".red().bold(), message);
}

pub fn section(title: &str) {
    println!("\n{}", title.bold().underline());
}

/// Green `yes` or red `no`.
pub fn flag(value: bool) -> String {
    if value {
        "yes".green().to_string()
    } else {
        "no".red().to_string()
    }
}

/// Print a list as a table, or serialise it as JSON or YAML.
pub fn print_data<T: Serialize + Tabled>(items: &[T], format: OutputFormat) -> Result<(), CliError> {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("  (none)");
            } else {
                println!("{}", Table::new(items).with(Style::rounded()));
            }
            Ok(())
        }
        _ => print_serialized(&items, format),
    }
}

/// Serialise `value` as JSON or YAML. Table format falls back to JSON.
pub fn print_serialized<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> Result<(), CliError> {
    let rendered = match format {
        OutputFormat::Yaml => serde_yaml_ng::to_string(value).map_err(|e| CliError::Output(e.to_string()))?,
        OutputFormat::Json | OutputFormat::Table => {
            serde_json::to_string_pretty(value).map_err(|e| CliError::Output(e.to_string()))?
        }
    };
    println!("{}", rendered);
    Ok(())
}
