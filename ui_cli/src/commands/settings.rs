//! Settings command - show effective settings and Consul connectivity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{flag, print_data, print_serialized, section};
use crate::OutputFormat;

#[derive(Debug, Deserialize, Serialize)]
struct ConsulService {
    connected: bool,
    url: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct Services {
    consul: ConsulService,
}

#[derive(Debug, Deserialize, Serialize)]
struct Settings {
    env: BTreeMap<String, String>,
    services: Services,
}

#[derive(Debug, Deserialize, Serialize)]
struct SettingsResponse {
    success: bool,
    settings: Settings,
}

#[derive(Debug, Serialize, Tabled)]
struct SettingRow {
    #[tabled(rename = "Setting")]
    name: String,
    #[tabled(rename = "Value")]
    value: String,
}

/// Hide all but the last four characters of secret values.
fn mask(name: &str, value: &str) -> String {
    let secret = name.ends_with("_TOKEN") || name.ends_with("_KEY");
    if !secret || value == "Not set" || value.is_empty() {
        return value.to_string();
    }
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

pub async fn execute(reveal: bool, api_url: &str, format: OutputFormat) -> anyhow::Result<()> {
    let client = ApiClient::new(api_url);
    let mut response: SettingsResponse = client.get("/api/settings").await?;

    if !reveal {
        for (name, value) in response.settings.env.iter_mut() {
            *value = mask(name, value);
        }
    }

    if format != OutputFormat::Table {
        print_serialized(&response.settings, format)?;
        return Ok(());
    }

    section("Consul");
    let consul = &response.settings.services.consul;
    println!("  Address:    {}", consul.url);
    println!("  Connected:  {}", flag(consul.connected));

    section("Settings");
    let rows: Vec<SettingRow> = response
        .settings
        .env
        .into_iter()
        .map(|(name, value)| SettingRow { name, value })
        .collect();
    print_data(&rows, format)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_secrets_only() {
        assert_eq!(mask("S3_SECRET_KEY", "abcdefgh1234"), "****1234");
        assert_eq!(mask("HCLOUD_TOKEN", "abc"), "****");
        assert_eq!(mask("HCLOUD_TOKEN", "Not set"), "Not set");
        assert_eq!(mask("S3_BUCKET", "backups"), "backups");
    }
}
