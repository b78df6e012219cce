//! Daemon settings.
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML
//! file, environment variables. Command-line flags are applied on top by the
//! binary.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use observability::LogFormat;
use provisioner::CliRunnerConfig;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {var}: {message}")]
    Env { var: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Address the REST API listens on.
    pub listen_addr: SocketAddr,
    /// Consul agent address. The only place the store endpoint is defined.
    pub consul_addr: String,
    pub consul_token: Option<String>,
    pub config_prefix: String,
    pub servers_prefix: String,
    /// Env file mirrored from the configuration namespace.
    pub env_file: PathBuf,
    /// Server CLI; `start <type>`, `stop <type>` and `status` are appended.
    pub server_command: Vec<String>,
    pub playbook_command: Vec<String>,
    pub playbook_dir: PathBuf,
    pub action_timeout_secs: u64,
    pub status_timeout_secs: u64,
    pub health_timeout_ms: u64,
    /// Prometheus exporter address; disabled when unset.
    pub metrics_addr: Option<SocketAddr>,
    pub log_format: LogFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            consul_addr: "http://127.0.0.1:8500".to_string(),
            consul_token: None,
            config_prefix: config_store_interface::DEFAULT_CONFIG_PREFIX.to_string(),
            servers_prefix: config_store_interface::DEFAULT_SERVERS_PREFIX.to_string(),
            env_file: PathBuf::from(".env"),
            server_command: vec!["server-manager".to_string()],
            playbook_command: vec!["ansible-playbook".to_string()],
            playbook_dir: PathBuf::from("playbooks"),
            action_timeout_secs: 600,
            status_timeout_secs: 30,
            health_timeout_ms: 2000,
            metrics_addr: None,
            log_format: LogFormat::Pretty,
        }
    }
}

impl Settings {
    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(|var| std::env::var(var).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from variables returned by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("CONTROL_PLANE_LISTEN") {
            self.listen_addr = parse_env("CONTROL_PLANE_LISTEN", &v)?;
        }
        if let Some(v) = get("CONSUL_HTTP_ADDR") {
            self.consul_addr = v;
        }
        if let Some(v) = get("CONSUL_HTTP_TOKEN") {
            self.consul_token = Some(v);
        }
        if let Some(v) = get("CONTROL_PLANE_ENV_FILE") {
            self.env_file = PathBuf::from(v);
        }
        if let Some(v) = get("SERVER_CLI") {
            self.server_command = split_command(&v);
        }
        if let Some(v) = get("ANSIBLE_PLAYBOOK_BIN") {
            self.playbook_command = split_command(&v);
        }
        if let Some(v) = get("PLAYBOOK_DIR") {
            self.playbook_dir = PathBuf::from(v);
        }
        if let Some(v) = get("ACTION_TIMEOUT_SECS") {
            self.action_timeout_secs = parse_env("ACTION_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("STATUS_TIMEOUT_SECS") {
            self.status_timeout_secs = parse_env("STATUS_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("HEALTH_TIMEOUT_MS") {
            self.health_timeout_ms = parse_env("HEALTH_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("METRICS_ADDR") {
            self.metrics_addr = Some(parse_env("METRICS_ADDR", &v)?);
        }
        if let Some(v) = get("LOG_FORMAT") {
            self.log_format = v.parse().map_err(|e: observability::TracingError| SettingsError::Env {
                var: "LOG_FORMAT",
                message: e.to_string(),
            })?;
        }

        if self.health_timeout_ms > 2000 {
            warn!(
                health_timeout_ms = self.health_timeout_ms,
                "Health timeout above 2s makes /api/status slow when Consul is down"
            );
        }
        Ok(())
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn runner_config(&self) -> CliRunnerConfig {
        CliRunnerConfig {
            server_command: self.server_command.clone(),
            playbook_command: self.playbook_command.clone(),
            playbook_dir: self.playbook_dir.clone(),
            vars_dir: None,
            action_timeout: self.action_timeout(),
            status_timeout: self.status_timeout(),
        }
    }
}

fn parse_env<T>(var: &'static str, value: &str) -> Result<T, SettingsError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| SettingsError::Env {
        var,
        message: e.to_string(),
    })
}

fn split_command(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}
