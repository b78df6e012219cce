//! Types shared by every crate of the server control plane.
//!
//! The control plane manages a closed set of server types ([`ServerType`]),
//! each of which moves through the lifecycle described by [`ServerStatus`].
//! Durable configuration is a flat string map ([`ConfigMap`]) stored in a
//! distributed key-value store.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Flat configuration namespace. Ordered so that every serialisation of the
/// same mapping is identical.
pub type ConfigMap = BTreeMap<String, String>;

/// Kind of compute server managed by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerType {
    App,
    Gpu,
}

impl ServerType {
    /// Every managed server type, in display order.
    pub const ALL: [ServerType; 2] = [ServerType::App, ServerType::Gpu];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServerType::App => "app",
            ServerType::Gpu => "gpu",
        }
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerType {
    type Err = ControlPlaneError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "app" => Ok(ServerType::App),
            "gpu" => Ok(ServerType::Gpu),
            other => Err(ControlPlaneError::Validation(format!(
                "unknown server type '{}', expected one of: app, gpu",
                other
            ))),
        }
    }
}

/// Lifecycle status of a server type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    NotRunning,
    Starting,
    Running,
    Stopping,
    Error,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::NotRunning => "not_running",
            ServerStatus::Starting => "starting",
            ServerStatus::Running => "running",
            ServerStatus::Stopping => "stopping",
            ServerStatus::Error => "error",
        }
    }

    /// Whether a start may be issued from this status.
    pub fn can_start(&self) -> bool {
        matches!(self, ServerStatus::NotRunning | ServerStatus::Error)
    }

    /// Whether a stop may be issued from this status.
    pub fn can_stop(&self) -> bool {
        matches!(self, ServerStatus::Running | ServerStatus::Error)
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerStatus {
    type Err = ControlPlaneError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "not_running" => Ok(ServerStatus::NotRunning),
            "starting" => Ok(ServerStatus::Starting),
            "running" => Ok(ServerStatus::Running),
            "stopping" => Ok(ServerStatus::Stopping),
            "error" => Ok(ServerStatus::Error),
            other => Err(ControlPlaneError::Validation(format!(
                "unknown server status '{}'",
                other
            ))),
        }
    }
}

/// State of one server type as recorded under `servers/<type>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerState {
    pub status: ServerStatus,
    /// Free-form diagnostic payload, e.g. captured stderr of a failed action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ServerState {
    pub fn new(status: ServerStatus) -> Self {
        Self {
            status,
            detail: None,
            updated_at: Some(Utc::now()),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// State reported when no record exists for a server type.
    pub fn not_running() -> Self {
        Self {
            status: ServerStatus::NotRunning,
            detail: None,
            updated_at: None,
        }
    }

    /// Decode a stored record.
    ///
    /// Accepts the JSON form written by the orchestrator as well as a bare
    /// status word. Anything else is surfaced as an `error` state carrying
    /// the raw value.
    pub fn decode(raw: &str) -> Self {
        if let Ok(state) = serde_json::from_str::<ServerState>(raw) {
            return state;
        }
        match raw.parse::<ServerStatus>() {
            Ok(status) => Self {
                status,
                detail: None,
                updated_at: None,
            },
            Err(_) => Self {
                status: ServerStatus::Error,
                detail: Some(format!("unrecognized server record: {}", raw)),
                updated_at: None,
            },
        }
    }

    pub fn encode(&self) -> String {
        // A struct of strings and enums always serialises.
        serde_json::to_string(self).unwrap_or_else(|_| self.status.as_str().to_string())
    }
}

/// Reachability and configuredness of dependent services. Recomputed on
/// every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub consul_reachable: bool,
    pub object_storage_configured: bool,
}

/// Uniform result envelope returned by every boundary operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            success: true,
            output: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

impl From<&ControlPlaneError> for Envelope {
    fn from(err: &ControlPlaneError) -> Self {
        Envelope::failed(err.to_string())
    }
}

/// Error kinds surfaced at the control plane boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControlPlaneError {
    #[error("Key-value store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("{0}")]
    Validation(String),

    /// Displays the captured stderr unmodified.
    #[error("{stderr}")]
    ProvisioningFailure { stderr: String, exit_code: Option<i32> },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cannot {action} {server_type} server while it is {status}")]
    InvalidTransition {
        server_type: ServerType,
        action: &'static str,
        status: ServerStatus,
    },

    #[error("A lifecycle operation for the {0} server is already in progress")]
    OperationInProgress(ServerType),
}

pub type Result<T> = std::result::Result<T, ControlPlaneError>;
