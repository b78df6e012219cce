//! External provisioning actions for the control plane.
//!
//! This crate provides implementations of the [`ActionRunner`] trait:
//! - `CliActionRunner`: runs the server CLI and `ansible-playbook` as bounded
//!   child processes
//! - `MockActionRunner`: scripted in-memory runner for testing (default
//!   feature `mock-runner`)
//!
//! Every action reports its captured stdout, stderr and exit code verbatim;
//! interpreting them is left to the caller.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use control_plane_shared_types::{ControlPlaneError, ServerType};

pub mod cli;

#[cfg(feature = "mock-runner")]
pub mod mock;

pub use cli::{CliActionRunner, CliRunnerConfig};

#[cfg(feature = "mock-runner")]
pub use mock::MockActionRunner;

/// An external action the control plane can invoke.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Provision and start a server.
    Start(ServerType),
    /// Stop a server.
    Stop(ServerType),
    /// Ask the server CLI for its status report.
    Status,
    /// Run a named playbook with the given variables.
    Playbook {
        name: String,
        vars: serde_json::Value,
    },
}

impl Action {
    /// Short human-readable form, e.g. `start gpu`.
    pub fn label(&self) -> String {
        match self {
            Action::Start(t) => format!("start {}", t),
            Action::Stop(t) => format!("stop {}", t),
            Action::Status => "status".to_string(),
            Action::Playbook { name, .. } => format!("playbook {}", name),
        }
    }
}

/// Captured result of a finished action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl ActionOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Errors raised while running an action. A nonzero exit is not an error at
/// this level; it is reported through [`ActionOutput`].
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} did not finish within {after:?}")]
    Timeout { command: String, after: Duration },

    #[error("Invalid playbook name '{0}'")]
    InvalidPlaybookName(String),

    #[error("Playbook not found: {0}")]
    PlaybookNotFound(String),

    #[error("No command configured for {0}")]
    NotConfigured(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ActionError> for ControlPlaneError {
    fn from(err: ActionError) -> Self {
        match err {
            ActionError::Timeout { .. } => ControlPlaneError::Timeout(err.to_string()),
            ActionError::InvalidPlaybookName(_) | ActionError::PlaybookNotFound(_) => {
                ControlPlaneError::Validation(err.to_string())
            }
            other => ControlPlaneError::Io(other.to_string()),
        }
    }
}

/// Runs external actions on behalf of the control plane.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    async fn run(&self, action: &Action) -> Result<ActionOutput, ActionError>;
}

/// Whether `name` is acceptable as a playbook name: non-empty, ASCII
/// alphanumerics, `-` and `_` only.
pub fn is_valid_playbook_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
