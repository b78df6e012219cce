//! Server control plane core.
//!
//! Reconciles the configuration held in the key-value store with a local
//! env-file mirror, drives the start/stop lifecycle of the managed server
//! types and exposes both through a small REST API.

pub mod api;
pub mod env_mirror;
pub mod facade;
pub mod orchestrator;
pub mod settings;
pub mod status_probe;

pub use env_mirror::{EnvMirror, MirrorError};
pub use facade::{ControlPlane, ControlPlaneConfig};
pub use orchestrator::Orchestrator;
pub use settings::{Settings, SettingsError};
pub use status_probe::ServerStatusProbe;
