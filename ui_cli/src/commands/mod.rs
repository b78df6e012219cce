//! CLI subcommands.

pub mod config;
pub mod lifecycle;
pub mod playbook;
pub mod settings;
pub mod status;
