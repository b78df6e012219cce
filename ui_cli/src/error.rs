//! CLI error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a failed envelope.
    #[error("{message} (HTTP {status})")]
    Api { status: u16, message: String },

    #[error("Could not format output: {0}")]
    Output(String),
}

pub type Result<T> = std::result::Result<T, CliError>;
