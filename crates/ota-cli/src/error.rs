//! Error types for otactl

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Input not found: {0}")]
    InputNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("No matching firmware: {0}")]
    NoCandidate(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::InputNotFound(_) => 2,
            CliError::NoCandidate(_) => 3,
            CliError::InvalidConfiguration(_) => 4,
            CliError::InvalidImage(_) => 5,
            CliError::IoError(_) | CliError::JsonError(_) => 1,
        }
    }
}
