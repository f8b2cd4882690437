// Engine-level errors: construction and configuration
//
// Per-action outcomes use `ActionError`; this wraps it for callers that
// mix engine setup and submission behind one `?`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Action error: {0}")]
    Action(#[from] crate::domain::ActionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config file is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
