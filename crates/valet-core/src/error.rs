//! Valet error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValetError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("Supervisor error: {0}")]
    Supervisor(String),

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ValetError>;
