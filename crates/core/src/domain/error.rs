// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Command line is empty")]
    EmptyCommand,

    #[error("Invalid elevation type: {0}")]
    InvalidElevation(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
