// Central Error Types for the Engine and Application

use thiserror::Error;

use crate::domain::Pid;

/// Failure of a single supervised run.
///
/// Partial output already written to the caller's sinks is kept on every
/// variant; nothing is rolled back.
#[derive(Error, Debug)]
pub enum RunError {
    /// Pipes or the child process could not be created
    #[error("Launch failed: {0}")]
    Launch(String),

    /// Unexpected I/O error while multiplexing the child's streams
    #[error("Process communication failed: {0}")]
    Communication(String),

    /// Child died by a signal; no exit code is available
    #[error("Process terminated abnormally by signal {signal}{}", timeout_suffix(.timed_out))]
    AbnormalTermination { signal: i32, timed_out: bool },

    /// SIGKILL could not be delivered for a reason other than "already gone"
    #[error("Unable to kill child process {pid}: {reason}")]
    Kill { pid: Pid, reason: String },

    /// The OS reap primitive failed
    #[error("Failed to wait for child process {pid}: {reason}")]
    Wait { pid: Pid, reason: String },

    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),
}

impl RunError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            RunError::AbnormalTermination {
                timed_out: true,
                ..
            }
        )
    }
}

fn timeout_suffix(timed_out: &bool) -> &'static str {
    if *timed_out {
        " (timeout)"
    } else {
        ""
    }
}

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Execution error: {0}")]
    Execution(#[from] crate::port::ExecutionError),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
