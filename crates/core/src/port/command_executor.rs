// Command Executor Port (ADR-002)
// Async abstraction over a complete supervised run with captured output

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

use crate::domain::CommandSpec;

/// One command to execute with in-memory stdin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: CommandSpec,
    pub stdin: Vec<u8>,
    /// Zero means no timeout
    pub timeout_ms: u64,
    pub working_dir: Option<PathBuf>,
    pub chroot_dir: Option<PathBuf>,
}

impl CommandRequest {
    pub fn new(command: CommandSpec) -> Self {
        Self {
            command,
            stdin: Vec::new(),
            timeout_ms: 0,
            working_dir: None,
            chroot_dir: None,
        }
    }
}

/// Result of a run that ended with a normal exit
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub exit_code: i32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub stdout: String,
    pub stderr: String,
}

/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failed
        }
    }
}

/// Execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Process timeout after {0}ms")]
    Timeout(u64),

    #[error("Process killed: {0}")]
    Killed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// Command Executor trait
///
/// Implementations:
/// - SupervisedExecutor (infra-system): runs the engine on a blocking thread
/// - mocks::MockCommandExecutor: canned results for service tests
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute a command and collect its output
    ///
    /// # Errors
    /// - ExecutionError::SpawnFailed if the process cannot be started
    /// - ExecutionError::Timeout if the deadline killed the process
    /// - ExecutionError::Killed if the process died by another signal
    /// - ExecutionError::IoError on a pipe failure
    async fn execute(&self, request: CommandRequest) -> Result<ExecutionResult, ExecutionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Mock executor behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Exit with code and stdout
        Exit(i32, String),
        /// Fail to spawn with message
        Fail(String),
        /// Time out after N ms
        Timeout(u64),
    }

    /// Mock Command Executor for testing
    pub struct MockCommandExecutor {
        behavior: Arc<Mutex<MockBehavior>>,
        requests: Arc<Mutex<Vec<CommandRequest>>>,
    }

    impl MockCommandExecutor {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Arc::new(Mutex::new(behavior)),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn new_success(stdout: impl Into<String>) -> Self {
            Self::new(MockBehavior::Exit(0, stdout.into()))
        }

        pub fn requests(&self) -> Vec<CommandRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn last_argv(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .last()
                .map(|r| r.command.argv().to_vec())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl CommandExecutor for MockCommandExecutor {
        async fn execute(
            &self,
            request: CommandRequest,
        ) -> Result<ExecutionResult, ExecutionError> {
            self.requests.lock().unwrap().push(request);

            let behavior = self.behavior.lock().unwrap().clone();
            match behavior {
                MockBehavior::Exit(code, stdout) => Ok(ExecutionResult {
                    status: ExecutionStatus::from_exit_code(code),
                    exit_code: code,
                    started_at: Utc::now(),
                    duration_ms: 1,
                    stdout,
                    stderr: String::new(),
                }),
                MockBehavior::Fail(msg) => Err(ExecutionError::SpawnFailed(msg)),
                MockBehavior::Timeout(ms) => Err(ExecutionError::Timeout(ms)),
            }
        }
    }
}
