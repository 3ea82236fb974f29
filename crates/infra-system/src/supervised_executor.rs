// Supervised executor
// reason: async-trait port over the blocking engine, run on tokio's blocking pool (ADR-002)
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use procrun_core::application::engine::{EngineOptions, ProcessEngine, RunRequest};
use procrun_core::error::RunError;
use procrun_core::port::{
    CommandExecutor, CommandRequest, ExecutionError, ExecutionResult, ExecutionStatus,
    ProcessPlatform,
};

/// Runs each request through a [`ProcessEngine`] on a blocking thread
pub struct SupervisedExecutor {
    engine: Arc<ProcessEngine>,
}

impl SupervisedExecutor {
    pub fn new(platform: Arc<dyn ProcessPlatform>) -> Self {
        Self::with_options(platform, EngineOptions::default())
    }

    pub fn with_options(platform: Arc<dyn ProcessPlatform>, options: EngineOptions) -> Self {
        Self {
            engine: Arc::new(ProcessEngine::with_options(platform, options)),
        }
    }

    /// Blocking part: owns the buffers for one run
    fn run_blocking(
        engine: &ProcessEngine,
        request: CommandRequest,
    ) -> Result<(i32, Vec<u8>, Vec<u8>), RunError> {
        let mut run = RunRequest::new(request.command).with_timeout_ms(request.timeout_ms);
        run.working_dir = request.working_dir;
        run.chroot_dir = request.chroot_dir;

        let mut input = request.stdin.as_slice();
        let (mut stdout, mut stderr) = (Vec::new(), Vec::new());
        let code = engine.run(&run, &mut input, &mut stdout, &mut stderr)?;
        Ok((code, stdout, stderr))
    }
}

fn to_execution_error(error: RunError, timeout_ms: u64) -> ExecutionError {
    match error {
        RunError::Launch(msg) => ExecutionError::SpawnFailed(msg),
        RunError::Domain(e) => ExecutionError::InvalidRequest(e.to_string()),
        RunError::AbnormalTermination {
            timed_out: true, ..
        } => ExecutionError::Timeout(timeout_ms),
        e @ (RunError::AbnormalTermination { .. } | RunError::Kill { .. }) => {
            ExecutionError::Killed(e.to_string())
        }
        e @ (RunError::Communication(_) | RunError::Wait { .. }) => {
            ExecutionError::IoError(e.to_string())
        }
    }
}

#[async_trait]
impl CommandExecutor for SupervisedExecutor {
    async fn execute(&self, request: CommandRequest) -> Result<ExecutionResult, ExecutionError> {
        let timeout_ms = request.timeout_ms;
        let program = request.command.program().to_string();
        let engine = Arc::clone(&self.engine);

        let started_at = Utc::now();
        let clock = Instant::now();
        let (exit_code, stdout, stderr) =
            tokio::task::spawn_blocking(move || Self::run_blocking(&engine, request))
                .await
                .map_err(|e| ExecutionError::IoError(format!("engine task failed: {}", e)))?
                .map_err(|e| to_execution_error(e, timeout_ms))?;
        let duration_ms = clock.elapsed().as_millis() as i64;

        let status = ExecutionStatus::from_exit_code(exit_code);
        info!(
            program = %program,
            exit_code,
            duration_ms,
            status = ?status,
            "Command execution completed"
        );

        Ok(ExecutionResult {
            status,
            exit_code,
            started_at,
            duration_ms,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::UnixPlatform;
    use procrun_core::domain::CommandSpec;

    fn executor() -> SupervisedExecutor {
        SupervisedExecutor::new(Arc::new(UnixPlatform::new()))
    }

    fn request(command: &str) -> CommandRequest {
        CommandRequest::new(CommandSpec::from_command_line(command).unwrap())
    }

    #[tokio::test]
    async fn test_execute_success() {
        let result = executor().execute(request("echo hello")).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "hello\n");
        assert!(result.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_execute_feeds_stdin() {
        let mut req = request("cat");
        req.stdin = b"piped through\n".to_vec();

        let result = executor().execute(req).await.unwrap();
        assert_eq!(result.stdout, "piped through\n");
    }

    #[tokio::test]
    async fn test_execute_failure_exit_code() {
        let result = executor()
            .execute(request("sh -c 'echo oops >&2; exit 4'"))
            .await
            .unwrap();

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.exit_code, 4);
        assert_eq!(result.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_execute_timeout() {
        let mut req = request("sleep 10");
        req.timeout_ms = 200;

        let result = executor().execute(req).await;
        assert!(matches!(result, Err(ExecutionError::Timeout(200))));
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            to_execution_error(RunError::Launch("fork".into()), 0),
            ExecutionError::SpawnFailed(_)
        ));
        assert!(matches!(
            to_execution_error(
                RunError::AbnormalTermination {
                    signal: 11,
                    timed_out: false
                },
                0
            ),
            ExecutionError::Killed(_)
        ));
        assert!(matches!(
            to_execution_error(RunError::Communication("poll".into()), 0),
            ExecutionError::IoError(_)
        ));
    }
}
