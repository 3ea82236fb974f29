// RunAs Service - policy-checked command, shell and script execution

pub mod policy;

pub use policy::{Elevation, RunAsConfig};

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{split_command, CommandSpec};
use crate::error::{AppError, Result};
use crate::port::{CommandExecutor, CommandRequest, IdentityProbe, ScriptStager};

const SHELL: &str = "/bin/sh";
const ROOT_DENIED: &str = "Configuration prohibits execution with user: root";
/// Return code reported when the engine could not produce one
pub const FAILED_RETURN_CODE: i32 = -1;

/// What a RunAs call reports back
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunAsOutcome {
    pub succeeded: bool,
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunAsOutcome {
    fn from_failure(error: impl std::fmt::Display) -> Self {
        Self {
            succeeded: false,
            return_code: FAILED_RETURN_CODE,
            stdout: String::new(),
            stderr: error.to_string(),
        }
    }
}

/// RunAs Service
///
/// Policy errors (root denied, empty command) are returned as `Err`.
/// Anything that goes wrong once execution starts is folded into the
/// outcome with return code -1.
pub struct RunAsService {
    executor: Arc<dyn CommandExecutor>,
    identity: Arc<dyn IdentityProbe>,
    stager: Arc<dyn ScriptStager>,
    config: RunAsConfig,
}

impl RunAsService {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        identity: Arc<dyn IdentityProbe>,
        stager: Arc<dyn ScriptStager>,
        config: RunAsConfig,
    ) -> Self {
        Self {
            executor,
            identity,
            stager,
            config,
        }
    }

    pub fn config(&self) -> &RunAsConfig {
        &self.config
    }

    /// Tokenize and run `command` with empty stdin
    ///
    /// # Errors
    /// - AppError::AccessDenied if running as root is prohibited
    /// - AppError::Domain if `command` has no tokens
    pub async fn execute_command(
        &self,
        command: &str,
        timeout_secs: u32,
        elevation: Elevation,
    ) -> Result<RunAsOutcome> {
        self.execute_command_with_input(command, Vec::new(), timeout_secs, elevation)
            .await
    }

    /// Like [`execute_command`](Self::execute_command), feeding `input` to stdin
    pub async fn execute_command_with_input(
        &self,
        command: &str,
        input: Vec<u8>,
        timeout_secs: u32,
        elevation: Elevation,
    ) -> Result<RunAsOutcome> {
        self.ensure_allowed()?;
        let spec = CommandSpec::from_command_line(command)?;
        Ok(self.run(spec, input, timeout_secs, elevation).await)
    }

    /// Run `command` through `/bin/sh -c`
    pub async fn execute_shell_command(
        &self,
        command: &str,
        timeout_secs: u32,
        elevation: Elevation,
    ) -> Result<RunAsOutcome> {
        self.ensure_allowed()?;
        let spec = CommandSpec::new([SHELL, "-c", command])?;
        Ok(self.run(spec, Vec::new(), timeout_secs, elevation).await)
    }

    /// Stage `script` as an executable file and run it with `arguments`.
    /// The file is removed afterwards whatever the result.
    pub async fn execute_script(
        &self,
        script: &str,
        arguments: &str,
        timeout_secs: u32,
        elevation: Elevation,
    ) -> Result<RunAsOutcome> {
        self.ensure_allowed()?;

        let body = script.replace('\r', "");
        let path = match self.stager.stage(&body) {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "Failed to stage script");
                return Ok(RunAsOutcome::from_failure(AppError::Io(e)));
            }
        };

        let spec = CommandSpec::new(
            std::iter::once(path.to_string_lossy().into_owned()).chain(split_command(arguments)),
        )?;
        let outcome = self.run(spec, Vec::new(), timeout_secs, elevation).await;

        if let Err(e) = self.stager.discard(&path) {
            warn!(path = %path.display(), error = %e, "Failed to remove staged script");
        }
        Ok(outcome)
    }

    fn ensure_allowed(&self) -> Result<()> {
        if !self.config.allow_root && self.identity.is_root() {
            return Err(AppError::AccessDenied(ROOT_DENIED.to_string()));
        }
        Ok(())
    }

    async fn run(
        &self,
        spec: CommandSpec,
        input: Vec<u8>,
        timeout_secs: u32,
        elevation: Elevation,
    ) -> RunAsOutcome {
        let command = elevation.apply(spec, self.identity.is_root());
        info!(%command, timeout_secs, ?elevation, "RunAs execution");

        let request = CommandRequest {
            command,
            stdin: input,
            timeout_ms: u64::from(timeout_secs) * 1000,
            working_dir: self.config.cwd.clone(),
            chroot_dir: self.config.chroot_path.clone(),
        };

        match self.executor.execute(request).await {
            Ok(result) => RunAsOutcome {
                succeeded: result.exit_code == 0,
                return_code: result.exit_code,
                stdout: result.stdout,
                stderr: result.stderr,
            },
            Err(e) => {
                warn!(error = %e, "RunAs execution failed");
                RunAsOutcome::from_failure(AppError::from(e))
            }
        }
    }
}
