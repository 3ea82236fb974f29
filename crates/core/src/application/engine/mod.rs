// Supervised process execution engine
//
// launch -> pump/wait loop on the calling thread
//        -> (timeout > 0) scoped supervisor thread racing against completion

pub mod constants;
mod pump;
mod supervisor;
mod waiter;

pub use pump::{IoPump, PumpState};
pub use supervisor::{CompletionSignal, SupervisorOutcome, TimeoutSupervisor};
pub use waiter::ExitWaiter;

use constants::*;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Span};

use crate::domain::{CommandSpec, DomainError};
use crate::error::RunError;
use crate::port::{LaunchRequest, ProcessPlatform};

/// Engine tunables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Upper bound on one readiness wait
    pub poll_interval: Duration,
    /// Supervisor sleep increment between "done" checks
    pub supervisor_tick: Duration,
    /// Read buffer / stdin chunk size in bytes
    pub chunk_size: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            supervisor_tick: SUPERVISOR_TICK,
            chunk_size: IO_CHUNK_SIZE,
        }
    }
}

/// What to run and under which constraints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub command: CommandSpec,
    /// Zero means no timeout
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
    pub chroot_dir: Option<PathBuf>,
}

impl RunRequest {
    pub fn new(command: CommandSpec) -> Self {
        Self {
            command,
            timeout: Duration::ZERO,
            working_dir: None,
            chroot_dir: None,
        }
    }

    /// Tokenize `command` with [`crate::domain::split_command`]
    pub fn from_command_line(command: &str) -> Result<Self, DomainError> {
        Ok(Self::new(CommandSpec::from_command_line(command)?))
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout = Duration::from_millis(timeout_ms);
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_chroot(mut self, dir: impl Into<PathBuf>) -> Self {
        self.chroot_dir = Some(dir.into());
        self
    }

    fn launch_request(&self) -> LaunchRequest {
        LaunchRequest {
            command: self.command.clone(),
            working_dir: self.working_dir.clone(),
            chroot_dir: self.chroot_dir.clone(),
        }
    }
}

/// Runs external commands with captured streams and an optional deadline.
///
/// Each call owns its child and descriptors exclusively; concurrent calls
/// on one engine are independent.
pub struct ProcessEngine {
    platform: Arc<dyn ProcessPlatform>,
    options: EngineOptions,
}

impl ProcessEngine {
    pub fn new(platform: Arc<dyn ProcessPlatform>) -> Self {
        Self::with_options(platform, EngineOptions::default())
    }

    pub fn with_options(platform: Arc<dyn ProcessPlatform>, options: EngineOptions) -> Self {
        Self { platform, options }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Tokenize and run a command line without a timeout
    pub fn run_command(
        &self,
        command: &str,
        input: &mut dyn Read,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<i32, RunError> {
        let request = RunRequest::from_command_line(command)?;
        self.run(&request, input, stdout, stderr)
    }

    /// Launch the child, feed `input` to its stdin and collect its stdout
    /// and stderr into the sinks until it exits.
    ///
    /// Blocks for as long as the child keeps its output open. The sinks
    /// should not block.
    ///
    /// # Errors
    /// - RunError::Launch if pipes or the process cannot be created
    /// - RunError::Communication on an unexpected pipe error
    /// - RunError::AbnormalTermination if the child died by a signal,
    ///   including the timeout kill (`timed_out: true`)
    /// - RunError::Kill if the timeout kill could not be delivered
    pub fn run(
        &self,
        request: &RunRequest,
        input: &mut dyn Read,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<i32, RunError> {
        let span = info_span!("run", program = %request.command.program());
        let _enter = span.enter();

        let platform = self.platform.as_ref();
        let child = platform.launch(&request.launch_request())?;
        let pid = child.pid;
        info!(
            pid,
            timeout_ms = request.timeout.as_millis() as u64,
            "Child process launched"
        );

        let mut pump = IoPump::new(
            child.pipes,
            self.options.poll_interval,
            self.options.chunk_size,
        );
        let waiter = ExitWaiter::new(pid, platform);

        let exit_code = if request.timeout.is_zero() {
            self.drive(&mut pump, &waiter, input, stdout, stderr)
                .and_then(|()| waiter.exit_code(false))
        } else {
            self.run_supervised(request.timeout, &mut pump, &waiter, input, stdout, stderr)
        };

        match &exit_code {
            Ok(code) => info!(pid, exit_code = code, "Child process finished"),
            Err(e) => warn!(pid, error = %e, "Child process failed"),
        }
        exit_code
    }

    fn run_supervised(
        &self,
        timeout: Duration,
        pump: &mut IoPump,
        waiter: &ExitWaiter<'_>,
        input: &mut dyn Read,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<i32, RunError> {
        let done = CompletionSignal::new();
        let supervisor = TimeoutSupervisor::new(waiter, timeout, self.options.supervisor_tick);
        let span = Span::current();

        thread::scope(|scope| {
            let handle = scope.spawn(|| span.in_scope(|| supervisor.run(&done)));

            let driven = self.drive(pump, waiter, input, stdout, stderr);
            // Only after the reap: a child that closed its pipes early is still
            // subject to the deadline
            done.complete();

            let outcome = match handle.join() {
                Ok(outcome) => outcome,
                Err(panic) => std::panic::resume_unwind(panic),
            };
            driven?;
            let outcome = outcome?;
            waiter.exit_code(outcome == SupervisorOutcome::Killed)
        })
    }

    /// Pump rounds interleaved with non-blocking liveness checks, then reap.
    /// On failure the child is killed and reaped before returning.
    fn drive(
        &self,
        pump: &mut IoPump,
        waiter: &ExitWaiter<'_>,
        input: &mut dyn Read,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<(), RunError> {
        let result = Self::pump_until_done(pump, waiter, input, stdout, stderr).and_then(|()| {
            pump.close_all();
            waiter.wait().map(|_| ())
        });

        if result.is_err() {
            Self::abandon(pump, waiter);
        }
        result
    }

    fn pump_until_done(
        pump: &mut IoPump,
        waiter: &ExitWaiter<'_>,
        input: &mut dyn Read,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<(), RunError> {
        loop {
            let state = pump.round(input, stdout, stderr)?;

            if waiter.try_wait()?.is_some() {
                // Some platforms let a child die without reporting its pipes closed
                pump.drain(stdout, stderr)?;
                debug!(pid = waiter.pid(), "Child exited, final drain done");
                return Ok(());
            }
            if state == PumpState::Finished {
                return Ok(());
            }
        }
    }

    fn abandon(pump: &mut IoPump, waiter: &ExitWaiter<'_>) {
        pump.close_all();
        match waiter.kill_if_running() {
            Ok(None) => return,
            Ok(Some(_)) => {}
            Err(e) => {
                warn!(pid = waiter.pid(), error = %e, "Failed to kill child after error");
                return;
            }
        }
        if let Err(e) = waiter.wait() {
            warn!(pid = waiter.pid(), error = %e, "Failed to reap child after error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TerminationStatus;
    use crate::port::process_platform::mocks::{
        PipeScript, ReadStep, ScriptedPipes, ScriptedPlatform,
    };
    use crate::port::process_platform::MockProcessPlatform;
    use crate::port::{KillOutcome, LaunchedChild, WaitMode};
    use std::io;

    fn fast_options() -> EngineOptions {
        EngineOptions {
            poll_interval: Duration::from_millis(1),
            supervisor_tick: Duration::from_millis(5),
            chunk_size: 16,
        }
    }

    fn engine(platform: Arc<ScriptedPlatform>) -> ProcessEngine {
        ProcessEngine::with_options(platform, fast_options())
    }

    #[test]
    fn test_run_returns_exit_code_and_output() {
        let platform = Arc::new(ScriptedPlatform::new(
            PipeScript {
                stdout: vec![ReadStep::Data(b"out".to_vec())],
                stderr: vec![ReadStep::Data(b"err".to_vec())],
                ..PipeScript::default()
            },
            TerminationStatus::Exited(42),
        ));
        let engine = engine(Arc::clone(&platform));

        let (mut out, mut err) = (Vec::new(), Vec::new());
        let code = engine
            .run_command("tool --flag 'quoted arg'", &mut io::empty(), &mut out, &mut err)
            .unwrap();

        assert_eq!(code, 42);
        assert_eq!(out, b"out");
        assert_eq!(err, b"err");

        let launches = platform.launches.lock().unwrap();
        assert_eq!(launches[0].command.argv(), ["tool", "--flag", "quoted arg"]);
        assert!(platform.last_record().lock().unwrap().dropped);
    }

    #[test]
    fn test_final_drain_when_child_exits_with_pipes_open() {
        // Pipes never report EOF; the exit check ends the loop
        let platform = Arc::new(
            ScriptedPlatform::new(
                PipeScript {
                    stdout: vec![
                        ReadStep::WouldBlock,
                        ReadStep::WouldBlock,
                        ReadStep::Data(b"late".to_vec()),
                        ReadStep::WouldBlock,
                    ],
                    stderr: vec![ReadStep::WouldBlock; 4],
                    ..PipeScript::default()
                },
                TerminationStatus::Exited(0),
            )
            .running_for(1),
        );
        let engine = engine(Arc::clone(&platform));

        let (mut out, mut err) = (Vec::new(), Vec::new());
        let request = RunRequest::from_command_line("x").unwrap();
        let code = engine
            .run(&request, &mut io::empty(), &mut out, &mut err)
            .unwrap();

        assert_eq!(code, 0);
        assert_eq!(out, b"late");
    }

    #[test]
    fn test_signal_death_is_abnormal_termination() {
        let platform = Arc::new(ScriptedPlatform::new(
            PipeScript::default(),
            TerminationStatus::Signaled(11),
        ));
        let engine = engine(platform);

        let (mut out, mut err) = (Vec::new(), Vec::new());
        let result = engine.run_command("crash", &mut io::empty(), &mut out, &mut err);
        assert!(matches!(
            result,
            Err(RunError::AbnormalTermination {
                signal: 11,
                timed_out: false
            })
        ));
    }

    #[test]
    fn test_empty_command_is_rejected_before_launch() {
        let platform = Arc::new(ScriptedPlatform::new(
            PipeScript::default(),
            TerminationStatus::Exited(0),
        ));
        let engine = engine(Arc::clone(&platform));

        let (mut out, mut err) = (Vec::new(), Vec::new());
        let result = engine.run_command("  ", &mut io::empty(), &mut out, &mut err);
        assert!(matches!(result, Err(RunError::Domain(DomainError::EmptyCommand))));
        assert!(platform.launches.lock().unwrap().is_empty());
    }

    #[test]
    fn test_communication_failure_kills_and_reaps_child() {
        let platform = Arc::new(
            ScriptedPlatform::new(
                PipeScript {
                    stdout: vec![ReadStep::Fail(io::ErrorKind::InvalidData)],
                    ..PipeScript::default()
                },
                TerminationStatus::Signaled(9),
            )
            .running_for(usize::MAX),
        );
        let engine = engine(Arc::clone(&platform));

        let (mut out, mut err) = (Vec::new(), Vec::new());
        let result = engine.run_command("x", &mut io::empty(), &mut out, &mut err);

        assert!(matches!(result, Err(RunError::Communication(_))));
        assert_eq!(platform.kill_count(), 1);
        assert_eq!(
            platform.wait_calls.lock().unwrap().last(),
            Some(&WaitMode::Blocking)
        );
        let record = platform.last_record();
        assert_eq!(record.lock().unwrap().closed.len(), 3);
    }

    #[test]
    fn test_fast_run_with_timeout_does_not_kill() {
        let platform = Arc::new(ScriptedPlatform::new(
            PipeScript {
                stdout: vec![ReadStep::Data(b"quick".to_vec())],
                ..PipeScript::default()
            },
            TerminationStatus::Exited(0),
        ));
        let engine = engine(Arc::clone(&platform));

        let (mut out, mut err) = (Vec::new(), Vec::new());
        let request = RunRequest::from_command_line("x")
            .unwrap()
            .with_timeout_ms(60_000);
        let started = std::time::Instant::now();
        let code = engine
            .run(&request, &mut io::empty(), &mut out, &mut err)
            .unwrap();

        assert_eq!(code, 0);
        assert_eq!(platform.kill_count(), 0);
        // Supervisor is woken by completion, not by its deadline
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    /// Sink that stalls on every write
    struct StallingSink {
        delay: Duration,
        data: Vec<u8>,
    }

    impl Write for StallingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            std::thread::sleep(self.delay);
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_deadline_during_final_drain_does_not_signal_reaped_child() {
        // Reaped on the first check; the final drain outlasts the deadline
        let platform = Arc::new(ScriptedPlatform::new(
            PipeScript {
                stdout: vec![ReadStep::WouldBlock, ReadStep::Data(b"tail".to_vec())],
                ..PipeScript::default()
            },
            TerminationStatus::Exited(0),
        ));
        let engine = engine(Arc::clone(&platform));
        let request = RunRequest::from_command_line("x")
            .unwrap()
            .with_timeout_ms(30);

        let mut out = StallingSink {
            delay: Duration::from_millis(200),
            data: Vec::new(),
        };
        let mut err = Vec::new();
        let code = engine
            .run(&request, &mut io::empty(), &mut out, &mut err)
            .unwrap();

        assert_eq!(code, 0);
        assert_eq!(out.data, b"tail");
        assert_eq!(platform.kill_count(), 0);
        assert_eq!(*platform.wait_calls.lock().unwrap(), [WaitMode::NonBlocking]);
    }

    #[test]
    fn test_timeout_kill_is_reported_as_timed_out() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let mut platform = MockProcessPlatform::new();
        let (pipes, _) = ScriptedPipes::new(PipeScript::default());
        let mut pipes = Some(pipes);
        platform.expect_launch().times(1).returning(move |_| {
            Ok(LaunchedChild {
                pid: 7,
                pipes: Box::new(pipes.take().unwrap()),
            })
        });

        // Child closes its pipes at once but lingers until killed
        let killed = Arc::new(AtomicBool::new(false));
        let kill_flag = Arc::clone(&killed);
        platform.expect_kill().times(1).returning(move |_| {
            kill_flag.store(true, Ordering::SeqCst);
            Ok(KillOutcome::Delivered)
        });
        let exited = Arc::clone(&killed);
        platform.expect_wait_exited().returning(move |_| {
            while !exited.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        });
        platform.expect_wait().returning(move |_, _| {
            if killed.load(Ordering::SeqCst) {
                Ok(Some(TerminationStatus::Signaled(9)))
            } else {
                Ok(None)
            }
        });

        let engine = ProcessEngine::with_options(Arc::new(platform), fast_options());
        let request = RunRequest::from_command_line("sleep 100")
            .unwrap()
            .with_timeout_ms(30);

        let (mut out, mut err) = (Vec::new(), Vec::new());
        let result = engine.run(&request, &mut io::empty(), &mut out, &mut err);
        let error = result.unwrap_err();
        assert!(error.is_timeout());
        assert!(matches!(
            error,
            RunError::AbnormalTermination {
                signal: 9,
                timed_out: true
            }
        ));
    }
}
