// Process Platform Port (ADR-001)
// Capability interface over the OS: launch, multiplexed pipe I/O, reap, kill.
// One implementation per target platform; engine logic stays platform-agnostic.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::{CommandSpec, Pid, TerminationStatus};
use crate::error::RunError;

/// Everything the launcher needs to create a child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub command: CommandSpec,
    /// Directory to `chdir` into before exec
    pub working_dir: Option<PathBuf>,
    /// Directory to `chroot` into (followed by `chdir("/")`) before exec
    pub chroot_dir: Option<PathBuf>,
}

/// A freshly launched child: its pid plus the parent's ends of the pipes
pub struct LaunchedChild {
    pub pid: Pid,
    pub pipes: Box<dyn ChildPipes>,
}

impl std::fmt::Debug for LaunchedChild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedChild")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Stdin,
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputChannel {
    Stdout,
    Stderr,
}

impl From<OutputChannel> for Channel {
    fn from(channel: OutputChannel) -> Self {
        match channel {
            OutputChannel::Stdout => Channel::Stdout,
            OutputChannel::Stderr => Channel::Stderr,
        }
    }
}

/// Which descriptors to include in a readiness wait
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interest {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
}

/// Readiness reported for one descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelEvents {
    /// Writable (stdin) or readable (stdout/stderr)
    pub ready: bool,
    /// Hang-up, error or invalid descriptor
    pub hangup: bool,
}

/// Result of one readiness wait. All-default means the wait timed out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub stdin: ChannelEvents,
    pub stdout: ChannelEvents,
    pub stderr: ChannelEvents,
}

impl Readiness {
    pub fn output(&self, channel: OutputChannel) -> ChannelEvents {
        match channel {
            OutputChannel::Stdout => self.stdout,
            OutputChannel::Stderr => self.stderr,
        }
    }
}

/// Parent-side ends of the child's three standard streams.
///
/// All descriptors are non-blocking: reads and writes that cannot proceed
/// return `io::ErrorKind::WouldBlock`. Dropping the handle closes whatever
/// is still open.
pub trait ChildPipes: Send {
    /// Wait up to `timeout` for any of the requested descriptors
    fn poll(&mut self, interest: Interest, timeout: Duration) -> io::Result<Readiness>;

    /// Write to the child's stdin; may be a short write
    fn write_stdin(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Read from stdout/stderr; `Ok(0)` means the far end is closed
    fn read_output(&mut self, channel: OutputChannel, buf: &mut [u8]) -> io::Result<usize>;

    /// Close one descriptor. Closing twice is a no-op.
    fn close(&mut self, channel: Channel);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    Blocking,
    NonBlocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// SIGKILL was sent
    Delivered,
    /// The process was already gone (ESRCH)
    NoSuchProcess,
}

/// Platform capability interface
///
/// Implementations:
/// - UnixPlatform (infra-system): pipe/fork/execvp/poll/waitpid/kill
/// - mocks::ScriptedPlatform: in-memory fake for engine tests
#[cfg_attr(test, mockall::automock)]
pub trait ProcessPlatform: Send + Sync {
    /// Create pipes and the child process
    ///
    /// Child-side failures (chroot, chdir, exec) are not errors here: they
    /// surface as exit code 1 plus a diagnostic on the child's stderr.
    ///
    /// # Errors
    /// - RunError::Launch if pipes or the process cannot be created
    fn launch(&self, request: &LaunchRequest) -> Result<LaunchedChild, RunError>;

    /// Block until the child has terminated, leaving it unreaped.
    ///
    /// The pid stays reserved until [`ProcessPlatform::wait`] collects it,
    /// so a concurrent `kill` can never reach a recycled pid.
    fn wait_exited(&self, pid: Pid) -> io::Result<()>;

    /// Reap the child. `NonBlocking` returns `Ok(None)` while it still runs.
    ///
    /// Must be called at most once successfully per pid; callers cache.
    fn wait(&self, pid: Pid, mode: WaitMode) -> io::Result<Option<TerminationStatus>>;

    /// Send SIGKILL. "No such process" is reported as an outcome, not an error.
    fn kill(&self, pid: Pid) -> io::Result<KillOutcome>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// One scripted `read_output` result
    #[derive(Debug, Clone)]
    pub enum ReadStep {
        Data(Vec<u8>),
        WouldBlock,
        Fail(io::ErrorKind),
    }

    /// Behaviour of a fake child's pipes
    #[derive(Debug, Clone, Default)]
    pub struct PipeScript {
        /// Steps replayed by stdout reads; EOF once exhausted
        pub stdout: Vec<ReadStep>,
        /// Steps replayed by stderr reads; EOF once exhausted
        pub stderr: Vec<ReadStep>,
        /// Max bytes accepted per stdin write (short writes)
        pub stdin_chunk: Option<usize>,
        /// Total bytes stdin accepts before reporting WouldBlock forever
        pub stdin_capacity: Option<usize>,
        /// Stdin writes fail with EPIPE
        pub stdin_broken: bool,
        /// Every poll fails with this kind
        pub poll_error: Option<io::ErrorKind>,
    }

    /// What the engine did to the fake pipes
    #[derive(Debug, Default)]
    pub struct PipeRecord {
        pub stdin_written: Vec<u8>,
        pub closed: Vec<Channel>,
        pub polls: usize,
        pub dropped: bool,
    }

    /// In-memory `ChildPipes`
    pub struct ScriptedPipes {
        stdout: VecDeque<ReadStep>,
        stderr: VecDeque<ReadStep>,
        script: PipeScript,
        record: Arc<Mutex<PipeRecord>>,
    }

    impl ScriptedPipes {
        pub fn new(script: PipeScript) -> (Self, Arc<Mutex<PipeRecord>>) {
            let record = Arc::new(Mutex::new(PipeRecord::default()));
            let pipes = Self {
                stdout: script.stdout.iter().cloned().collect(),
                stderr: script.stderr.iter().cloned().collect(),
                script,
                record: Arc::clone(&record),
            };
            (pipes, record)
        }

        fn is_closed(&self, channel: Channel) -> bool {
            self.record.lock().unwrap().closed.contains(&channel)
        }
    }

    impl ChildPipes for ScriptedPipes {
        fn poll(&mut self, interest: Interest, _timeout: Duration) -> io::Result<Readiness> {
            self.record.lock().unwrap().polls += 1;
            if let Some(kind) = self.script.poll_error {
                return Err(io::Error::from(kind));
            }
            let ready = |wanted: bool, closed: bool| ChannelEvents {
                ready: wanted && !closed,
                hangup: false,
            };
            Ok(Readiness {
                stdin: ready(interest.stdin, self.is_closed(Channel::Stdin)),
                stdout: ready(interest.stdout, self.is_closed(Channel::Stdout)),
                stderr: ready(interest.stderr, self.is_closed(Channel::Stderr)),
            })
        }

        fn write_stdin(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.script.stdin_broken {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            let mut record = self.record.lock().unwrap();
            let room = self
                .script
                .stdin_capacity
                .map(|cap| cap.saturating_sub(record.stdin_written.len()))
                .unwrap_or(usize::MAX);
            if room == 0 {
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            let n = buf
                .len()
                .min(room)
                .min(self.script.stdin_chunk.unwrap_or(usize::MAX));
            record.stdin_written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn read_output(&mut self, channel: OutputChannel, buf: &mut [u8]) -> io::Result<usize> {
            let queue = match channel {
                OutputChannel::Stdout => &mut self.stdout,
                OutputChannel::Stderr => &mut self.stderr,
            };
            match queue.pop_front() {
                None => Ok(0),
                Some(ReadStep::WouldBlock) => Err(io::Error::from(io::ErrorKind::WouldBlock)),
                Some(ReadStep::Fail(kind)) => Err(io::Error::from(kind)),
                Some(ReadStep::Data(mut data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        queue.push_front(ReadStep::Data(data.split_off(n)));
                    }
                    Ok(n)
                }
            }
        }

        fn close(&mut self, channel: Channel) {
            let mut record = self.record.lock().unwrap();
            if !record.closed.contains(&channel) {
                record.closed.push(channel);
            }
        }
    }

    impl Drop for ScriptedPipes {
        fn drop(&mut self) {
            if let Ok(mut record) = self.record.lock() {
                record.dropped = true;
            }
        }
    }

    /// Fake platform: launches `ScriptedPipes`, reports a fixed status after
    /// a configurable number of non-blocking polls.
    pub struct ScriptedPlatform {
        script: PipeScript,
        status: TerminationStatus,
        running_polls: Mutex<usize>,
        pub records: Mutex<Vec<Arc<Mutex<PipeRecord>>>>,
        pub launches: Mutex<Vec<LaunchRequest>>,
        pub wait_calls: Mutex<Vec<WaitMode>>,
        pub kills: Mutex<usize>,
    }

    impl ScriptedPlatform {
        pub fn new(script: PipeScript, status: TerminationStatus) -> Self {
            Self {
                script,
                status,
                running_polls: Mutex::new(0),
                records: Mutex::new(Vec::new()),
                launches: Mutex::new(Vec::new()),
                wait_calls: Mutex::new(Vec::new()),
                kills: Mutex::new(0),
            }
        }

        /// Report "still running" for the first `polls` non-blocking waits
        pub fn running_for(self, polls: usize) -> Self {
            *self.running_polls.lock().unwrap() = polls;
            self
        }

        pub fn last_record(&self) -> Arc<Mutex<PipeRecord>> {
            Arc::clone(self.records.lock().unwrap().last().expect("no launch"))
        }

        pub fn kill_count(&self) -> usize {
            *self.kills.lock().unwrap()
        }
    }

    impl ProcessPlatform for ScriptedPlatform {
        fn launch(&self, request: &LaunchRequest) -> Result<LaunchedChild, RunError> {
            self.launches.lock().unwrap().push(request.clone());
            let (pipes, record) = ScriptedPipes::new(self.script.clone());
            self.records.lock().unwrap().push(record);
            Ok(LaunchedChild {
                pid: 4242,
                pipes: Box::new(pipes),
            })
        }

        fn wait_exited(&self, _pid: Pid) -> io::Result<()> {
            Ok(())
        }

        fn wait(&self, _pid: Pid, mode: WaitMode) -> io::Result<Option<TerminationStatus>> {
            self.wait_calls.lock().unwrap().push(mode);
            if mode == WaitMode::NonBlocking {
                let mut left = self.running_polls.lock().unwrap();
                if *left > 0 {
                    *left -= 1;
                    return Ok(None);
                }
            }
            Ok(Some(self.status))
        }

        fn kill(&self, _pid: Pid) -> io::Result<KillOutcome> {
            *self.kills.lock().unwrap() += 1;
            Ok(KillOutcome::Delivered)
        }
    }
}
