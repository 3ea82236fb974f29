// Child process termination & stream liveness

use serde::{Deserialize, Serialize};

/// OS process id of a launched child
pub type Pid = i32;

/// How a reaped child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationStatus {
    /// Normal `exit(code)`
    Exited(i32),
    /// Killed by an uncaught signal (number)
    Signaled(i32),
}

impl TerminationStatus {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            TerminationStatus::Exited(code) => Some(*code),
            TerminationStatus::Signaled(_) => None,
        }
    }
}

impl std::fmt::Display for TerminationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationStatus::Exited(code) => write!(f, "exited with code {}", code),
            TerminationStatus::Signaled(sig) => write!(f, "terminated by signal {}", sig),
        }
    }
}

/// Per-direction liveness of the three child pipes.
///
/// Each flag only ever goes from live to dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLiveness {
    stdin: bool,
    stdout: bool,
    stderr: bool,
}

impl Default for StreamLiveness {
    fn default() -> Self {
        Self {
            stdin: true,
            stdout: true,
            stderr: true,
        }
    }
}

impl StreamLiveness {
    pub fn stdin(&self) -> bool {
        self.stdin
    }

    pub fn stdout(&self) -> bool {
        self.stdout
    }

    pub fn stderr(&self) -> bool {
        self.stderr
    }

    pub fn kill_stdin(&mut self) {
        self.stdin = false;
    }

    pub fn kill_stdout(&mut self) {
        self.stdout = false;
    }

    pub fn kill_stderr(&mut self) {
        self.stderr = false;
    }

    /// True while either output stream may still produce data
    pub fn any_output(&self) -> bool {
        self.stdout || self.stderr
    }
}
