// Timeout Supervisor - kills the child if the deadline passes before the run completes

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::ExitWaiter;
use crate::error::RunError;
use crate::port::KillOutcome;

/// One-shot "the run has finished" signal shared with the supervisor thread
#[derive(Debug, Default)]
pub struct CompletionSignal {
    done: Mutex<bool>,
    changed: Condvar,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the run finished and wake the supervisor
    pub fn complete(&self) {
        *self.done.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.changed.notify_all();
    }

    pub fn is_complete(&self) -> bool {
        *self.done.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep up to `timeout`, returning early if completed. Returns the flag.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        let (done, _) = self
            .changed
            .wait_timeout_while(done, timeout, |done| !*done)
            .unwrap_or_else(PoisonError::into_inner);
        *done
    }
}

/// How the supervisor thread ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorOutcome {
    /// The run finished before the deadline
    Completed,
    /// Deadline passed and SIGKILL was delivered
    Killed,
    /// Deadline passed but the child was already gone or reaped
    AlreadyExited,
}

/// Watches one child for a wall-clock deadline.
///
/// Never reaps and never touches the pipes: it only requests termination,
/// and only through the waiter so a reaped pid is left alone.
pub struct TimeoutSupervisor<'a> {
    waiter: &'a ExitWaiter<'a>,
    timeout: Duration,
    tick: Duration,
}

impl<'a> TimeoutSupervisor<'a> {
    pub fn new(waiter: &'a ExitWaiter<'a>, timeout: Duration, tick: Duration) -> Self {
        Self {
            waiter,
            timeout,
            tick,
        }
    }

    /// Sleep in `tick` increments until `done` is signalled or the deadline
    /// passes, then kill.
    ///
    /// # Errors
    /// - RunError::Kill if SIGKILL fails for a reason other than ESRCH
    pub fn run(&self, done: &CompletionSignal) -> Result<SupervisorOutcome, RunError> {
        let pid = self.waiter.pid();
        let deadline = Instant::now() + self.timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let step = self.tick.min(deadline - now);
            if done.wait_for(step) {
                debug!(pid, "Run completed before deadline");
                return Ok(SupervisorOutcome::Completed);
            }
        }

        if done.is_complete() {
            return Ok(SupervisorOutcome::Completed);
        }

        warn!(
            pid,
            timeout_ms = self.timeout.as_millis() as u64,
            "Deadline passed, killing child"
        );
        match self.waiter.kill_if_running()? {
            Some(KillOutcome::Delivered) => Ok(SupervisorOutcome::Killed),
            Some(KillOutcome::NoSuchProcess) | None => {
                debug!(pid, "Child already gone at deadline");
                Ok(SupervisorOutcome::AlreadyExited)
            }
        }
    }
}
