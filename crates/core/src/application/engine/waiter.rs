// Exit Waiter - reaps the child exactly once and caches the status

use std::sync::{Mutex, PoisonError, TryLockError};
use tracing::debug;

use crate::domain::{Pid, TerminationStatus};
use crate::error::RunError;
use crate::port::{KillOutcome, ProcessPlatform, WaitMode};

/// Reaps one child and remembers the result.
///
/// Once a status is cached it never changes and the OS wait primitive is
/// never called again for this pid. Safe to share between threads.
///
/// Every reap happens under the status lock, and so does every signal sent
/// through [`ExitWaiter::kill_if_running`]: a pid that has been reaped is
/// never signalled.
pub struct ExitWaiter<'a> {
    pid: Pid,
    platform: &'a dyn ProcessPlatform,
    status: Mutex<Option<TerminationStatus>>,
}

impl<'a> ExitWaiter<'a> {
    pub fn new(pid: Pid, platform: &'a dyn ProcessPlatform) -> Self {
        Self {
            pid,
            platform,
            status: Mutex::new(None),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Cached status, without touching the OS
    pub fn status(&self) -> Option<TerminationStatus> {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Non-blocking check. `Ok(None)` while the child is still running, or
    /// while another thread holds the status lock.
    pub fn try_wait(&self) -> Result<Option<TerminationStatus>, RunError> {
        let mut cached = match self.status.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Ok(None),
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
        };
        self.reap(&mut cached, WaitMode::NonBlocking)
    }

    /// Block until the child terminates
    ///
    /// The blocking part runs without the status lock; the child is only
    /// reaped once it is known to be gone.
    ///
    /// # Errors
    /// - RunError::Wait if the OS wait primitive fails
    pub fn wait(&self) -> Result<TerminationStatus, RunError> {
        if let Some(status) = self.status() {
            return Ok(status);
        }
        self.platform
            .wait_exited(self.pid)
            .map_err(|e| self.wait_error(e.to_string()))?;

        let mut cached = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        self.reap(&mut cached, WaitMode::Blocking)?
            .ok_or_else(|| self.wait_error("blocking wait returned without a status".to_string()))
    }

    /// Block, then map the status to an exit code
    ///
    /// # Errors
    /// - RunError::AbnormalTermination if the child died by a signal
    pub fn exit_code(&self, timed_out: bool) -> Result<i32, RunError> {
        match self.wait()? {
            TerminationStatus::Exited(code) => Ok(code),
            TerminationStatus::Signaled(signal) => {
                Err(RunError::AbnormalTermination { signal, timed_out })
            }
        }
    }

    /// Send SIGKILL unless the child has already been reaped.
    ///
    /// Returns `Ok(None)` when a status is cached and nothing was sent.
    ///
    /// # Errors
    /// - RunError::Kill if the signal fails for a reason other than ESRCH
    pub fn kill_if_running(&self) -> Result<Option<KillOutcome>, RunError> {
        let cached = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if cached.is_some() {
            debug!(pid = self.pid, "Child already reaped, not signalling");
            return Ok(None);
        }
        self.platform
            .kill(self.pid)
            .map(Some)
            .map_err(|e| RunError::Kill {
                pid: self.pid,
                reason: e.to_string(),
            })
    }

    fn reap(
        &self,
        cached: &mut Option<TerminationStatus>,
        mode: WaitMode,
    ) -> Result<Option<TerminationStatus>, RunError> {
        if cached.is_some() {
            return Ok(*cached);
        }
        let status = self
            .platform
            .wait(self.pid, mode)
            .map_err(|e| self.wait_error(e.to_string()))?;
        if let Some(status) = status {
            debug!(pid = self.pid, %status, "Child reaped");
            *cached = Some(status);
        }
        Ok(status)
    }

    fn wait_error(&self, reason: String) -> RunError {
        RunError::Wait {
            pid: self.pid,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::process_platform::MockProcessPlatform;
    use mockall::predicate::eq;
    use std::io;

    #[test]
    fn test_blocking_wait_reaps_once() {
        let mut platform = MockProcessPlatform::new();
        platform
            .expect_wait_exited()
            .with(eq(77))
            .times(1)
            .returning(|_| Ok(()));
        platform
            .expect_wait()
            .with(eq(77), eq(WaitMode::Blocking))
            .times(1)
            .returning(|_, _| Ok(Some(TerminationStatus::Exited(3))));

        let waiter = ExitWaiter::new(77, &platform);
        assert_eq!(waiter.wait().unwrap(), TerminationStatus::Exited(3));
        assert_eq!(waiter.wait().unwrap(), TerminationStatus::Exited(3));
        assert_eq!(waiter.try_wait().unwrap(), Some(TerminationStatus::Exited(3)));
        assert_eq!(waiter.exit_code(false).unwrap(), 3);
    }

    #[test]
    fn test_try_wait_polls_until_exit_then_caches() {
        let mut platform = MockProcessPlatform::new();
        let mut seq = mockall::Sequence::new();
        platform
            .expect_wait()
            .with(eq(5), eq(WaitMode::NonBlocking))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(None));
        platform
            .expect_wait()
            .with(eq(5), eq(WaitMode::NonBlocking))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Some(TerminationStatus::Exited(0))));
        platform.expect_wait_exited().times(0);

        let waiter = ExitWaiter::new(5, &platform);
        assert_eq!(waiter.try_wait().unwrap(), None);
        assert_eq!(waiter.status(), None);
        assert_eq!(waiter.try_wait().unwrap(), Some(TerminationStatus::Exited(0)));
        // Blocking wait is served from the cache
        assert_eq!(waiter.wait().unwrap(), TerminationStatus::Exited(0));
    }

    #[test]
    fn test_signal_death_is_abnormal_termination() {
        let mut platform = MockProcessPlatform::new();
        platform.expect_wait_exited().returning(|_| Ok(()));
        platform
            .expect_wait()
            .times(1)
            .returning(|_, _| Ok(Some(TerminationStatus::Signaled(9))));

        let waiter = ExitWaiter::new(1, &platform);
        assert!(matches!(
            waiter.exit_code(true),
            Err(RunError::AbnormalTermination {
                signal: 9,
                timed_out: true
            })
        ));
    }

    #[test]
    fn test_os_wait_failure_is_not_cached() {
        let mut platform = MockProcessPlatform::new();
        platform.expect_wait_exited().returning(|_| Ok(()));
        platform
            .expect_wait()
            .times(1)
            .returning(|_, _| Err(io::Error::from(io::ErrorKind::Other)));

        let waiter = ExitWaiter::new(1, &platform);
        assert!(matches!(waiter.wait(), Err(RunError::Wait { pid: 1, .. })));
        assert_eq!(waiter.status(), None);
    }

    #[test]
    fn test_exit_notification_failure_skips_reap() {
        let mut platform = MockProcessPlatform::new();
        platform
            .expect_wait_exited()
            .returning(|_| Err(io::Error::from(io::ErrorKind::Interrupted)));
        platform.expect_wait().times(0);

        let waiter = ExitWaiter::new(3, &platform);
        assert!(matches!(waiter.wait(), Err(RunError::Wait { pid: 3, .. })));
    }

    #[test]
    fn test_kill_if_running_signals_live_child() {
        let mut platform = MockProcessPlatform::new();
        platform
            .expect_kill()
            .with(eq(12))
            .times(1)
            .returning(|_| Ok(KillOutcome::Delivered));

        let waiter = ExitWaiter::new(12, &platform);
        assert_eq!(waiter.kill_if_running().unwrap(), Some(KillOutcome::Delivered));
    }

    #[test]
    fn test_reaped_child_is_never_signalled() {
        let mut platform = MockProcessPlatform::new();
        platform
            .expect_wait()
            .with(eq(12), eq(WaitMode::NonBlocking))
            .times(1)
            .returning(|_, _| Ok(Some(TerminationStatus::Exited(0))));
        platform.expect_kill().times(0);

        let waiter = ExitWaiter::new(12, &platform);
        assert!(waiter.try_wait().unwrap().is_some());
        assert_eq!(waiter.kill_if_running().unwrap(), None);
    }

    #[test]
    fn test_kill_failure_is_an_error() {
        let mut platform = MockProcessPlatform::new();
        platform
            .expect_kill()
            .returning(|_| Err(io::Error::from(io::ErrorKind::PermissionDenied)));

        let waiter = ExitWaiter::new(9, &platform);
        assert!(matches!(
            waiter.kill_if_running(),
            Err(RunError::Kill { pid: 9, .. })
        ));
    }
}
