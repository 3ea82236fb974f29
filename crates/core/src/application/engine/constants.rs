// Engine constants (ADR: No magic values)
use std::time::Duration;

/// Upper bound on one readiness wait, so the caller can interleave
/// child-liveness checks between pump rounds (250ms)
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Sleep increment of the timeout supervisor between "done" checks (1s)
pub const SUPERVISOR_TICK: Duration = Duration::from_secs(1);

/// Fixed read buffer for stdout/stderr, also the stdin chunk size (bytes)
pub const IO_CHUNK_SIZE: usize = 4096;

/// Descriptors from 3 up to this limit are closed in the child before exec.
/// Some systems report an unlimited descriptor table; cap the scan.
pub const FD_SCAN_LIMIT: i32 = 2500;

/// Exit status of a child that failed before its program image was replaced
pub const CHILD_SETUP_FAILURE_EXIT_CODE: i32 = 1;
