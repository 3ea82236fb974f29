// Unix process platform (ADR-001)
// reason: nix for pipe/fork/fcntl/waitpid/kill, raw libc in the forked child (async-signal-safe only)
use std::ffi::CString;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, pipe, ForkResult, Pid as NixPid};
use tracing::{debug, warn};

use procrun_core::application::engine::constants::{
    CHILD_SETUP_FAILURE_EXIT_CODE, FD_SCAN_LIMIT,
};
use procrun_core::domain::{Pid, TerminationStatus};
use procrun_core::error::RunError;
use procrun_core::port::{
    Channel, ChannelEvents, ChildPipes, Interest, KillOutcome, LaunchRequest, LaunchedChild,
    OutputChannel, ProcessPlatform, Readiness, WaitMode,
};

/// fork/execvp based platform
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixPlatform;

impl UnixPlatform {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessPlatform for UnixPlatform {
    fn launch(&self, request: &LaunchRequest) -> Result<LaunchedChild, RunError> {
        // Everything the child touches is prepared here: no allocation after fork
        let plan = ChildPlan::prepare(request)?;

        let (stdin_read, stdin_write) = pipe().map_err(|e| launch_error("stdin pipe", e))?;
        let (stdout_read, stdout_write) = pipe().map_err(|e| launch_error("stdout pipe", e))?;
        let (stderr_read, stderr_write) = pipe().map_err(|e| launch_error("stderr pipe", e))?;

        // SAFETY: the child only calls async-signal-safe functions until exec or _exit
        match unsafe { fork() } {
            Ok(ForkResult::Child) => plan.exec(
                stdin_read.as_raw_fd(),
                stdout_write.as_raw_fd(),
                stderr_write.as_raw_fd(),
            ),
            Ok(ForkResult::Parent { child }) => {
                drop(stdin_read);
                drop(stdout_write);
                drop(stderr_write);

                let pipes = match UnixPipes::new(stdin_write, stdout_read, stderr_read) {
                    Ok(pipes) => pipes,
                    Err(e) => {
                        self.kill_and_reap(child.as_raw());
                        return Err(RunError::Launch(format!("set non-blocking: {}", e)));
                    }
                };
                debug!(pid = child.as_raw(), program = %request.command.program(), "Forked child");
                Ok(LaunchedChild {
                    pid: child.as_raw(),
                    pipes: Box::new(pipes),
                })
            }
            Err(e) => Err(launch_error("fork", e)),
        }
    }

    fn wait_exited(&self, pid: Pid) -> io::Result<()> {
        loop {
            // SAFETY: siginfo_t is plain data; waitid only writes into it
            let rc = unsafe {
                let mut info: libc::siginfo_t = std::mem::zeroed();
                libc::waitid(
                    libc::P_PID,
                    pid as libc::id_t,
                    &mut info,
                    libc::WEXITED | libc::WNOWAIT,
                )
            };
            match rc {
                0 => return Ok(()),
                _ if Errno::last() == Errno::EINTR => continue,
                _ => return Err(io::Error::last_os_error()),
            }
        }
    }

    fn wait(&self, pid: Pid, mode: WaitMode) -> io::Result<Option<TerminationStatus>> {
        let flags = match mode {
            WaitMode::Blocking => WaitPidFlag::empty(),
            WaitMode::NonBlocking => WaitPidFlag::WNOHANG,
        };
        loop {
            match waitpid(NixPid::from_raw(pid), Some(flags)) {
                Ok(WaitStatus::Exited(_, code)) => {
                    return Ok(Some(TerminationStatus::Exited(code)))
                }
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    return Ok(Some(TerminationStatus::Signaled(signal as i32)))
                }
                Ok(WaitStatus::StillAlive) => return Ok(None),
                // Stop/continue notifications are not terminations
                Ok(_) if mode == WaitMode::NonBlocking => return Ok(None),
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from(e)),
            }
        }
    }

    fn kill(&self, pid: Pid) -> io::Result<KillOutcome> {
        match kill(NixPid::from_raw(pid), Signal::SIGKILL) {
            Ok(()) => Ok(KillOutcome::Delivered),
            Err(Errno::ESRCH) => Ok(KillOutcome::NoSuchProcess),
            Err(e) => Err(io::Error::from(e)),
        }
    }
}

impl UnixPlatform {
    /// Best-effort cleanup of a child the parent cannot hand out
    fn kill_and_reap(&self, pid: Pid) {
        if let Err(e) = self.kill(pid) {
            warn!(pid, error = %e, "Failed to kill orphaned child");
        }
        if let Err(e) = self.wait(pid, WaitMode::Blocking) {
            warn!(pid, error = %e, "Failed to reap orphaned child");
        }
    }
}

fn launch_error(operation: &str, e: Errno) -> RunError {
    RunError::Launch(format!("{} failed: {}", operation, e))
}

fn c_string(value: &[u8], what: &str) -> Result<CString, RunError> {
    CString::new(value)
        .map_err(|_| RunError::Launch(format!("{} contains an interior NUL byte", what)))
}

fn c_path(path: &Path, what: &str) -> Result<CString, RunError> {
    c_string(path.as_os_str().as_bytes(), what)
}

/// Pre-built arguments and diagnostics for the forked child
struct ChildPlan {
    argv: Vec<CString>,
    argv_ptrs: Vec<*const libc::c_char>,
    working_dir: Option<CString>,
    chroot_dir: Option<CString>,
    root: CString,
    max_fd: RawFd,
    chroot_failed: Vec<u8>,
    exec_failed: Vec<u8>,
}

impl ChildPlan {
    fn prepare(request: &LaunchRequest) -> Result<Self, RunError> {
        let argv = request
            .command
            .argv()
            .iter()
            .map(|arg| c_string(arg.as_bytes(), "argument"))
            .collect::<Result<Vec<_>, _>>()?;
        let mut argv_ptrs: Vec<*const libc::c_char> = argv.iter().map(|a| a.as_ptr()).collect();
        argv_ptrs.push(std::ptr::null());

        let working_dir = match &request.working_dir {
            Some(dir) => Some(c_path(dir, "working directory")?),
            None => None,
        };
        let chroot_dir = match &request.chroot_dir {
            Some(dir) => Some(c_path(dir, "chroot directory")?),
            None => None,
        };
        let chroot_failed = match &request.chroot_dir {
            Some(dir) => format!("Failed to chroot '{}' errno=", dir.display()).into_bytes(),
            None => Vec::new(),
        };
        let exec_failed = format!(
            "Failed to start child process '{}' errno=",
            request.command.program()
        )
        .into_bytes();

        Ok(Self {
            argv,
            argv_ptrs,
            working_dir,
            chroot_dir,
            root: c_string(b"/", "root directory")?,
            max_fd: max_fd(),
            chroot_failed,
            exec_failed,
        })
    }

    /// Runs in the forked child. Never returns.
    fn exec(&self, stdin: RawFd, stdout: RawFd, stderr: RawFd) -> ! {
        // SAFETY: only async-signal-safe libc calls on pre-built buffers
        unsafe {
            libc::dup2(stdin, libc::STDIN_FILENO);
            libc::dup2(stdout, libc::STDOUT_FILENO);
            libc::dup2(stderr, libc::STDERR_FILENO);

            // The parent may ignore SIGPIPE; the new program should not inherit that
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);

            if let Some(dir) = &self.chroot_dir {
                if libc::chroot(dir.as_ptr()) != 0 {
                    fail(&self.chroot_failed);
                }
                if libc::chdir(self.root.as_ptr()) != 0 {
                    fail(b"Failed to change root directory. errno=");
                }
            }
            if let Some(dir) = &self.working_dir {
                if libc::chdir(dir.as_ptr()) != 0 {
                    fail(b"Failed to change cwd. errno=");
                }
            }

            for fd in 3..self.max_fd {
                libc::close(fd);
            }

            libc::execvp(self.argv[0].as_ptr(), self.argv_ptrs.as_ptr());
            fail(&self.exec_failed)
        }
    }
}

/// Highest descriptor number (exclusive) to close in the child
fn max_fd() -> RawFd {
    // SAFETY: sysconf has no preconditions
    let open_max = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
    if open_max > 0 && open_max < FD_SCAN_LIMIT as libc::c_long {
        open_max as RawFd
    } else {
        FD_SCAN_LIMIT
    }
}

/// Write `<prefix><errno>\n` to stderr and exit. Child side only.
unsafe fn fail(prefix: &[u8]) -> ! {
    let errno = Errno::last() as i32;
    write_all_raw(libc::STDERR_FILENO, prefix);

    let mut digits = [0u8; 12];
    let len = format_decimal(errno, &mut digits);
    write_all_raw(libc::STDERR_FILENO, &digits[digits.len() - len..]);
    write_all_raw(libc::STDERR_FILENO, b"\n");

    libc::_exit(CHILD_SETUP_FAILURE_EXIT_CODE)
}

unsafe fn write_all_raw(fd: RawFd, mut buf: &[u8]) {
    while !buf.is_empty() {
        let n = libc::write(fd, buf.as_ptr().cast(), buf.len());
        if n <= 0 {
            if n < 0 && Errno::last() == Errno::EINTR {
                continue;
            }
            return;
        }
        buf = &buf[n as usize..];
    }
}

/// Right-aligned decimal rendering into `out`; returns the digit count
fn format_decimal(value: i32, out: &mut [u8; 12]) -> usize {
    let negative = value < 0;
    let mut magnitude = value.unsigned_abs();
    let mut pos = out.len();
    loop {
        pos -= 1;
        out[pos] = b'0' + (magnitude % 10) as u8;
        magnitude /= 10;
        if magnitude == 0 {
            break;
        }
    }
    if negative {
        pos -= 1;
        out[pos] = b'-';
    }
    out.len() - pos
}

/// Parent ends of the three pipes, all non-blocking
pub struct UnixPipes {
    stdin: Option<File>,
    stdout: Option<File>,
    stderr: Option<File>,
}

impl UnixPipes {
    fn new(stdin: OwnedFd, stdout: OwnedFd, stderr: OwnedFd) -> io::Result<Self> {
        for fd in [&stdin, &stdout, &stderr] {
            set_nonblocking(fd.as_raw_fd())?;
        }
        Ok(Self {
            stdin: Some(File::from(stdin)),
            stdout: Some(File::from(stdout)),
            stderr: Some(File::from(stderr)),
        })
    }

    fn output(&mut self, channel: OutputChannel) -> Option<&mut File> {
        match channel {
            OutputChannel::Stdout => self.stdout.as_mut(),
            OutputChannel::Stderr => self.stderr.as_mut(),
        }
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

fn not_open() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "pipe already closed")
}

impl ChildPipes for UnixPipes {
    fn poll(&mut self, interest: Interest, timeout: Duration) -> io::Result<Readiness> {
        let wanted = [
            (Channel::Stdin, interest.stdin, self.stdin.as_ref(), libc::POLLOUT),
            (Channel::Stdout, interest.stdout, self.stdout.as_ref(), libc::POLLIN),
            (Channel::Stderr, interest.stderr, self.stderr.as_ref(), libc::POLLIN),
        ];

        let mut fds = [libc::pollfd {
            fd: -1,
            events: 0,
            revents: 0,
        }; 3];
        let mut channels = [Channel::Stdin; 3];
        let mut count = 0;
        for (channel, want, file, events) in wanted {
            if let (true, Some(file)) = (want, file) {
                fds[count] = libc::pollfd {
                    fd: file.as_raw_fd(),
                    events,
                    revents: 0,
                };
                channels[count] = channel;
                count += 1;
            }
        }

        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        // SAFETY: fds[..count] are initialised pollfd entries for open descriptors
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), count as libc::nfds_t, timeout_ms) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut readiness = Readiness::default();
        for (pfd, channel) in fds[..count].iter().zip(channels) {
            let events = ChannelEvents {
                ready: pfd.revents & pfd.events != 0,
                hangup: pfd.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0,
            };
            match channel {
                Channel::Stdin => readiness.stdin = events,
                Channel::Stdout => readiness.stdout = events,
                Channel::Stderr => readiness.stderr = events,
            }
        }
        Ok(readiness)
    }

    fn write_stdin(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stdin.as_mut().ok_or_else(not_open)?.write(buf)
    }

    fn read_output(&mut self, channel: OutputChannel, buf: &mut [u8]) -> io::Result<usize> {
        self.output(channel).ok_or_else(not_open)?.read(buf)
    }

    fn close(&mut self, channel: Channel) {
        match channel {
            Channel::Stdin => self.stdin = None,
            Channel::Stdout => self.stdout = None,
            Channel::Stderr => self.stderr = None,
        }
    }
}
