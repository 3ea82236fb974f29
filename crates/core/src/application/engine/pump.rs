// IO Pump - non-blocking multiplexed transfer between caller streams and child pipes

use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::{debug, trace};

use crate::domain::StreamLiveness;
use crate::error::RunError;
use crate::port::{Channel, ChannelEvents, ChildPipes, Interest, OutputChannel};

/// Whether another round may still produce output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    /// stdout and/or stderr still open
    Pending,
    /// Both output streams closed (stdin state is irrelevant)
    Finished,
}

/// Outcome of draining one output channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drained {
    /// Read until "would block"; more may come later
    Open,
    /// Zero-byte read: far end closed
    Closed,
}

/// Drives one child's pipes in bounded rounds.
///
/// Owns the parent's pipe ends; dropping the pump closes them.
pub struct IoPump {
    pipes: Box<dyn ChildPipes>,
    liveness: StreamLiveness,
    /// Input pulled from the source but not yet accepted by the child
    pending: Vec<u8>,
    input_exhausted: bool,
    buffer: Vec<u8>,
    poll_interval: Duration,
}

impl IoPump {
    pub fn new(pipes: Box<dyn ChildPipes>, poll_interval: Duration, chunk_size: usize) -> Self {
        Self {
            pipes,
            liveness: StreamLiveness::default(),
            pending: Vec::new(),
            input_exhausted: false,
            buffer: vec![0; chunk_size.max(1)],
            poll_interval,
        }
    }

    pub fn liveness(&self) -> StreamLiveness {
        self.liveness
    }

    /// Perform one readiness wait and service whatever became ready
    ///
    /// # Errors
    /// - RunError::Communication on any I/O error other than would-block,
    ///   broken pipe on stdin, or interruption
    pub fn round(
        &mut self,
        input: &mut dyn Read,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<PumpState, RunError> {
        if !self.liveness.any_output() {
            return Ok(PumpState::Finished);
        }

        let interest = Interest {
            stdin: self.liveness.stdin(),
            stdout: self.liveness.stdout(),
            stderr: self.liveness.stderr(),
        };

        let ready = match self.pipes.poll(interest, self.poll_interval) {
            Ok(ready) => ready,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(self.state()),
            Err(e) => return Err(communication("poll", e)),
        };

        if interest.stdin {
            if ready.stdin.ready {
                self.send_input(input)?;
            }
            if ready.stdin.hangup {
                self.close_stdin();
            }
        }

        self.service_output(OutputChannel::Stdout, ready.stdout, stdout)?;
        self.service_output(OutputChannel::Stderr, ready.stderr, stderr)?;

        Ok(self.state())
    }

    /// Unconditionally read whatever is buffered on the live output pipes.
    ///
    /// Used once the child is known to have exited: some platforms never
    /// report its pipes as closed.
    pub fn drain(
        &mut self,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<(), RunError> {
        if self.liveness.stdout()
            && self.drain_channel(OutputChannel::Stdout, stdout)? == Drained::Closed
        {
            self.close_output(OutputChannel::Stdout);
        }
        if self.liveness.stderr()
            && self.drain_channel(OutputChannel::Stderr, stderr)? == Drained::Closed
        {
            self.close_output(OutputChannel::Stderr);
        }
        Ok(())
    }

    /// Close every descriptor that is still open
    pub fn close_all(&mut self) {
        self.close_stdin();
        self.close_output(OutputChannel::Stdout);
        self.close_output(OutputChannel::Stderr);
    }

    fn state(&self) -> PumpState {
        if self.liveness.any_output() {
            PumpState::Pending
        } else {
            PumpState::Finished
        }
    }

    fn send_input(&mut self, input: &mut dyn Read) -> Result<(), RunError> {
        if self.pending.is_empty() && !self.input_exhausted {
            let n = loop {
                match input.read(&mut self.buffer) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(communication("read input source", e)),
                }
            };
            if n == 0 {
                self.input_exhausted = true;
            } else {
                self.pending.extend_from_slice(&self.buffer[..n]);
            }
        }

        if self.pending.is_empty() {
            debug!("Input source exhausted, closing child stdin");
            self.close_stdin();
            return Ok(());
        }

        while !self.pending.is_empty() {
            match self.pipes.write_stdin(&self.pending) {
                Ok(0) => break,
                Ok(n) => {
                    trace!(bytes = n, "Wrote to child stdin");
                    self.pending.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    debug!(unsent = self.pending.len(), "Child stopped reading stdin");
                    self.pending.clear();
                    self.close_stdin();
                    break;
                }
                Err(e) => return Err(communication("write child stdin", e)),
            }
        }
        Ok(())
    }

    fn service_output(
        &mut self,
        channel: OutputChannel,
        events: ChannelEvents,
        sink: &mut dyn Write,
    ) -> Result<(), RunError> {
        if !self.is_live(channel) || !(events.ready || events.hangup) {
            return Ok(());
        }
        // A hang-up may still have buffered bytes behind it
        let drained = self.drain_channel(channel, sink)?;
        if drained == Drained::Closed || events.hangup {
            self.close_output(channel);
        }
        Ok(())
    }

    fn drain_channel(
        &mut self,
        channel: OutputChannel,
        sink: &mut dyn Write,
    ) -> Result<Drained, RunError> {
        loop {
            match self.pipes.read_output(channel, &mut self.buffer) {
                Ok(0) => return Ok(Drained::Closed),
                Ok(n) => {
                    trace!(?channel, bytes = n, "Read from child");
                    sink.write_all(&self.buffer[..n])
                        .map_err(|e| communication("write output sink", e))?;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Drained::Open),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(communication("read child output", e)),
            }
        }
    }

    fn is_live(&self, channel: OutputChannel) -> bool {
        match channel {
            OutputChannel::Stdout => self.liveness.stdout(),
            OutputChannel::Stderr => self.liveness.stderr(),
        }
    }

    fn close_stdin(&mut self) {
        if self.liveness.stdin() {
            self.liveness.kill_stdin();
            self.pipes.close(Channel::Stdin);
        }
    }

    fn close_output(&mut self, channel: OutputChannel) {
        if !self.is_live(channel) {
            return;
        }
        match channel {
            OutputChannel::Stdout => self.liveness.kill_stdout(),
            OutputChannel::Stderr => self.liveness.kill_stderr(),
        }
        debug!(?channel, "Child output closed");
        self.pipes.close(channel.into());
    }
}

fn communication(operation: &str, e: io::Error) -> RunError {
    RunError::Communication(format!("{}: {}", operation, e))
}
