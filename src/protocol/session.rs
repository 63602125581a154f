//! A single command exchange with the terminal.
//!
//! ```text
//!  Idle ──► Encoding ──► Writing ──► Reading ──┬──► Succeeded
//!              │            │           │      ├──► TimedOut
//!              ▼            ▼           │      └──► Cancelled
//!            Failed ◄───────┴───────────┘
//! ```
//!
//! The read loop is the only place the session waits. Each pass checks the cancellation
//! token, then the overall deadline, then performs one bounded read and feeds the bytes to
//! the codec. Both the read and the idle delay between passes are clamped to the time left,
//! so a command never outlives its deadline by more than one read attempt.
use std::{
    thread,
    time::{Duration, Instant},
};

use log::{debug, info, trace, warn};
use thiserror::Error;

use super::{
    Response,
    connection::{BusyError, CommandGuard, ConnectionState, TransportHandle},
    correlation::CorrelationPolicy,
    frame::{AssemblyState, FrameCodec, ReceiveBuffer},
    request::{DEFAULT_TIMEOUT, EncodeError, Request},
    transport::{DEFAULT_MAX_READ, TransportError},
};

/// Reasons a command never reached the wire.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("transport is not open")]
    NotConnected,
    #[error(transparent)]
    Busy(#[from] BusyError),
    #[error("failed to encode request: {0}")]
    Encode(#[from] EncodeError),
}

/// Timing knobs for command sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Longest a single transport read may wait.
    pub read_attempt: Duration,
    /// Pause between read attempts.
    pub idle_delay: Duration,
    pub write_timeout: Duration,
    /// Deadline for commands that do not set their own.
    pub default_timeout: Duration,
    /// Most bytes a transport opened for these sessions hands back per read.
    pub max_read: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_attempt: Duration::from_millis(500),
            idle_delay: Duration::from_millis(50),
            write_timeout: Duration::from_millis(15_000),
            default_timeout: DEFAULT_TIMEOUT,
            max_read: DEFAULT_MAX_READ,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Encoding,
    Writing,
    Reading,
    Succeeded,
    TimedOut,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Succeeded
                | SessionState::TimedOut
                | SessionState::Cancelled
                | SessionState::Failed
        )
    }
}

pub struct CommandSession<'a> {
    guard: CommandGuard<'a>,
    transport: TransportHandle,
    codec: &'a dyn FrameCodec,
    config: &'a SessionConfig,
    correlation: &'a CorrelationPolicy,
    state: SessionState,
}

impl<'a> CommandSession<'a> {
    /// Claims the in-flight slot of `connection`.
    pub fn begin(
        connection: &'a ConnectionState,
        codec: &'a dyn FrameCodec,
        config: &'a SessionConfig,
        correlation: &'a CorrelationPolicy,
    ) -> Result<Self, CommandError> {
        let guard = connection.begin_command()?;
        let transport = guard
            .transport()
            .cloned()
            .ok_or(CommandError::NotConnected)?;

        Ok(Self {
            guard,
            transport,
            codec,
            config,
            correlation,
            state: SessionState::Idle,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!(
            "command {}: {:?} -> {:?}",
            self.guard.id(),
            self.state,
            next
        );
        self.state = next;
    }

    /// Drives `request` to a terminal outcome. The in-flight slot is released when this
    /// returns, whatever the outcome.
    pub fn run(mut self, mut request: Request) -> Result<Response, CommandError> {
        self.transition(SessionState::Encoding);
        self.correlation.stamp(&mut request);
        let frame = match self.codec.encode(&request) {
            Ok(frame) => frame,
            Err(e) => {
                self.transition(SessionState::Failed);
                warn!("command {} rejected: {e}", self.guard.id());
                return Err(e.into());
            }
        };

        self.transition(SessionState::Writing);
        info!(
            "sending {} request (seq {:#06x}, {} content bytes)",
            request.tag(),
            request.sequence(),
            request.content().len()
        );
        trace!("frame: {}", hex::encode(&frame));

        let written = self
            .transport
            .lock()
            .write(&frame, self.config.write_timeout);
        if let Err(e) = written {
            return Ok(self.fail(e));
        }

        self.transition(SessionState::Reading);
        let deadline = request.timeout().unwrap_or(self.config.default_timeout);
        Ok(self.read_loop(&request, deadline))
    }

    fn read_loop(&mut self, request: &Request, deadline: Duration) -> Response {
        let started = Instant::now();
        let mut buffer = ReceiveBuffer::new();
        let mut reported_malformed = false;

        loop {
            if self.guard.cancellation().is_cancelled() {
                self.transition(SessionState::Cancelled);
                info!("command {} cancelled", self.guard.id());
                return Response::Cancelled;
            }

            let elapsed = started.elapsed();
            if elapsed >= deadline {
                self.transition(SessionState::TimedOut);
                if !buffer.is_empty() {
                    debug!("discarding {} bytes of a partial frame", buffer.len());
                }
                info!("command {} timed out after {elapsed:?}", self.guard.id());
                return Response::Timeout;
            }

            let wait = self.config.read_attempt.min(deadline - elapsed);
            let read = self.transport.lock().read_chunk(wait);
            let chunk = match read {
                Ok(chunk) => chunk,
                Err(e) => return self.fail(e),
            };

            if !chunk.is_empty() {
                trace!("received {} bytes: {}", chunk.len(), hex::encode(&chunk));
                match self.codec.feed(&mut buffer, &chunk) {
                    AssemblyState::Complete(frame) => return self.finish(request, &frame),
                    AssemblyState::Malformed if !reported_malformed => {
                        warn!(
                            "command {}: inbound bytes do not start a frame, still waiting",
                            self.guard.id()
                        );
                        reported_malformed = true;
                    }
                    AssemblyState::Malformed | AssemblyState::Incomplete => {}
                }
            }

            let remaining = deadline.saturating_sub(started.elapsed());
            thread::sleep(self.config.idle_delay.min(remaining));
        }
    }

    fn finish(&mut self, request: &Request, frame: &[u8]) -> Response {
        trace!("complete frame: {}", hex::encode(frame));
        let response = self.codec.decode(frame);

        let Response::Success { header, .. } = &response else {
            self.transition(SessionState::Failed);
            warn!("command {} failed: {}", self.guard.id(), response.message());
            return response;
        };

        let correlation = self.correlation.check(request, header.as_ref());
        self.transition(SessionState::Succeeded);
        info!("command {} answered ({} bytes)", self.guard.id(), frame.len());
        response.with_correlation(correlation)
    }

    fn fail(&mut self, error: TransportError) -> Response {
        self.transition(SessionState::Failed);
        warn!("command {} transport failure: {error}", self.guard.id());
        self.guard.state().discard(&self.transport);

        Response::TransportError {
            reason: error.to_string(),
        }
    }
}
