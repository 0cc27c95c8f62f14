//! Addressed command execution.
//!
//! Every command is a two-frame exchange: the board selector, then the
//! opcode. Commands that move an actuator also name a status bit; the
//! executor then polls the board's status string until that bit drops,
//! and halts the actuator with the command's reset opcodes if it never does.

pub mod catalog;
#[cfg(test)]
pub(crate) mod sim;

use log::{debug, error, info, warn};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::protocol::{AddressSelector, ErrorKind, Response, Transport, STATUS_OPCODE};

/// Substituted by the runtime argument of parametrised opcodes.
pub const ARGUMENT_PLACEHOLDER: &str = "{0}";

pub const DEFAULT_COMMAND_WAIT: Duration = Duration::from_millis(8000);
pub const DEFAULT_SELECTOR_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpecError {
    #[error("{0:?} has no target board")]
    NoAddress(String),
    #[error("command has no opcode")]
    MissingOpcode,
    #[error("{opcode:?} polls status bit {bit} but has no poll interval or operation timeout")]
    MissingTiming { opcode: String, bit: usize },
    #[error("{0:?} needs an argument")]
    UnboundArgument(String),
    #[error("{0:?} takes no argument")]
    UnexpectedArgument(String),
}

/// Immutable descriptor of one logical command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub address: AddressSelector,
    pub opcode: String,
    /// Read timeout for the opcode frame's acknowledgment.
    pub command_wait: Duration,
    /// Index into the status string; set for commands with observable completion.
    pub status_bit: Option<usize>,
    /// Sent in order when the status bit never clears.
    pub reset_opcodes: Vec<String>,
    pub poll_interval: Duration,
    pub operation_timeout: Duration,
}

impl CommandSpec {
    pub fn new(address: AddressSelector, opcode: &str) -> Self {
        Self {
            address,
            opcode: opcode.to_string(),
            command_wait: DEFAULT_COMMAND_WAIT,
            status_bit: None,
            reset_opcodes: Vec::new(),
            poll_interval: Duration::ZERO,
            operation_timeout: Duration::ZERO,
        }
    }

    pub fn wait(mut self, ms: u64) -> Self {
        self.command_wait = Duration::from_millis(ms);
        self
    }

    pub fn status(mut self, bit: usize, poll_ms: u64, timeout_ms: u64) -> Self {
        self.status_bit = Some(bit);
        self.poll_interval = Duration::from_millis(poll_ms);
        self.operation_timeout = Duration::from_millis(timeout_ms);
        self
    }

    pub fn reset(mut self, opcodes: &[&str]) -> Self {
        self.reset_opcodes = opcodes.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn needs_argument(&self) -> bool {
        self.opcode.contains(ARGUMENT_PLACEHOLDER)
    }

    /// Fills the opcode's placeholder with `arg`.
    pub fn bind(&self, arg: &str) -> Result<CommandSpec, SpecError> {
        if !self.needs_argument() {
            return Err(SpecError::UnexpectedArgument(self.opcode.clone()));
        }

        Ok(CommandSpec {
            opcode: self.opcode.replacen(ARGUMENT_PLACEHOLDER, arg, 1),
            ..self.clone()
        })
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        if self.opcode.is_empty() {
            return Err(SpecError::MissingOpcode);
        }

        if self.address.is_none() {
            return Err(SpecError::NoAddress(self.opcode.clone()));
        }

        if self.needs_argument() {
            return Err(SpecError::UnboundArgument(self.opcode.clone()));
        }

        match self.status_bit {
            Some(bit) if self.poll_interval.is_zero() || self.operation_timeout.is_zero() => {
                Err(SpecError::MissingTiming {
                    opcode: self.opcode.clone(),
                    bit,
                })
            }
            _ => Ok(()),
        }
    }
}

/// Bounded re-issue of timeout-bound commands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub retries: usize,
    /// Replaces the command's operation timeout on every attempt.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 0,
            delay: Duration::from_millis(10000),
        }
    }
}

impl RetryPolicy {
    pub fn run(&self, executor: &mut Executor, spec: &CommandSpec) -> Response {
        if self.retries == 0 {
            executor.execute(spec)
        } else {
            executor.retryable(spec, self.retries, self.delay)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Completion {
    Satisfied,
    TimedOut,
    CommError,
}

impl Completion {
    fn error(self) -> Option<ErrorKind> {
        match self {
            Completion::Satisfied => None,
            Completion::TimedOut => Some(ErrorKind::Timeout),
            Completion::CommError => Some(ErrorKind::CommunicationError),
        }
    }
}

/// Drives a borrowed transport through command exchanges, one at a time.
pub struct Executor<'a> {
    transport: &'a mut dyn Transport,
    selector_timeout: Duration,
}

impl<'a> Executor<'a> {
    pub fn new(transport: &'a mut dyn Transport) -> Self {
        Self {
            transport,
            selector_timeout: DEFAULT_SELECTOR_TIMEOUT,
        }
    }

    pub fn with_selector_timeout(mut self, timeout: Duration) -> Self {
        self.selector_timeout = timeout;
        self
    }

    pub fn execute(&mut self, spec: &CommandSpec) -> Response {
        if let Err(e) = spec.validate() {
            error!("refusing to send: {}", e);
            return Response::failed(ErrorKind::InvalidCommand);
        }

        debug!("execute {} {:?}", spec.address, spec.opcode);
        let response = self.send_command(spec.address, &spec.opcode, spec.command_wait);

        let response = match spec.status_bit {
            Some(bit) if !response.is_comm_error() => self.wait_for_completion(spec, bit, response),
            _ => response,
        };

        info!("{} {:?} returned {}", spec.address, spec.opcode, response);
        response
    }

    /// Re-issues `spec` up to `retries` times with its operation timeout
    /// replaced by `delay`. Communication errors end the loop at once.
    pub fn retryable(&mut self, spec: &CommandSpec, retries: usize, delay: Duration) -> Response {
        let spec = CommandSpec {
            operation_timeout: delay,
            ..spec.clone()
        };
        let attempts = retries.max(1);

        let mut response = self.execute(&spec);
        for attempt in 2..=attempts {
            if response.success() || response.is_comm_error() || response.is_invalid_command() {
                return response;
            }
            warn!(
                "{} {:?} failed ({}), attempt {}/{}",
                spec.address, spec.opcode, response, attempt, attempts
            );
            response = self.execute(&spec);
        }
        response
    }

    /// Status string of one board.
    pub fn status(&mut self, board: AddressSelector) -> Response {
        self.execute(&CommandSpec::new(board, STATUS_OPCODE))
    }

    fn send_command(&mut self, address: AddressSelector, opcode: &str, wait: Duration) -> Response {
        let r = self.transport.send_recv(address.token(), self.selector_timeout);
        if !r.success() {
            warn!("selector {} failed", address);
            return Response::failed(ErrorKind::CommunicationError);
        }

        let r = self.transport.send_recv(opcode, wait);
        if !r.success() {
            warn!("command {:?} to {} failed", opcode, address);
            return Response::failed(ErrorKind::CommunicationError);
        }

        if r.is_rejected() {
            warn!("{} rejected {:?}: {:?}", address, opcode, r.text());
        }
        r
    }

    /// A clear bit, a short status string included, counts as done.
    fn wait_for_completion(&mut self, spec: &CommandSpec, bit: usize, mut last: Response) -> Response {
        let started = Instant::now();

        let completion = loop {
            thread::sleep(spec.poll_interval);

            let status = self.send_command(spec.address, STATUS_OPCODE, spec.command_wait);
            if status.is_comm_error() {
                break Completion::CommError;
            }
            last = status;

            if !last.bit(bit) {
                debug!("{} status bit {} clear", spec.address, bit);
                break Completion::Satisfied;
            }

            if started.elapsed() > spec.operation_timeout {
                break Completion::TimedOut;
            }
        };

        if completion == Completion::TimedOut {
            warn!(
                "{} {:?} still busy after {:?}",
                spec.address, spec.opcode, spec.operation_timeout
            );
            self.reset(spec);
        }

        last.error = completion.error();
        last
    }

    fn reset(&mut self, spec: &CommandSpec) {
        for opcode in &spec.reset_opcodes {
            let r = self.send_command(spec.address, opcode, spec.command_wait);
            if !r.success() {
                warn!("reset {:?} on {} failed: {}", opcode, spec.address, r);
            }
        }
    }
}
