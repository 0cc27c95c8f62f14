//! In-memory stand-in for the controller bus.

use std::collections::HashSet;
use std::time::Duration;

use crate::protocol::{AddressSelector, ErrorKind, Response, Transport, STATUS_OPCODE};

const STATUS_WIDTH: usize = 24;

/// Status reply with the given bits set.
pub fn status_string(set: &[usize]) -> String {
    let mut bits = vec![b'0'; STATUS_WIDTH];
    for &i in set {
        bits[i] = b'1';
    }
    format!("{}OK", String::from_utf8_lossy(&bits))
}

type StatusFn = Box<dyn FnMut(&[String]) -> String>;

pub struct SimBus {
    /// Every frame sent, in order.
    pub log: Vec<String>,
    /// Boards whose selector is never acknowledged.
    pub dead_boards: HashSet<AddressSelector>,
    pub failing_opcodes: HashSet<String>,
    /// Frames past this count all fail.
    pub drop_link_after: Option<usize>,
    status: StatusFn,
}

impl SimBus {
    pub fn new() -> Self {
        Self {
            log: Vec::new(),
            dead_boards: HashSet::new(),
            failing_opcodes: HashSet::new(),
            drop_link_after: None,
            status: Box::new(|_| status_string(&[])),
        }
    }

    /// Status replies computed from the frame log so far.
    pub fn with_status<F>(mut self, f: F) -> Self
    where
        F: FnMut(&[String]) -> String + 'static,
    {
        self.status = Box::new(f);
        self
    }

    pub fn count(&self, frame: &str) -> usize {
        self.log.iter().filter(|f| f.as_str() == frame).count()
    }
}

impl Transport for SimBus {
    fn send_recv(&mut self, payload: &str, _read_timeout: Duration) -> Response {
        self.log.push(payload.to_string());

        if matches!(self.drop_link_after, Some(n) if self.log.len() > n) {
            return Response::failed(ErrorKind::CommunicationError);
        }

        if let Some(board) = AddressSelector::BOARDS
            .iter()
            .find(|b| b.token() == payload)
        {
            if self.dead_boards.contains(board) {
                return Response::failed(ErrorKind::CommunicationError);
            }
            return Response::received(b"OK".to_vec());
        }

        if self.failing_opcodes.contains(payload) {
            return Response::failed(ErrorKind::CommunicationError);
        }

        if payload == STATUS_OPCODE {
            let reply = (self.status)(self.log.as_slice());
            return Response::received(reply.into_bytes());
        }

        Response::received(b"OK".to_vec())
    }
}
