mod response;

use std::{fmt::Display, str::FromStr, time::Duration};
use thiserror::Error;

pub use response::{ErrorKind, Response};

/// Line terminator appended to every outgoing frame.
pub const WRITE_TERMINATOR: &[u8] = b"\r";

/// Opcode asking a board for its status string.
pub const STATUS_OPCODE: &str = "S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AddressSelector {
    None,
    Picker,
    Aux,
    Serial,
    Qr,
}

impl AddressSelector {
    pub const BOARDS: [AddressSelector; 4] = [
        AddressSelector::Picker,
        AddressSelector::Aux,
        AddressSelector::Serial,
        AddressSelector::Qr,
    ];

    /// Wire-level token sent in the selector frame.
    pub fn token(self) -> &'static str {
        match self {
            AddressSelector::None => "NONE",
            AddressSelector::Picker => "H001",
            AddressSelector::Aux => "H002",
            AddressSelector::Serial => "H101",
            AddressSelector::Qr => "H555",
        }
    }

    pub fn is_none(self) -> bool {
        self == AddressSelector::None
    }
}

impl Display for AddressSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressSelector::None => "none".fmt(f),
            AddressSelector::Picker => "picker".fmt(f),
            AddressSelector::Aux => "aux".fmt(f),
            AddressSelector::Serial => "serial".fmt(f),
            AddressSelector::Qr => "qr".fmt(f),
        }
    }
}

#[derive(Error, Debug)]
pub enum SelectorError {
    #[error("invalid board '{0}'")]
    BadBoard(String),
}

impl FromStr for AddressSelector {
    type Err = SelectorError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_ascii_lowercase().as_str() {
            "picker" | "h001" => Ok(AddressSelector::Picker),
            "aux" | "h002" => Ok(AddressSelector::Aux),
            "serial" | "h101" => Ok(AddressSelector::Serial),
            "qr" | "h555" => Ok(AddressSelector::Qr),
            _ => Err(SelectorError::BadBoard(input.to_string())),
        }
    }
}

/// A frame is complete once "OK" or "ERR" shows up anywhere in it.
pub fn validate_response(buffer: &[u8]) -> bool {
    contains(buffer, b"OK") || contains(buffer, b"ERR")
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Half-duplex request/response exchange with one frame in flight at a time.
pub trait Transport {
    fn send_recv(&mut self, payload: &str, read_timeout: Duration) -> Response;
}
