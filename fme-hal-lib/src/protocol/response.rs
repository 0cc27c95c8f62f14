use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Status bit never cleared within the operation timeout.
    Timeout,
    /// Link unreachable, write failed or no terminator within the read timeout.
    CommunicationError,
    /// Command descriptor rejected before any I/O.
    InvalidCommand,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Timeout => "timeout".fmt(f),
            ErrorKind::CommunicationError => "communication error".fmt(f),
            ErrorKind::InvalidCommand => "invalid command".fmt(f),
        }
    }
}

/// Outcome of one bus exchange.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub raw: Vec<u8>,
    pub text: Option<String>,
    pub valid: bool,
    pub error: Option<ErrorKind>,
}

impl Response {
    pub fn failed(error: ErrorKind) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    /// Complete frame read from the wire.
    pub fn received(raw: Vec<u8>) -> Self {
        let text = String::from_utf8_lossy(&raw).into_owned();
        Self {
            raw,
            text: Some(text),
            valid: true,
            error: None,
        }
    }

    pub fn success(&self) -> bool {
        self.valid && self.error.is_none()
    }

    pub fn is_comm_error(&self) -> bool {
        self.error == Some(ErrorKind::CommunicationError)
    }

    pub fn is_timeout(&self) -> bool {
        self.error == Some(ErrorKind::Timeout)
    }

    pub fn is_invalid_command(&self) -> bool {
        self.error == Some(ErrorKind::InvalidCommand)
    }

    /// Board answered, but with "ERR".
    pub fn is_rejected(&self) -> bool {
        self.valid && self.text().contains("ERR")
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    /// True iff no error is set and the character at `index` is '1'.
    /// Short or missing text reads as "not set".
    pub fn bit(&self, index: usize) -> bool {
        if self.error.is_some() {
            return false;
        }

        match self.text().chars().nth(index) {
            Some(c) => c == '1',
            None => {
                log::debug!("bit {} out of range in {:?}", index, self.text());
                false
            }
        }
    }

    /// Indices of all '1' characters, for display.
    pub fn set_bits(&self) -> Vec<usize> {
        self.text()
            .chars()
            .enumerate()
            .filter(|&(_, c)| c == '1')
            .map(|(i, _)| i)
            .collect()
    }
}

impl Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.error {
            Some(e) => write!(f, "{:?} ({})", self.text().trim(), e),
            None => write!(f, "{:?}", self.text().trim()),
        }
    }
}
