use std::{fmt, str::FromStr, time::Duration};

use thiserror::Error;

/// Sequence number used when a caller does not pick one.
pub const DEFAULT_SEQUENCE: u16 = 0x0462;

/// Overall deadline applied to a command when the caller does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Largest content payload a single frame can carry.
pub const MAX_CONTENT_LENGTH: usize = u16::MAX as usize;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("invalid request tag '{0}', expected two hex digits")]
    InvalidTag(String),

    #[error("content too large: {size} bytes (max 65535)")]
    ContentTooLarge { size: usize },

    #[error("failed to encode frame header: {0}")]
    Header(#[from] bincode::error::EncodeError),
}

/// Exchange kinds understood by the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    FromCashier,
    FromPos,
    HandshakeRequest,
    HandshakeResponse,
    CancelRequest,
    CancelResponse,
}

impl RequestKind {
    pub fn code(self) -> u8 {
        match self {
            RequestKind::FromCashier => 0x01,
            RequestKind::FromPos => 0x02,
            RequestKind::HandshakeRequest => 0xF1,
            RequestKind::HandshakeResponse => 0xF2,
            RequestKind::CancelRequest => 0xC1,
            RequestKind::CancelResponse => 0xC2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(RequestKind::FromCashier),
            0x02 => Some(RequestKind::FromPos),
            0xF1 => Some(RequestKind::HandshakeRequest),
            0xF2 => Some(RequestKind::HandshakeResponse),
            0xC1 => Some(RequestKind::CancelRequest),
            0xC2 => Some(RequestKind::CancelResponse),
            _ => None,
        }
    }

    /// The kind the terminal answers this request with, if it has a
    /// dedicated reply kind.
    pub fn reply(self) -> Option<Self> {
        match self {
            RequestKind::FromCashier => Some(RequestKind::FromPos),
            RequestKind::HandshakeRequest => Some(RequestKind::HandshakeResponse),
            RequestKind::CancelRequest => Some(RequestKind::CancelResponse),
            _ => None,
        }
    }
}

/// One-byte tag identifying the kind of exchange a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestTag(u8);

impl RequestTag {
    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    pub fn byte(self) -> u8 {
        self.0
    }

    pub fn kind(self) -> Option<RequestKind> {
        RequestKind::from_code(self.0)
    }
}

impl From<RequestKind> for RequestTag {
    fn from(value: RequestKind) -> Self {
        Self(value.code())
    }
}

impl FromStr for RequestTag {
    type Err = EncodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 2 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(EncodeError::InvalidTag(s.to_string()));
        }

        u8::from_str_radix(s, 16)
            .map(RequestTag)
            .map_err(|_| EncodeError::InvalidTag(s.to_string()))
    }
}

impl fmt::Display for RequestTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}", self.0)
    }
}

/// A single command destined for the terminal.
///
/// Content is carried as opaque bytes; the engine never looks inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    tag: RequestTag,
    content: Vec<u8>,
    sequence: Option<u16>,
    timeout: Option<Duration>,
}

impl Request {
    pub fn new(tag: impl Into<RequestTag>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            tag: tag.into(),
            content: content.into(),
            sequence: None,
            timeout: None,
        }
    }

    /// Builds a request from a two hex digit tag such as `"F1"`.
    pub fn parse(tag: &str, content: impl Into<Vec<u8>>) -> Result<Self, EncodeError> {
        Ok(Self::new(tag.parse::<RequestTag>()?, content))
    }

    pub fn handshake(content: impl Into<Vec<u8>>) -> Self {
        Self::new(RequestKind::HandshakeRequest, content)
    }

    pub fn cashier(content: impl Into<Vec<u8>>) -> Self {
        Self::new(RequestKind::FromCashier, content)
    }

    pub fn cancel() -> Self {
        Self::new(RequestKind::CancelRequest, Vec::<u8>::new())
    }

    /// Sets the sequence number, keeping only the low 16 bits.
    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = Some((sequence & 0xFFFF) as u16);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn tag(&self) -> RequestTag {
        self.tag
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// The sequence number placed on the wire.
    pub fn sequence(&self) -> u16 {
        self.sequence.unwrap_or(DEFAULT_SEQUENCE)
    }

    pub fn requested_sequence(&self) -> Option<u16> {
        self.sequence
    }

    /// Deadline set on this request; the session's configured default applies otherwise.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn assign_sequence(&mut self, sequence: u16) {
        self.sequence = Some(sequence);
    }
}
