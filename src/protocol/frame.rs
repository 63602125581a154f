//! Wire framing for terminal commands.
//!
//! Every exchange with the terminal is carried in a single frame:
//!
//! ```text
//! STX | VERSION | TAG | RESERVED | SEQ (u16 BE) | LEN (u16 BE) | CONTENT | ETX | BCC
//! ```
//!
//! The 8 byte header is a fixed-layout struct serialized with `bincode` using big-endian,
//! fixed-width integers, so it maps byte for byte onto the wire. `BCC` is the XOR of every
//! byte from `VERSION` through `ETX`; the leading `STX` is not part of it.
//!
//! # Assembly
//!
//! Inbound bytes arrive in arbitrary chunks. A [`FrameCodec`] decides when the bytes
//! collected in a [`ReceiveBuffer`] form a complete frame and how that frame becomes a
//! [`Response`]:
//!
//! - [`LooseCodec`] declares a frame complete as soon as the buffer starts with `STX` and
//!   holds an `ETX` anywhere after it. Neither the length nor the checksum is verified.
//! - [`StrictCodec`] waits for the declared content length, checks the `ETX` position and
//!   verifies the checksum before producing a response.
//!
//! Content is never escaped, so a payload containing the `ETX` byte value ends a loosely
//! assembled frame early.
//!
//! # Example
//! ```rust
//! use paylink::protocol::{Request, RequestKind, frame};
//!
//! let request = Request::new(RequestKind::CancelRequest, Vec::<u8>::new()).with_sequence(1);
//! let bytes = frame::encode(&request).unwrap();
//!
//! assert_eq!(bytes, [0x02, 0x02, 0xC1, 0x00, 0x00, 0x01, 0x00, 0x00, 0x03, 0xC1]);
//! ```
use bincode::{
    Decode, Encode,
    config::{BigEndian, Configuration, Fixint},
};
use log::trace;

use super::{
    Response,
    correlation::Correlation,
    request::{EncodeError, MAX_CONTENT_LENGTH, Request, RequestTag},
};

pub const STX: u8 = 0x02;
pub const VERSION: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const RESERVED: u8 = 0x00;

pub const HEADER_LEN: usize = 8;
/// `ETX` followed by `BCC`.
pub const TRAILER_LEN: usize = 2;

/// Buffers of this size or smaller cannot hold any content.
const MIN_CONTENT_FRAME: usize = 7;

fn wire_config() -> Configuration<BigEndian, Fixint> {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

/// Fixed 8 byte frame header.
#[derive(Debug, Clone, Copy, Encode, Decode, PartialEq, Eq)]
pub struct FrameHeader {
    pub start: u8,
    pub version: u8,
    pub tag: u8,
    pub reserved: u8,
    pub sequence: u16,
    pub length: u16,
}

impl FrameHeader {
    pub fn new(tag: RequestTag, sequence: u16, length: u16) -> Self {
        Self {
            start: STX,
            version: VERSION,
            tag: tag.byte(),
            reserved: RESERVED,
            sequence,
            length,
        }
    }

    /// Reads the header from the front of `bytes`, if enough bytes are present.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let head = bytes.get(..HEADER_LEN)?;
        bincode::decode_from_slice(head, wire_config())
            .ok()
            .map(|(header, _)| header)
    }

    pub fn request_tag(&self) -> RequestTag {
        RequestTag::from_byte(self.tag)
    }
}

/// XOR checksum over `bytes`.
pub fn bcc(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Builds the wire frame for `request`.
pub fn encode(request: &Request) -> Result<Vec<u8>, EncodeError> {
    let content = request.content();
    if content.len() > MAX_CONTENT_LENGTH {
        return Err(EncodeError::ContentTooLarge {
            size: content.len(),
        });
    }

    let header = FrameHeader::new(request.tag(), request.sequence(), content.len() as u16);
    let mut frame = bincode::encode_to_vec(header, wire_config())?;
    frame.reserve(content.len() + TRAILER_LEN);
    frame.extend_from_slice(content);
    frame.push(ETX);
    frame.push(bcc(&frame[1..]));

    trace!("encoded frame: {}", hex::encode(&frame));
    Ok(frame)
}

/// Bytes collected from the transport for a single exchange.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReceiveBuffer {
    bytes: Vec<u8>,
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    fn extend(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }
}

/// Progress of frame assembly after feeding new bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyState {
    Incomplete,
    Complete(Vec<u8>),
    Malformed,
}

/// Frame assembly and decoding strategy used by a command session.
pub trait FrameCodec {
    /// Appends `bytes` to `buffer` and reports whether a frame is ready.
    fn feed(&self, buffer: &mut ReceiveBuffer, bytes: &[u8]) -> AssemblyState;

    /// Turns a complete frame into a response.
    fn decode(&self, frame: &[u8]) -> Response;

    fn encode(&self, request: &Request) -> Result<Vec<u8>, EncodeError> {
        encode(request)
    }
}

/// Assembly rules of the terminal's reference host software.
#[derive(Debug, Default, Clone, Copy)]
pub struct LooseCodec;

impl FrameCodec for LooseCodec {
    fn feed(&self, buffer: &mut ReceiveBuffer, bytes: &[u8]) -> AssemblyState {
        buffer.extend(bytes);

        let buf = buffer.as_slice();
        match buf.first() {
            None => AssemblyState::Incomplete,
            Some(&first) if first != STX => AssemblyState::Malformed,
            Some(_) if buf.len() >= 2 && buf[1..].contains(&ETX) => {
                AssemblyState::Complete(buf.to_vec())
            }
            Some(_) => AssemblyState::Incomplete,
        }
    }

    fn decode(&self, frame: &[u8]) -> Response {
        Response::Success {
            raw: frame.to_vec(),
            parsed_content: loose_content(frame),
            header: FrameHeader::parse(frame),
            correlation: Correlation::Unchecked,
        }
    }
}

/// Content between the header and the first `ETX` that follows it.
fn loose_content(frame: &[u8]) -> Option<String> {
    if frame.len() <= MIN_CONTENT_FRAME {
        return None;
    }

    let body = frame.get(HEADER_LEN..)?;
    let end = body.iter().position(|&b| b == ETX)?;
    if end == 0 {
        return None;
    }

    Some(String::from_utf8_lossy(&body[..end]).into_owned())
}

/// Assembly that honours the declared length and verifies the checksum.
#[derive(Debug, Default, Clone, Copy)]
pub struct StrictCodec;

impl FrameCodec for StrictCodec {
    fn feed(&self, buffer: &mut ReceiveBuffer, bytes: &[u8]) -> AssemblyState {
        buffer.extend(bytes);

        let buf = buffer.as_slice();
        if buf.is_empty() {
            return AssemblyState::Incomplete;
        }
        if buf[0] != STX || buf.get(1).is_some_and(|&v| v != VERSION) {
            return AssemblyState::Malformed;
        }

        let Some(header) = FrameHeader::parse(buf) else {
            return AssemblyState::Incomplete;
        };
        let etx_at = HEADER_LEN + header.length as usize;
        if buf.len() < etx_at + TRAILER_LEN {
            return AssemblyState::Incomplete;
        }
        if buf[etx_at] != ETX {
            return AssemblyState::Malformed;
        }

        AssemblyState::Complete(buf[..etx_at + TRAILER_LEN].to_vec())
    }

    fn decode(&self, frame: &[u8]) -> Response {
        let Some(header) = FrameHeader::parse(frame) else {
            return Response::ProtocolError {
                reason: format!("frame of {} bytes is shorter than its header", frame.len()),
            };
        };

        let etx_at = HEADER_LEN + header.length as usize;
        if frame.len() != etx_at + TRAILER_LEN {
            return Response::ProtocolError {
                reason: format!(
                    "length mismatch: header declares {} content bytes, frame holds {}",
                    header.length,
                    frame.len().saturating_sub(HEADER_LEN + TRAILER_LEN)
                ),
            };
        }
        if frame[etx_at] != ETX {
            return Response::ProtocolError {
                reason: format!("missing ETX at offset {etx_at}"),
            };
        }

        let expected = frame[etx_at + 1];
        let actual = bcc(&frame[1..=etx_at]);
        if expected != actual {
            return Response::ProtocolError {
                reason: format!("checksum mismatch: frame carries {expected:#04x}, computed {actual:#04x}"),
            };
        }

        let content = &frame[HEADER_LEN..etx_at];
        Response::Success {
            raw: frame.to_vec(),
            parsed_content: (!content.is_empty())
                .then(|| String::from_utf8_lossy(content).into_owned()),
            header: Some(header),
            correlation: Correlation::Unchecked,
        }
    }
}
