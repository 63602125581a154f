//! Command/response protocol spoken with the payment terminal.
//!
//! This module frames outgoing requests, drives the bounded read loop that assembles the
//! terminal's reply, and keeps track of the single open serial link and the single command
//! allowed in flight at any time.
//!
//! # Overview
//!
//! A caller hands a [`Request`] to a [`PaymentTerminal`]. The terminal claims the
//! in-flight slot of its [`ConnectionState`], encodes the request into a frame, writes it
//! once to the [`SerialTransport`] and then polls the transport until a [`FrameCodec`]
//! reports a complete frame, the deadline passes, or the command is cancelled. Every path
//! ends in a [`Response`]; failures that happen before anything is written are reported
//! as a [`CommandError`].
//!
//! # Key Components
//!
//! - [`frame`]: Wire layout, checksum and incremental frame assembly.
//! - [`CommandSession`]: State machine for one exchange.
//! - [`ConnectionState`]: Singleton transport handle and in-flight command slot.
//! - [`CorrelationPolicy`]: Sequence numbering and reply matching.
//! - [`SerialTransport`] / [`DeviceProvider`]: Boundary to the serial driver.
//!
//! # Binary Format
//!
//! All multi-byte integers are big-endian. See [`frame`] for the exact layout.
mod cancel;
mod connection;
mod correlation;
pub mod frame;
mod request;
mod response;
mod session;
mod terminal;
mod transport;

pub use cancel::CancellationToken;
pub use connection::{
    BusyError, CloseError, CommandGuard, ConnectionState, OpenError, TransportHandle,
};
pub use correlation::{Correlation, CorrelationPolicy, SequenceStrategy};
pub use frame::{AssemblyState, FrameCodec, FrameHeader, LooseCodec, ReceiveBuffer, StrictCodec};
pub use request::{
    DEFAULT_SEQUENCE, DEFAULT_TIMEOUT, EncodeError, MAX_CONTENT_LENGTH, Request, RequestKind,
    RequestTag,
};
pub use response::{CancelReport, ConnectionReport, Response};
pub use session::{CommandError, CommandSession, SessionConfig, SessionState};
pub use terminal::{Canceller, PaymentTerminal};
pub use transport::{
    DEFAULT_BAUD_RATE, DEFAULT_MAX_READ, DeviceInfo, DeviceProvider, SerialPortProvider,
    SerialPortTransport, SerialTransport, TransportError,
};
