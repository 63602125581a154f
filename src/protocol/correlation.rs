//! Request/reply correlation.
//!
//! Only one exchange is ever in flight, so correlation is advisory: a reply whose tag or
//! sequence does not line up with the request is still handed back to the caller, with the
//! mismatch recorded in [`Correlation`].
use std::sync::atomic::{AtomicU16, Ordering};

use log::warn;

use super::{
    frame::FrameHeader,
    request::{DEFAULT_SEQUENCE, Request, RequestTag},
};

/// How a received frame relates to the request that triggered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correlation {
    /// No header could be read from the reply.
    Unchecked,
    Matched,
    UnexpectedTag {
        expected: RequestTag,
        actual: RequestTag,
    },
    SequenceMismatch {
        expected: u16,
        actual: u16,
    },
}

/// Strategy for numbering requests that do not carry a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceStrategy {
    Fixed(u16),
    /// Wrapping counter starting at the given value.
    Incrementing(u16),
}

impl Default for SequenceStrategy {
    fn default() -> Self {
        SequenceStrategy::Fixed(DEFAULT_SEQUENCE)
    }
}

#[derive(Debug)]
pub struct CorrelationPolicy {
    strategy: SequenceStrategy,
    next: AtomicU16,
}

impl Default for CorrelationPolicy {
    fn default() -> Self {
        Self::new(SequenceStrategy::default())
    }
}

impl CorrelationPolicy {
    pub fn new(strategy: SequenceStrategy) -> Self {
        let start = match strategy {
            SequenceStrategy::Fixed(seq) | SequenceStrategy::Incrementing(seq) => seq,
        };
        Self {
            strategy,
            next: AtomicU16::new(start),
        }
    }

    pub fn strategy(&self) -> SequenceStrategy {
        self.strategy
    }

    /// Picks the sequence number for an outgoing request; a caller supplied value always wins.
    pub fn assign(&self, requested: Option<u16>) -> u16 {
        if let Some(seq) = requested {
            return seq;
        }

        match self.strategy {
            SequenceStrategy::Fixed(seq) => seq,
            SequenceStrategy::Incrementing(_) => self.next.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Gives `request` its sequence number if the caller left it unset.
    pub fn stamp(&self, request: &mut Request) {
        let seq = self.assign(request.requested_sequence());
        request.assign_sequence(seq);
    }

    pub fn check(&self, request: &Request, header: Option<&FrameHeader>) -> Correlation {
        let Some(header) = header else {
            return Correlation::Unchecked;
        };

        let sent = request.tag();
        let actual = header.request_tag();
        let expected = sent
            .kind()
            .and_then(|kind| kind.reply())
            .map(RequestTag::from)
            .unwrap_or(sent);

        let correlation = if actual != expected && actual != sent {
            Correlation::UnexpectedTag { expected, actual }
        } else if header.sequence != request.sequence() {
            Correlation::SequenceMismatch {
                expected: request.sequence(),
                actual: header.sequence,
            }
        } else {
            Correlation::Matched
        };

        if correlation != Correlation::Matched {
            warn!("reply does not correlate with request {sent}: {correlation:?}");
        }
        correlation
    }
}
