use super::{correlation::Correlation, frame::FrameHeader};

/// Terminal outcome of one command exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// A frame was received. `parsed_content` is `None` when no content range
    /// could be extracted from it.
    Success {
        raw: Vec<u8>,
        parsed_content: Option<String>,
        header: Option<FrameHeader>,
        correlation: Correlation,
    },
    /// The overall deadline elapsed before a complete frame arrived.
    Timeout,
    /// The caller asked for the exchange to stop.
    Cancelled,
    /// A frame arrived but failed verification.
    ProtocolError { reason: String },
    /// The serial transport failed while writing or reading.
    TransportError { reason: String },
}

impl Response {
    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Response::Timeout)
    }

    pub fn parsed_content(&self) -> Option<&str> {
        match self {
            Response::Success { parsed_content, .. } => parsed_content.as_deref(),
            _ => None,
        }
    }

    pub fn raw(&self) -> Option<&[u8]> {
        match self {
            Response::Success { raw, .. } => Some(raw),
            _ => None,
        }
    }

    /// Human readable summary suitable for a UI status line.
    pub fn message(&self) -> String {
        match self {
            Response::Success { .. } => "Response received successfully".to_string(),
            Response::Timeout => "Timeout: No response received".to_string(),
            Response::Cancelled => "Command cancelled".to_string(),
            Response::ProtocolError { reason } => format!("Protocol error: {reason}"),
            Response::TransportError { reason } => format!("Transport error: {reason}"),
        }
    }

    pub(crate) fn with_correlation(self, value: Correlation) -> Self {
        match self {
            Response::Success {
                raw,
                parsed_content,
                header,
                ..
            } => Response::Success {
                raw,
                parsed_content,
                header,
                correlation: value,
            },
            other => other,
        }
    }
}

/// Result of a connection level call, shaped for callers that only show a
/// status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionReport {
    pub success: bool,
    pub message: String,
}

impl ConnectionReport {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Reply to a cancellation request.
pub type CancelReport = ConnectionReport;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_messages() {
        assert_eq!(Response::Timeout.message(), "Timeout: No response received");
        assert_eq!(Response::Cancelled.message(), "Command cancelled");
        assert!(
            Response::TransportError {
                reason: "pipe broke".into()
            }
            .message()
            .contains("pipe broke")
        );
    }

    #[test]
    fn correlation_only_touches_success() {
        let resp = Response::Success {
            raw: vec![0x02],
            parsed_content: None,
            header: None,
            correlation: Correlation::Unchecked,
        }
        .with_correlation(Correlation::Matched);

        assert!(matches!(
            resp,
            Response::Success {
                correlation: Correlation::Matched,
                ..
            }
        ));
        assert_eq!(
            Response::Timeout.with_correlation(Correlation::Matched),
            Response::Timeout
        );
    }

    #[test]
    fn timeout_and_cancel_are_distinct() {
        assert!(Response::Timeout.is_timeout());
        assert!(!Response::Cancelled.is_timeout());
        assert_ne!(Response::Timeout, Response::Cancelled);
    }
}
