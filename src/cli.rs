//! CLI utilities for paylink.
//!
//! The utilities present in this module are used by the interactive prompt to turn user
//! input into terminal operations and to print their results.
//!
//! # Overview
//! The [`Command`] enum represents the supported inputs:
//!
//! - `.exit`: Close the prompt.
//! - `.devices`: List serial devices.
//! - `.open <device>` / `.close`: Manage the connection.
//! - `handshake <content>`, `cashier <content>`, `cancel`: Send a known request kind.
//! - `send <TAG> [content]`: Send any request kind by its two hex digit tag.
//!
//! # Example
//! ```rust
//! use paylink::cli::Command;
//!
//! let cmd: Command = ".open /dev/ttyACM0".try_into().unwrap();
//! assert_eq!(cmd, Command::Open("/dev/ttyACM0".to_string()));
//! ```
use std::{
    io::{self, BufRead, Write},
    time::Duration,
};

use thiserror::Error;

use crate::protocol::{EncodeError, Request, Response};

/// Deadline for a cancel request typed at the prompt.
pub const CANCEL_REQUEST_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Error)]
pub enum CliError {
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),

    #[error("invalid '{command}' command, {reason}")]
    InvalidArguments { command: String, reason: String },

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("failed to access terminal: {0}")]
    Io(#[from] io::Error),
}

/// Possible commands from a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Devices,
    Open(String),
    Close,
    Send(Request),
}

impl TryFrom<&str> for Command {
    type Error = CliError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let line = value.trim();
        let (word, rest) = match line.split_once(' ') {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        match word {
            ".exit" => Ok(Command::Exit),
            ".devices" => Ok(Command::Devices),
            ".close" => Ok(Command::Close),
            ".open" if rest.is_empty() => Err(CliError::InvalidArguments {
                command: ".open".to_string(),
                reason: "requires a device. Example: .open /dev/ttyACM0".to_string(),
            }),
            ".open" => Ok(Command::Open(rest.to_string())),
            "handshake" => Ok(Command::Send(Request::handshake(rest))),
            "cashier" => Ok(Command::Send(Request::cashier(rest))),
            "cancel" => Ok(Command::Send(
                Request::cancel().with_timeout(CANCEL_REQUEST_TIMEOUT),
            )),
            "send" => {
                let (tag, content) = rest.split_once(' ').unwrap_or((rest, ""));
                if tag.is_empty() {
                    return Err(CliError::InvalidArguments {
                        command: "send".to_string(),
                        reason: "requires a request tag. Example: send F1 1234".to_string(),
                    });
                }
                Ok(Command::Send(Request::parse(tag, content.trim())?))
            }
            _ => Err(CliError::UnrecognizedCommand(line.to_string())),
        }
    }
}

/// Prompt user for a valid command. End of input is treated as `.exit`.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, CliError>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ")?;
    writer.flush()?;

    if reader.read_line(&mut s)? == 0 {
        return Ok(Command::Exit);
    }

    s.as_str().try_into()
}

/// Multi-line, human readable rendering of a response.
pub fn describe(response: &Response) -> String {
    let mut out = response.message();
    if let Response::Success {
        raw,
        parsed_content,
        correlation,
        ..
    } = response
    {
        out.push_str(&format!("\n  raw: {}", hex::encode(raw)));
        if let Some(content) = parsed_content {
            out.push_str(&format!("\n  content: {content}"));
        }
        out.push_str(&format!("\n  correlation: {correlation:?}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Correlation, RequestKind};

    #[test]
    fn prompt_prints_correctly() {
        let input = b".exit\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();

        let output = String::from_utf8(output).expect("not valid UTF-8");
        assert_eq!("> ", output);
    }

    #[test]
    fn prompt_end_of_input_exits() {
        let input = b"";
        let mut output = Vec::new();

        let res = prompt(&input[..], &mut output).unwrap();
        assert_eq!(res, Command::Exit);
    }

    #[test]
    #[should_panic(expected = "UnrecognizedCommand")]
    fn prompt_unrecognized_command() {
        let input = b".something_wrong\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();
    }

    #[test]
    fn command_from_string() {
        let inputs = vec![
            (".exit", Command::Exit),
            (".devices", Command::Devices),
            (".close", Command::Close),
            (".open COM3", Command::Open("COM3".to_string())),
            ("handshake 1234", Command::Send(Request::handshake("1234"))),
            (
                r#"cashier {"TransType":"Purchase"}"#,
                Command::Send(Request::cashier(r#"{"TransType":"Purchase"}"#)),
            ),
            (
                "cancel",
                Command::Send(Request::cancel().with_timeout(CANCEL_REQUEST_TIMEOUT)),
            ),
            (
                "send f2 done",
                Command::Send(Request::new(RequestKind::HandshakeResponse, "done")),
            ),
            ("send C1", Command::Send(Request::parse("C1", "").unwrap())),
        ];

        for (cmd, expected) in inputs {
            let command: Command = cmd.try_into().unwrap();
            assert_eq!(command, expected);
        }
    }

    #[test]
    fn open_requires_device() {
        let res = Command::try_from(".open");
        assert!(matches!(res, Err(CliError::InvalidArguments { .. })));
    }

    #[test]
    fn send_rejects_bad_tag() {
        let res = Command::try_from("send XYZ 1");
        assert!(matches!(res, Err(CliError::Encode(_))));

        let res = Command::try_from("send");
        assert!(matches!(res, Err(CliError::InvalidArguments { .. })));
    }

    #[test]
    fn describe_success() {
        let resp = Response::Success {
            raw: vec![0x02, 0x03],
            parsed_content: Some("OK".to_string()),
            header: None,
            correlation: Correlation::Unchecked,
        };
        let text = describe(&resp);

        assert!(text.starts_with("Response received successfully"));
        assert!(text.contains("raw: 0203"));
        assert!(text.contains("content: OK"));
    }

    #[test]
    fn describe_timeout() {
        assert_eq!(describe(&Response::Timeout), "Timeout: No response received");
    }
}
