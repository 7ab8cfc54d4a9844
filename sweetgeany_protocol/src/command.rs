// Relay commands as they appear on the command socket.
//
// A command is a single text line of the form
//
//     <network> <destination> <message...>
//
// split on the first two single spaces. The message keeps everything after
// the second space verbatim, internal and leading spaces included. Trailing
// whitespace (including a `\r` from CRLF clients) is stripped before
// splitting.
//
// Parsing never allocates a partial command: a line either yields a complete
// `RelayCommand` or a `ParseError` naming what was wrong. The relay logs the
// error and drops the connection; there is no error channel back to the
// socket client.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::types::Destination;

/// Why a command line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty command line")]
    Empty,
    #[error("expected `<network> <destination> <message>`, got {found} field(s)")]
    MissingFields { found: usize },
    #[error("{field} field is empty")]
    EmptyField { field: &'static str },
    #[error("{field} field contains forbidden character {ch:?}")]
    InvalidCharacter { field: &'static str, ch: char },
    #[error("command line is not valid UTF-8")]
    NotUtf8,
}

/// One parsed socket command: deliver `message` to `destination` on the
/// session connected to `network`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayCommand {
    pub network: String,
    pub destination: String,
    pub message: String,
}

impl RelayCommand {
    /// Build a command from its parts, applying the same field rules the
    /// parser enforces. Used by clients so that whatever they write is
    /// guaranteed to parse on the other end.
    pub fn new(
        network: impl Into<String>,
        destination: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<Self, ParseError> {
        let command = Self {
            network: network.into(),
            destination: destination.into(),
            message: message.into(),
        };
        check_token("network", &command.network)?;
        check_token("destination", &command.destination)?;
        if command.message.trim_end().is_empty() {
            return Err(ParseError::EmptyField { field: "message" });
        }
        if command.message.trim_end().len() != command.message.len() {
            // Trailing whitespace would be stripped on the wire and the
            // message would no longer round-trip.
            return Err(ParseError::InvalidCharacter {
                field: "message",
                ch: command.message.chars().next_back().unwrap_or(' '),
            });
        }
        check_line_chars("message", &command.message)?;
        Ok(command)
    }

    /// Classify the destination as a channel or a peer.
    pub fn destination(&self) -> Destination {
        Destination::classify(&self.destination)
    }
}

impl fmt::Display for RelayCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.network, self.destination, self.message)
    }
}

impl FromStr for RelayCommand {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end();
        if line.is_empty() {
            return Err(ParseError::Empty);
        }

        let mut fields = line.splitn(3, ' ');
        let (Some(network), Some(destination), Some(message)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(ParseError::MissingFields {
                found: line.splitn(3, ' ').count(),
            });
        };

        if network.is_empty() {
            return Err(ParseError::EmptyField { field: "network" });
        }
        if destination.is_empty() {
            return Err(ParseError::EmptyField { field: "destination" });
        }
        check_line_chars("network", network)?;
        check_line_chars("destination", destination)?;
        check_line_chars("message", message)?;

        Ok(Self {
            network: network.to_owned(),
            destination: destination.to_owned(),
            message: message.to_owned(),
        })
    }
}

/// Parse a raw command line as read off the socket (terminator already
/// removed).
pub fn parse_command(line: &[u8]) -> Result<RelayCommand, ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::NotUtf8)?;
    line.parse()
}

/// Network and destination are single tokens: non-empty, no spaces.
fn check_token(field: &'static str, value: &str) -> Result<(), ParseError> {
    if value.is_empty() {
        return Err(ParseError::EmptyField { field });
    }
    if let Some(ch) = value.chars().find(|c| c.is_whitespace()) {
        return Err(ParseError::InvalidCharacter { field, ch });
    }
    check_line_chars(field, value)
}

/// CR, LF and NUL would terminate or corrupt the outbound IRC line.
fn check_line_chars(field: &'static str, value: &str) -> Result<(), ParseError> {
    match value.chars().find(|c| matches!(c, '\r' | '\n' | '\0')) {
        Some(ch) => Err(ParseError::InvalidCharacter { field, ch }),
        None => Ok(()),
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_token() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_.|#-]{1,16}"
    }

    fn arb_message() -> impl Strategy<Value = String> {
        "[ -~]{0,60}[!-~]"
    }

    proptest! {
        #[test]
        fn well_formed_lines_split_into_three_fields(
            network in arb_token(),
            destination in arb_token(),
            message in arb_message(),
        ) {
            let line = format!("{network} {destination} {message}\n");
            let cmd: RelayCommand = line.parse().unwrap();
            prop_assert_eq!(cmd.network, network);
            prop_assert_eq!(cmd.destination, destination);
            prop_assert_eq!(cmd.message, message);
        }

        #[test]
        fn fewer_than_three_fields_never_parse(
            tokens in prop::collection::vec(arb_token(), 0..3),
        ) {
            let line = tokens.join(" ");
            prop_assert!(line.parse::<RelayCommand>().is_err());
        }
    }
}
