//! Error types for the protocol engine.
//!
//! Mirrors the teacher's layering: a top-level [`CoreError`] wraps narrower
//! parse/mode errors with `#[source]`, so callers can match on the precise
//! failure while `{}` display stays human readable.

use thiserror::Error;

/// Convenience alias for results using [`CoreError`].
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

/// Top-level errors surfaced by connections, the reactor, and DCC transport.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// I/O error during reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Outbound text contained a bare `\n`.
    #[error("invalid characters in outbound message")]
    InvalidCharacters,

    /// Outbound framed message exceeded 512 bytes.
    #[error("message too long: {0} bytes")]
    MessageTooLong(usize),

    /// Send was attempted while no socket was open.
    #[error("not connected")]
    NotConnected,

    /// Socket open/bind/connect failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// DCC socket open/bind/accept failed.
    #[error("dcc connect failed: {0}")]
    DccConnectFailed(String),

    /// Inbound line failed strict UTF-8 decoding.
    #[error("decode failed: {0}")]
    DecodeFailed(#[from] std::string::FromUtf8Error),

    /// A line could not be split into tags/prefix/command/params.
    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] MessageParseError),

    /// A mode string failed to parse.
    #[error("mode parse error: {0}")]
    Mode(#[from] ModeParseError),
}

/// Errors encountered while splitting a decoded line into an [`crate::message::Event`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MessageParseError {
    /// The line was empty after trimming the terminator.
    #[error("empty message")]
    EmptyMessage,

    /// No command token was present.
    #[error("missing command")]
    MissingCommand,

    /// A `@tags` or `:prefix` block was present but malformed.
    #[error("malformed {part}: {string}")]
    Malformed {
        /// Which part failed (`"tags"` or `"prefix"`).
        part: &'static str,
        /// The raw text that failed to parse.
        string: String,
    },
}

/// Errors encountered while parsing a mode string (`+o-v nick` etc).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ModeParseError {
    /// A mode letter that requires an argument (per CHANMODES class B/C) had none left.
    #[error("mode '{0}' requires an argument but none was provided")]
    MissingArgument(char),

    /// Trailing arguments were supplied but no mode letter consumed them.
    #[error("unused arguments in mode string")]
    UnusedArguments,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            format!("{}", CoreError::MessageTooLong(600)),
            "message too long: 600 bytes"
        );
        assert_eq!(
            format!("{}", ModeParseError::MissingArgument('o')),
            "mode 'o' requires an argument but none was provided"
        );
    }

    #[test]
    fn source_chaining() {
        let err = CoreError::ProtocolViolation(MessageParseError::MissingCommand);
        assert!(std::error::Error::source(&err).is_some());
    }
}
