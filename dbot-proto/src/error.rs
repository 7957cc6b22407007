//! IRC protocol errors using `thiserror`.

use std::io::Error as IoError;

use thiserror::Error;

/// A `Result` type for IRC `ProtocolErrors`.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// An IRC protocol error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// An internal I/O error.
    #[error("an io error occurred")]
    Io(#[from] IoError),

    /// Error for invalid messages.
    #[error("invalid message: {string}")]
    InvalidMessage {
        /// The string that failed to parse.
        string: String,
        /// The detailed message parsing error.
        #[source]
        cause: MessageParseError,
    },
}

/// Errors that occur when parsing messages.
#[derive(Debug, Error)]
pub enum MessageParseError {
    /// The message was empty.
    #[error("empty message")]
    EmptyMessage,

    /// The command was invalid (i.e. missing).
    #[error("invalid command")]
    InvalidCommand,
}
