//! Errors for the bot using `thiserror`.

use std::io::Error as IoError;

use thiserror::Error;

use dbot_proto::ProtocolError;

/// A `Result` type for the bot's errors.
pub type Result<T> = std::result::Result<T, Error>;

/// The main crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// An internal I/O error.
    #[error("an io error occurred")]
    Io(#[from] IoError),

    /// An error from the TLS layer.
    #[error("a TLS error occurred")]
    Tls(#[from] native_tls::Error),

    /// An error from the protocol layer.
    #[error(transparent)]
    Proto(#[from] ProtocolError),

    /// An invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// An error from one of the shared SQLite stores.
    #[error("database error")]
    Database(#[from] rusqlite::Error),
}
