//! Support for the client side of the IRC protocol using Tokio.

#![warn(missing_docs)]

pub mod error;
pub mod isupport;
#[cfg(feature = "codec")]
pub mod line;
pub mod message;
pub mod mode;
pub mod prefix;

pub use self::error::{MessageParseError, ProtocolError};
pub use self::isupport::Isupport;
#[cfg(feature = "codec")]
pub use self::line::LineCodec;
pub use self::message::Message;
pub use self::mode::ModeChange;
pub use self::prefix::Prefix;
