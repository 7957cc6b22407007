//! A module providing a data structure for messages to and from IRC servers.

use std::fmt;
use std::str::FromStr;

use crate::error::{MessageParseError, ProtocolError};
use crate::prefix::Prefix;

/// The maximum number of parameters a message may carry, per RFC 2812.
pub const MAX_PARAMS: usize = 15;

/// A parsed IRC message.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Message {
    /// The line as it came off the wire, without the terminating CRLF.
    pub raw: String,
    /// The origin of the message, when the server supplied one.
    pub prefix: Option<Prefix>,
    /// The command word, uppercased, or a three-digit numeric as given.
    pub command: String,
    /// Up to [`MAX_PARAMS`] parameters. Only the last may contain spaces,
    /// and only when the server sent it as a trailing parameter.
    pub params: Vec<String>,
}

impl Message {
    /// Creates a message from its parts. Used for synthetic events such as
    /// the startup notification handed to modules, and in tests.
    pub fn new(prefix: Option<Prefix>, command: &str, params: Vec<String>) -> Message {
        Message {
            raw: String::new(),
            prefix,
            command: command.to_owned(),
            params,
        }
    }

    /// Parses one line, without the terminating CRLF.
    ///
    /// The parse is best-effort: component forms are not validated beyond
    /// what is needed to split the line, and runs of spaces between
    /// parameters are tolerated.
    ///
    /// # Errors
    ///
    /// Fails when the line is empty or contains no command.
    ///
    /// # Examples
    ///
    /// ```
    /// # fn main() -> Result<(), dbot_proto::MessageParseError> {
    /// use dbot_proto::Message;
    ///
    /// let message = Message::parse(":nick!user@host PRIVMSG #rust :Hello Rustaceans!")?;
    /// assert_eq!(message.command, "PRIVMSG");
    /// assert_eq!(message.params, vec!["#rust", "Hello Rustaceans!"]);
    /// # Ok(())
    /// # }
    /// ```
    pub fn parse(line: &str) -> Result<Message, MessageParseError> {
        if line.trim_matches(' ').is_empty() {
            return Err(MessageParseError::EmptyMessage);
        }

        let mut rest = line;

        // If the line starts with ':', everything up to the first space is
        // the prefix.
        let prefix = if let Some(tail) = rest.strip_prefix(':') {
            let (prefix, tail) = tail.split_once(' ').unwrap_or((tail, ""));
            rest = tail;
            Some(Prefix::new_from_str(prefix))
        } else {
            None
        };

        rest = rest.trim_start_matches(' ');

        // The next word is the command.
        let (command, rest) = rest.split_once(' ').unwrap_or((rest, ""));
        if command.is_empty() {
            return Err(MessageParseError::InvalidCommand);
        }

        Ok(Message {
            raw: line.to_owned(),
            prefix,
            command: command.to_ascii_uppercase(),
            params: parse_params(rest),
        })
    }

    /// Decodes a raw line as UTF-8, replacing invalid sequences, and parses
    /// it. Trailing CR/LF bytes are stripped first.
    pub fn parse_bytes(line: &[u8]) -> Result<Message, MessageParseError> {
        let mut end = line.len();
        while end > 0 && (line[end - 1] == b'\r' || line[end - 1] == b'\n') {
            end -= 1;
        }
        Message::parse(&String::from_utf8_lossy(&line[..end]))
    }

    /// The text of a PRIVMSG or NOTICE, i.e. the last parameter.
    pub fn text(&self) -> &str {
        self.params.last().map(|s| &s[..]).unwrap_or("")
    }

    /// The nickname of the origin, when a prefix is present.
    pub fn source_nickname(&self) -> Option<&str> {
        self.prefix.as_ref().map(|p| &p.nickname[..])
    }

    /// Reassembles the message as a wire line, without CRLF. The last
    /// parameter is sent as trailing iff it is empty, contains a space, or
    /// starts with `:`, so that a reparse yields the same parts.
    pub fn to_line(&self) -> String {
        let mut line = String::new();
        if let Some(ref prefix) = self.prefix {
            line.push(':');
            line.push_str(&prefix.to_string());
            line.push(' ');
        }
        line.push_str(&self.command);
        for (i, param) in self.params.iter().enumerate() {
            line.push(' ');
            let last = i == self.params.len() - 1;
            if last && (param.is_empty() || param.contains(' ') || param.starts_with(':')) {
                line.push(':');
            }
            line.push_str(param);
        }
        line
    }
}

/// Splits the parameter region of a message.
///
/// A ` :` separator marks the trailing parameter. The left side yields up to
/// 14 middle parameters; a 15th middle swallows the rest of the region
/// verbatim, including any trailing marker that would otherwise overflow the
/// parameter count.
fn parse_params(region: &str) -> Vec<String> {
    // The command split already consumed the space before the region, so a
    // leading ':' marks a trailing parameter just like a " :" separator.
    let (middles, trailing) = if let Some(trailing) = region.strip_prefix(':') {
        ("", Some(trailing))
    } else {
        match region.split_once(" :") {
            Some((middles, trailing)) => (middles, Some(trailing)),
            None => (region, None),
        }
    };

    let mut params = Vec::new();
    let mut rest = middles;
    loop {
        rest = rest.trim_start_matches(' ');
        if rest.is_empty() {
            break;
        }
        if params.len() == MAX_PARAMS - 1 {
            params.push(rest.to_owned());
            break;
        }
        match rest.split_once(' ') {
            Some((param, tail)) => {
                params.push(param.to_owned());
                rest = tail;
            }
            None => {
                params.push(rest.to_owned());
                break;
            }
        }
    }

    if let Some(trailing) = trailing {
        if params.len() == MAX_PARAMS {
            // No room left: the marker was part of the 15th middle.
            let last = params.last_mut().expect("MAX_PARAMS > 0");
            last.push_str(" :");
            last.push_str(trailing);
        } else {
            params.push(trailing.to_owned());
        }
    }

    params
}

impl FromStr for Message {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Message::parse(s).map_err(|cause| ProtocolError::InvalidMessage {
            string: s.to_owned(),
            cause,
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}
