//! A module providing a structure for message prefixes.

use std::fmt;

/// The prefix indicates "the true origin of the message", according to the
/// server. Server prefixes have no user or host part; the nickname slot then
/// carries the server name, which the client treats like any other origin.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Prefix {
    /// The nickname (or server name) the message originates from.
    pub nickname: String,
    /// The username, when the origin is a user with a full hostmask.
    pub user: Option<String>,
    /// The hostname, when the origin is a user with a full hostmask.
    pub host: Option<String>,
}

impl Prefix {
    /// Creates a prefix by parsing a string, without the leading `:`.
    ///
    /// Everything after the first `@` is the host; everything after the
    /// first `!` of the remainder is the user; the leading token is the
    /// nickname.
    ///
    /// # Example
    /// ```
    /// # use dbot_proto::Prefix;
    /// Prefix::new_from_str("nickname!username@hostname");
    /// Prefix::new_from_str("irc.example.com");
    /// ```
    pub fn new_from_str(s: &str) -> Prefix {
        let (rest, host) = match s.split_once('@') {
            Some((rest, host)) => (rest, Some(host.to_owned())),
            None => (s, None),
        };
        let (nickname, user) = match rest.split_once('!') {
            Some((nickname, user)) => (nickname.to_owned(), Some(user.to_owned())),
            None => (rest.to_owned(), None),
        };
        Prefix {
            nickname,
            user,
            host,
        }
    }
}

/// This is isomorphic with `new_from_str` for well-formed prefixes.
impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.nickname)?;
        if let Some(ref user) = self.user {
            write!(f, "!{}", user)?;
        }
        if let Some(ref host) = self.host {
            write!(f, "@{}", host)?;
        }
        Ok(())
    }
}

impl<'a> From<&'a str> for Prefix {
    fn from(s: &str) -> Self {
        Prefix::new_from_str(s)
    }
}
