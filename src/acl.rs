//! The user access list: rules denying modules to users in some scope for
//! some time.
//!
//! An entry serializes to one string:
//!
//! ```text
//! <channel> <nick>!<user>@<host> <duration> <modules>
//! ```
//!
//! where `channel` and `nick` are literal or `*`, `user` allows a `*suffix`
//! wildcard, `host` allows `*suffix` and `prefix*`, `duration` is `0` or an
//! absolute UNIX timestamp, and `modules` is `*` or a comma-separated list.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Seconds per unit of the user-facing duration language.
const DURATION_UNITS: [(char, i64); 7] = [
    ('y', 31_536_000),
    ('M', 2_592_000),
    ('w', 604_800),
    ('d', 86_400),
    ('h', 3_600),
    ('m', 60),
    ('s', 1),
];

/// A rejected user access list input. The status codes are part of the
/// admin interface contract.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AclParseError {
    /// Fewer than four fields were given.
    #[error("too few fields")]
    TooFewFields,
    /// The usermask is not of the form `nick!user@host`.
    #[error("invalid usermask ``{0}''")]
    BadUsermask(String),
    /// The duration is neither `0`, a timestamp, nor duration terms.
    #[error("invalid duration ``{0}''")]
    BadDuration(String),
    /// The module list is neither `*` nor comma-separated names.
    #[error("invalid modules ``{0}''")]
    BadModules(String),
}

impl AclParseError {
    /// The numeric status code reported to admin commands.
    pub fn status(&self) -> u8 {
        match self {
            AclParseError::TooFewFields => 1,
            AclParseError::BadUsermask(_) => 2,
            AclParseError::BadDuration(_) => 3,
            AclParseError::BadModules(_) => 4,
        }
    }

    /// The offending token, when one field is to blame.
    pub fn token(&self) -> Option<&str> {
        match self {
            AclParseError::TooFewFields => None,
            AclParseError::BadUsermask(t)
            | AclParseError::BadDuration(t)
            | AclParseError::BadModules(t) => Some(t),
        }
    }
}

/// One user access list rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AclEntry {
    /// Channel name or `*`.
    pub channel: String,
    /// Nickname or `*`.
    pub nick: String,
    /// Username, `*`, or `*suffix`.
    pub user: String,
    /// Hostname, `*`, `*suffix`, or `prefix*`.
    pub host: String,
    /// `0` for never, otherwise the UNIX timestamp the rule dies at.
    pub expiry: i64,
    /// `*` or comma-separated module names.
    pub modules: String,
}

impl AclEntry {
    /// Parses user input, converting duration terms such as `1w2d` into an
    /// absolute expiry relative to `now`.
    pub fn parse_input(input: &str, now: i64) -> Result<AclEntry, AclParseError> {
        let mut fields = input.split_whitespace();
        let channel = fields.next().ok_or(AclParseError::TooFewFields)?;
        let usermask = fields.next().ok_or(AclParseError::TooFewFields)?;
        let duration = fields.next().ok_or(AclParseError::TooFewFields)?;
        let modules = fields.next().ok_or(AclParseError::TooFewFields)?;

        let (nick, user, host) = split_usermask(usermask)
            .ok_or_else(|| AclParseError::BadUsermask(usermask.to_owned()))?;
        let expiry = parse_duration(duration, now)
            .ok_or_else(|| AclParseError::BadDuration(duration.to_owned()))?;
        if !valid_modules(modules) {
            return Err(AclParseError::BadModules(modules.to_owned()));
        }

        Ok(AclEntry {
            channel: channel.to_owned(),
            nick: nick.to_owned(),
            user: user.to_owned(),
            host: host.to_owned(),
            expiry,
            modules: modules.to_owned(),
        })
    }

    /// Whether the entry denies `module` to `nick!user@host` in `channel`
    /// at time `now`.
    pub fn is_banned(
        &self,
        channel: &str,
        nick: &str,
        user: &str,
        host: &str,
        module: &str,
        now: i64,
    ) -> bool {
        (self.channel == "*" || self.channel.eq_ignore_ascii_case(channel))
            && (self.nick == "*" || self.nick.eq_ignore_ascii_case(nick))
            && match_user(&self.user, user)
            && match_host(&self.host, host)
            && (self.expiry == 0 || self.expiry > now)
            && match_module(&self.modules, module)
    }

    /// Whether the entry has outlived its expiry.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expiry != 0 && self.expiry < now
    }
}

/// Whether any entry denies the module to the user. Bans are checked in
/// order, first match wins.
pub fn is_banned<'a, I>(
    entries: I,
    channel: &str,
    nick: &str,
    user: &str,
    host: &str,
    module: &str,
    now: i64,
) -> bool
where
    I: IntoIterator<Item = &'a AclEntry>,
{
    entries
        .into_iter()
        .any(|e| e.is_banned(channel, nick, user, host, module, now))
}

impl FromStr for AclEntry {
    type Err = AclParseError;

    /// Parses the serialized form, where the duration field is already an
    /// absolute timestamp (or `0`).
    fn from_str(s: &str) -> Result<AclEntry, AclParseError> {
        let mut fields = s.split_whitespace();
        let channel = fields.next().ok_or(AclParseError::TooFewFields)?;
        let usermask = fields.next().ok_or(AclParseError::TooFewFields)?;
        let expiry = fields.next().ok_or(AclParseError::TooFewFields)?;
        let modules = fields.next().ok_or(AclParseError::TooFewFields)?;

        let (nick, user, host) = split_usermask(usermask)
            .ok_or_else(|| AclParseError::BadUsermask(usermask.to_owned()))?;
        let expiry = expiry
            .parse::<i64>()
            .ok()
            .filter(|t| *t >= 0)
            .ok_or_else(|| AclParseError::BadDuration(expiry.to_owned()))?;
        if !valid_modules(modules) {
            return Err(AclParseError::BadModules(modules.to_owned()));
        }

        Ok(AclEntry {
            channel: channel.to_owned(),
            nick: nick.to_owned(),
            user: user.to_owned(),
            host: host.to_owned(),
            expiry,
            modules: modules.to_owned(),
        })
    }
}

impl fmt::Display for AclEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {}!{}@{} {} {}",
            self.channel, self.nick, self.user, self.host, self.expiry, self.modules
        )
    }
}

fn split_usermask(mask: &str) -> Option<(&str, &str, &str)> {
    let (nick, rest) = mask.split_once('!')?;
    let (user, host) = rest.split_once('@')?;
    if nick.is_empty() || user.is_empty() || host.is_empty() {
        return None;
    }
    Some((nick, user, host))
}

/// `0` means never expires; otherwise terms like `1y`, `30m` concatenate
/// additively and the result is `now` plus the sum.
fn parse_duration(s: &str, now: i64) -> Option<i64> {
    if s == "0" {
        return Some(0);
    }
    let mut total: i64 = 0;
    let mut digits = String::new();
    let mut terms = 0;
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else {
            let n: i64 = digits.parse().ok()?;
            let (_, secs) = DURATION_UNITS.iter().find(|(u, _)| *u == c)?;
            total = total.checked_add(n.checked_mul(*secs)?)?;
            digits.clear();
            terms += 1;
        }
    }
    if terms == 0 || !digits.is_empty() {
        return None;
    }
    now.checked_add(total)
}

fn valid_modules(s: &str) -> bool {
    s == "*" || (!s.is_empty() && s.split(',').all(|m| !m.is_empty() && m != "*"))
}

fn match_user(mask: &str, user: &str) -> bool {
    if mask == "*" || mask.eq_ignore_ascii_case(user) {
        true
    } else if let Some(suffix) = mask.strip_prefix('*') {
        user.to_ascii_lowercase()
            .ends_with(&suffix.to_ascii_lowercase())
    } else {
        false
    }
}

fn match_host(mask: &str, host: &str) -> bool {
    if mask == "*" || mask == host {
        return true;
    }
    if let Some(suffix) = mask.strip_prefix('*') {
        if host.ends_with(suffix) {
            return true;
        }
    }
    if let Some(prefix) = mask.strip_suffix('*') {
        if host.starts_with(prefix) {
            return true;
        }
    }
    false
}

fn match_module(mask: &str, module: &str) -> bool {
    mask == "*" || mask.split(',').any(|m| m == module)
}
