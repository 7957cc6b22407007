//! The client handle modules talk through: the wire writer plus snapshots
//! of the session state.
//!
//! The writer owns the sink half of the connection behind an async mutex,
//! so concurrent handlers serialize on it; the pacing sleep between the
//! parts of a multipart send runs while the lock is held, which is what
//! keeps interleaved output from other tasks out of a split message.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream, StreamExt};
use futures_util::SinkExt;
use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::config::ConfigStore;
use crate::conn::Connection;
use crate::error::Result;
use crate::state::ClientState;

/// The shared handle to one live session.
pub struct Client {
    writer: Mutex<SplitSink<Connection, String>>,
    state: Arc<RwLock<ClientState>>,
    conf: Arc<ConfigStore>,
}

impl Client {
    /// Splits the connection; the client keeps the sink and the caller
    /// drives the returned stream.
    pub fn new(
        conn: Connection,
        conf: Arc<ConfigStore>,
    ) -> (Arc<Client>, SplitStream<Connection>) {
        let (sink, stream) = conn.split();
        let client = Arc::new(Client {
            writer: Mutex::new(sink),
            state: Arc::new(RwLock::new(ClientState::new())),
            conf,
        });
        (client, stream)
    }

    /// The session state. Write access is reserved for the read task;
    /// modules should treat this as read-only.
    pub fn state(&self) -> &Arc<RwLock<ClientState>> {
        &self.state
    }

    /// The global configuration store.
    pub fn conf(&self) -> &Arc<ConfigStore> {
        &self.conf
    }

    /// The nickname the server currently sees for the bot.
    pub fn current_nickname(&self) -> String {
        self.state.read().curr_nickname.clone()
    }

    /// The channels the bot has joined.
    pub fn channels(&self) -> Vec<String> {
        self.state.read().channels.iter().cloned().collect()
    }

    /// A snapshot of a channel's members and their prefix symbols.
    pub fn names(&self, channel: &str) -> Option<HashMap<String, Vec<char>>> {
        self.state.read().names.get(channel).cloned()
    }

    /// Sends a command line, with `text` as the trailing parameter when
    /// present. Lines whose UTF-8 encoding would exceed the session's byte
    /// budget are split at a space, never inside a code point, and the
    /// remainder is resent under the same command prefix after the
    /// configured delay.
    pub async fn send(&self, cmds: &[&str], text: Option<&str>) -> Result<()> {
        let cmds = cmds
            .iter()
            .map(|c| sanitize(c))
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let mut text = text.map(sanitize);
        let msg_delay = self.conf.msg_delay();

        let mut sink = self.writer.lock().await;
        loop {
            let msg_len = self.state.read().msg_len;
            let line = match &text {
                Some(t) => format!("{} :{}", cmds, t),
                None => cmds.clone(),
            };
            match split_line(&line, cmds.len(), msg_len) {
                None => {
                    sink.send(line).await?;
                    return Ok(());
                }
                Some((head, rest)) => {
                    sink.send(head).await?;
                    tokio::time::sleep(Duration::from_secs(msg_delay)).await;
                    text = Some(rest);
                }
            }
        }
    }

    pub async fn privmsg(&self, target: &str, text: &str) -> Result<()> {
        self.send(&["PRIVMSG", target], Some(text)).await
    }

    pub async fn notice(&self, target: &str, text: &str) -> Result<()> {
        self.send(&["NOTICE", target], Some(text)).await
    }

    /// Joins every configured channel, with its key where one is set.
    pub async fn join(&self, channels: &BTreeMap<String, String>) -> Result<()> {
        for (channel, key) in channels {
            if key.is_empty() {
                self.send(&["JOIN", channel], None).await?;
            } else {
                self.send(&["JOIN", channel, key], None).await?;
            }
        }
        Ok(())
    }

    pub async fn part(&self, channel: &str, text: &str) -> Result<()> {
        self.send(&["PART", channel], Some(text)).await
    }

    pub async fn nick(&self, nickname: &str) -> Result<()> {
        self.send(&["NICK", nickname], None).await
    }

    /// Sends QUIT with the given message, or the configured one.
    pub async fn quit(&self, text: Option<&str>) -> Result<()> {
        let quitmsg = self.conf.quitmsg();
        self.send(&["QUIT"], Some(text.unwrap_or(&quitmsg))).await
    }

    pub async fn away(&self, text: Option<&str>) -> Result<()> {
        match text {
            Some(t) => self.send(&["AWAY"], Some(t)).await,
            None => self.send(&["AWAY"], None).await,
        }
    }

    pub async fn invite(&self, nickname: &str, channel: &str) -> Result<()> {
        self.send(&["INVITE", nickname, channel], None).await
    }

    pub async fn kick(&self, channel: &str, nickname: &str, text: &str) -> Result<()> {
        self.send(&["KICK", channel, nickname], Some(text)).await
    }

    pub async fn names_query(&self, channel: &str) -> Result<()> {
        self.send(&["NAMES", channel], None).await
    }

    pub async fn pong(&self, payload: &str) -> Result<()> {
        self.send(&["PONG"], Some(payload)).await
    }
}

/// Strips line terminators so handler input cannot inject commands.
fn sanitize(s: &str) -> String {
    s.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

/// Decides whether `line` fits the budget with CRLF. When it does not,
/// returns the head to send now and the remaining text, preferring the last
/// space inside the budget and falling back to a UTF-8 boundary.
///
/// `text_start` is the byte offset where the trailing text begins (the
/// length of the command prefix); the command region itself is never split.
fn split_line(line: &str, text_start: usize, msg_len: usize) -> Option<(String, String)> {
    if line.len() + 2 <= msg_len {
        return None;
    }
    let text_start = text_start + 2; // past " :"
    if text_start >= line.len() || text_start >= msg_len {
        // The command region alone busts the budget; nothing sane to do.
        return None;
    }

    let mut window = msg_len.min(line.len());
    while !line.is_char_boundary(window) {
        window -= 1;
    }

    match line[text_start..window].rfind(' ') {
        Some(i) => {
            let cut = text_start + i;
            Some((line[..cut].to_owned(), line[cut + 1..].to_owned()))
        }
        None => Some((line[..window].to_owned(), line[window..].to_owned())),
    }
}

#[cfg(test)]
mod test {
    use super::{sanitize, split_line};

    #[test]
    fn short_lines_pass_through() {
        assert_eq!(split_line("PRIVMSG #c :hi", 10, 400), None);
    }

    #[test]
    fn split_prefers_last_space() {
        let cmds = "PRIVMSG #c";
        let line = format!("{} :aaaa bbbb cccc", cmds);
        let (head, rest) = split_line(&line, cmds.len(), 20).unwrap();
        assert_eq!(head, "PRIVMSG #c :aaaa");
        assert_eq!(rest, "bbbb cccc");
    }

    #[test]
    fn split_never_lands_mid_codepoint() {
        let cmds = "PRIVMSG #c";
        let text = "αβγ ".repeat(20);
        let mut parts = Vec::new();
        let mut text = text.trim_end().to_owned();
        loop {
            let line = format!("{} :{}", cmds, text);
            match split_line(&line, cmds.len(), 40) {
                None => {
                    parts.push(line);
                    break;
                }
                Some((head, rest)) => {
                    parts.push(head);
                    text = rest;
                }
            }
        }
        assert!(parts.len() >= 2);
        for part in &parts {
            // Every part respects the budget and repeats the command
            // prefix. A mid-codepoint cut would have panicked the slicing
            // inside split_line already.
            assert!(part.len() <= 40);
            assert!(part.starts_with("PRIVMSG #c :"));
        }
        // No duplication: the reassembled text matches the input.
        let rebuilt: Vec<&str> = parts
            .iter()
            .map(|p| p.strip_prefix("PRIVMSG #c :").unwrap())
            .collect();
        assert_eq!(rebuilt.join(" "), "αβγ ".repeat(20).trim_end());
    }

    #[test]
    fn split_without_spaces_cuts_at_boundary() {
        let cmds = "PRIVMSG #c";
        let line = format!("{} :{}", cmds, "α".repeat(40));
        let (head, rest) = split_line(&line, cmds.len(), 21).unwrap();
        // Budget 21 lands inside a two-byte codepoint; the cut backs off.
        assert!(head.len() <= 21);
        assert!(std::str::from_utf8(head.as_bytes()).is_ok());
        assert_eq!(format!("{}{}", head.strip_prefix("PRIVMSG #c :").unwrap(), rest), "α".repeat(40));
    }

    #[test]
    fn sanitize_strips_line_breaks() {
        assert_eq!(sanitize("a\r\nQUIT :x"), "aQUIT :x");
    }
}
