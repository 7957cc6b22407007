//! Session state: registration progress, the bot's own identity as the
//! server sees it, and channel membership driven by server events.
//!
//! Membership mutations are applied on the read task before a message fans
//! out to modules, so every handler sees the state as of the message it was
//! dispatched with.

use std::collections::{BTreeSet, HashMap};

use dbot_proto::mode::parse_mode_changes;
use dbot_proto::{Isupport, Message};

/// The outbound byte budget per line until the bot learns its own hostmask.
pub const DEFAULT_MSG_LEN: usize = 400;

/// Where the session is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Registering,
    Connected,
}

/// The outcome of SASL authentication, if it was attempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaslState {
    NotTried,
    InProgress,
    Success,
    Fail,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NamesPhase {
    Pending,
    Ended,
}

/// A follow-up the supervisor must perform after a state mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateAction {
    /// Send `NAMES <channel>` to resynchronize membership. Without full
    /// IRCv3 the remaining prefixes after a `-mode` are unknowable locally.
    QueryNames(String),
}

/// All connection-scoped state. Created when the socket opens, discarded
/// when the session ends.
pub struct ClientState {
    /// The nickname the server currently sees for this client.
    pub curr_nickname: String,
    /// Set when a `_`-suffixed fallback nickname was used.
    pub alt_nickname: bool,
    pub conn_state: ConnState,
    pub sasl_state: SaslState,
    /// Capabilities acknowledged by the server.
    pub ircv3_enabled: BTreeSet<String>,
    /// The bot's own `nick!user@host`, learned from its self-JOIN.
    pub bot_hostmask: Option<String>,
    /// Outbound byte budget per line, excluding CRLF.
    pub msg_len: usize,
    /// Channels the bot has joined.
    pub channels: BTreeSet<String>,
    /// Channel -> nickname -> prefix symbols held, highest rank first.
    pub names: HashMap<String, HashMap<String, Vec<char>>>,
    names_phase: HashMap<String, NamesPhase>,
    /// Server feature advertisements.
    pub isupport: Isupport,
}

impl ClientState {
    pub fn new() -> ClientState {
        ClientState {
            curr_nickname: String::new(),
            alt_nickname: false,
            conn_state: ConnState::Disconnected,
            sasl_state: SaslState::NotTried,
            ircv3_enabled: BTreeSet::new(),
            bot_hostmask: None,
            msg_len: DEFAULT_MSG_LEN,
            channels: BTreeSet::new(),
            names: HashMap::new(),
            names_phase: HashMap::new(),
            isupport: Isupport::default(),
        }
    }

    /// Applies the membership effects of a server message, if it has any.
    pub fn apply(&mut self, msg: &Message) -> Option<StateAction> {
        match msg.command.as_str() {
            "005" => self.on_isupport(msg),
            "353" => self.on_namreply(msg),
            "366" => self.on_endofnames(msg),
            "JOIN" => self.on_join(msg),
            "PART" => self.on_part(msg),
            "QUIT" => self.on_quit(msg),
            "NICK" => self.on_nick(msg),
            "MODE" => return self.on_mode(msg),
            _ => {}
        }
        None
    }

    fn on_isupport(&mut self, msg: &Message) {
        // params: client, TOKEN=VALUE ..., "are supported by this server"
        if msg.params.len() > 2 {
            let tokens = &msg.params[1..msg.params.len() - 1];
            self.isupport.apply_tokens(tokens.iter().map(String::as_str));
        }
    }

    fn on_namreply(&mut self, msg: &Message) {
        // params: client, channel mode symbol, channel, names
        let (channel, names) = match (msg.params.get(2), msg.params.get(3)) {
            (Some(c), Some(n)) => (c.clone(), n),
            _ => return,
        };

        let mut parsed = HashMap::new();
        for name in names.split_whitespace() {
            let mut chars = name.chars();
            match chars.next() {
                Some(c) if self.isupport.is_prefix_symbol(c) => {
                    parsed.insert(chars.as_str().to_owned(), vec![c]);
                }
                Some(_) => {
                    parsed.insert(name.to_owned(), Vec::new());
                }
                None => {}
            }
        }

        match self.names_phase.get(&channel) {
            Some(NamesPhase::Pending) => {
                self.names.entry(channel).or_default().extend(parsed);
            }
            _ => {
                self.names.insert(channel.clone(), parsed);
                self.names_phase.insert(channel, NamesPhase::Pending);
            }
        }
    }

    fn on_endofnames(&mut self, msg: &Message) {
        if let Some(channel) = msg.params.get(1) {
            self.names_phase.insert(channel.clone(), NamesPhase::Ended);
        }
    }

    fn on_join(&mut self, msg: &Message) {
        let (nick, channel) = match (msg.source_nickname(), msg.params.first()) {
            (Some(n), Some(c)) => (n.to_owned(), c.clone()),
            _ => return,
        };
        if nick == self.curr_nickname {
            self.channels.insert(channel.clone());
            if self.bot_hostmask.is_none() {
                self.learn_hostmask(msg);
            }
            log::info!("+ Joined {}", channel);
        } else {
            self.names
                .entry(channel)
                .or_default()
                .entry(nick)
                .or_default();
        }
    }

    /// The self-JOIN prefix carries the hostmask the server issued for the
    /// bot; the outbound budget becomes `512 - len("nick!user@host ")`.
    fn learn_hostmask(&mut self, msg: &Message) {
        if let Some(prefix) = &msg.prefix {
            if let (Some(user), Some(host)) = (&prefix.user, &prefix.host) {
                let hostmask = format!("{}!{}@{}", prefix.nickname, user, host);
                self.msg_len = 512 - (hostmask.len() + 1);
                log::debug!("hostmask {}; msg_len {}", hostmask, self.msg_len);
                self.bot_hostmask = Some(hostmask);
            }
        }
    }

    fn on_part(&mut self, msg: &Message) {
        let (nick, channel) = match (msg.source_nickname(), msg.params.first()) {
            (Some(n), Some(c)) => (n, c),
            _ => return,
        };
        if nick == self.curr_nickname {
            self.channels.remove(channel);
            self.names.remove(channel);
            self.names_phase.remove(channel);
            log::info!("- Left {}", channel);
        } else if let Some(members) = self.names.get_mut(channel) {
            members.remove(nick);
        }
    }

    fn on_quit(&mut self, msg: &Message) {
        if let Some(nick) = msg.source_nickname() {
            for members in self.names.values_mut() {
                members.remove(nick);
            }
        }
    }

    fn on_nick(&mut self, msg: &Message) {
        let (old, new) = match (msg.source_nickname(), msg.params.first()) {
            (Some(o), Some(n)) => (o.to_owned(), n.clone()),
            _ => return,
        };
        for members in self.names.values_mut() {
            if let Some(prefixes) = members.remove(&old) {
                members.insert(new.clone(), prefixes);
            }
        }
        if old == self.curr_nickname {
            self.curr_nickname = new;
        }
    }

    fn on_mode(&mut self, msg: &Message) -> Option<StateAction> {
        let target = msg.params.first()?;
        if !self.isupport.is_channel(target) || msg.params.len() < 2 {
            return None;
        }
        let channel = target.clone();
        let changes = parse_mode_changes(&msg.params[1], &msg.params[2..], &self.isupport);
        let mut resync = false;
        for change in changes {
            let symbol = match self.isupport.symbol_for(change.mode) {
                Some(s) => s,
                None => continue,
            };
            if change.plus {
                if let Some(nick) = change.param {
                    self.insert_prefix(&channel, &nick, symbol);
                }
            } else {
                resync = true;
            }
        }
        if resync {
            Some(StateAction::QueryNames(channel))
        } else {
            None
        }
    }

    /// Inserts a prefix symbol into a member's list at its rank position,
    /// keeping the list sorted by rank descending.
    fn insert_prefix(&mut self, channel: &str, nick: &str, symbol: char) {
        let isupport = &self.isupport;
        let rank = isupport.rank_of(symbol);
        let prefixes = self
            .names
            .entry(channel.to_owned())
            .or_default()
            .entry(nick.to_owned())
            .or_default();
        if prefixes.contains(&symbol) {
            return;
        }
        let pos = prefixes
            .iter()
            .position(|s| isupport.rank_of(*s) < rank)
            .unwrap_or(prefixes.len());
        prefixes.insert(pos, symbol);
    }
}

impl Default for ClientState {
    fn default() -> ClientState {
        ClientState::new()
    }
}
