//! The module dispatcher: indices from commands to modules, access-control
//! gating, and concurrent delivery on a bounded worker pool.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::Semaphore;

use dbot_proto::Message;

use crate::acl;
use crate::client::Client;
use crate::config::ConfigStore;
use crate::modules::{self, Context, Module, STARTUP};
use crate::vars::{Stores, VarMemory};

/// Per-message facts shared by every delivery of that message.
struct Meta {
    channel: String,
    nickname: String,
    username: String,
    hostname: String,
    text: String,
    args: String,
    cmd_prefix: char,
}

impl Meta {
    fn new(msg: &Message, irc: &Client, conf: &ConfigStore) -> Meta {
        let (nickname, username, hostname) = match &msg.prefix {
            Some(p) => (
                p.nickname.clone(),
                p.user.clone().unwrap_or_default(),
                p.host.clone().unwrap_or_default(),
            ),
            None => Default::default(),
        };

        // The channel sits in different positions depending on the command.
        let mut channel = match msg.command.as_str() {
            "353" => msg.params.get(2),
            _ => msg.params.first(),
        }
        .cloned()
        .unwrap_or_default();

        // A query: the conversation is with the sender, not with us.
        if channel == irc.current_nickname() {
            channel = nickname.clone();
        }

        let text = msg.text().to_owned();
        let args = text
            .split_once(' ')
            .map(|(_, rest)| rest.trim().to_owned())
            .unwrap_or_default();
        let cmd_prefix = conf.channel_prefix(&channel);

        Meta {
            channel,
            nickname,
            username,
            hostname,
            text,
            args,
            cmd_prefix,
        }
    }

    /// The bot command word of a PRIVMSG: its first token minus the leading
    /// prefix character, when that character is the channel's prefix.
    fn botcmd(&self) -> Option<String> {
        let token = self.text.split_whitespace().next()?;
        let mut chars = token.chars();
        if chars.next()? != self.cmd_prefix {
            return None;
        }
        let word = chars.as_str();
        if word.is_empty() {
            None
        } else {
            Some(word.to_owned())
        }
    }
}

/// Allowed iff the channel is not blacklisted for the module and, when a
/// whitelist exists, is on it.
pub fn check_channel_module_access(conf: &ConfigStore, module: &str, channel: &str) -> bool {
    let blacklist = conf.blacklist(module);
    let whitelist = conf.whitelist(module);
    (blacklist.is_empty() || !blacklist.contains(channel))
        && (whitelist.is_empty() || whitelist.contains(channel))
}

/// The dispatcher. One per session; the registry is rebuilt on reconnect.
pub struct Dispatcher {
    conf: Arc<ConfigStore>,
    memory: VarMemory,
    stores: Stores,
    registry: RwLock<Vec<Arc<dyn Module>>>,
    irc_index: RwLock<HashMap<String, Vec<Arc<dyn Module>>>>,
    bot_index: RwLock<HashMap<String, Vec<Arc<dyn Module>>>>,
    pool: Arc<Semaphore>,
    dev: bool,
}

impl Dispatcher {
    pub fn new(conf: Arc<ConfigStore>, memory: VarMemory, stores: Stores, dev: bool) -> Dispatcher {
        let workers = conf
            .workers()
            .unwrap_or_else(|| {
                2 * std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(2)
            })
            .max(1);
        let dispatcher = Dispatcher {
            registry: RwLock::new(modules::registry(&conf.module_load())),
            irc_index: RwLock::new(HashMap::new()),
            bot_index: RwLock::new(HashMap::new()),
            pool: Arc::new(Semaphore::new(workers)),
            conf,
            memory,
            stores,
            dev,
        };
        dispatcher.reload();
        dispatcher
    }

    /// Rebuilds both dispatch indices from the live registry.
    pub fn reload(&self) {
        let registry = self.registry.read();
        let mut irc_index: HashMap<String, Vec<Arc<dyn Module>>> = HashMap::new();
        let mut bot_index: HashMap<String, Vec<Arc<dyn Module>>> = HashMap::new();
        for module in registry.iter() {
            let manifest = module.manifest();
            for command in manifest.irc_commands {
                irc_index
                    .entry((*command).to_owned())
                    .or_default()
                    .push(module.clone());
            }
            for word in manifest.bot_commands {
                bot_index
                    .entry((*word).to_owned())
                    .or_default()
                    .push(module.clone());
            }
        }
        *self.irc_index.write() = irc_index;
        *self.bot_index.write() = bot_index;
    }

    /// Rebuilds the registry from the statically linked set, honoring the
    /// configured load list, then reloads the indices.
    pub fn reimport(&self) {
        *self.registry.write() = modules::registry(&self.conf.module_load());
        self.reload();
    }

    /// Delivers the startup event to modules that asked for it.
    pub fn startup(&self, irc: &Arc<Client>) {
        let msg = Arc::new(Message::new(None, STARTUP, vec![]));
        let meta = Meta::new(&msg, irc, &self.conf);
        let starters: Vec<Arc<dyn Module>> = self
            .registry
            .read()
            .iter()
            .filter(|m| m.manifest().startup)
            .cloned()
            .collect();
        for module in starters {
            let ctx = self.context(&msg, &meta, None, irc, module.name());
            self.spawn(module, ctx);
        }
    }

    /// Fans one parsed message out to its handlers. Never blocks on module
    /// work: jobs go to the bounded pool and run as permits free up.
    pub fn dispatch(&self, msg: Arc<Message>, irc: &Arc<Client>) {
        if self.dev {
            self.reimport();
        }

        let meta = Meta::new(&msg, irc, &self.conf);
        let now = Utc::now().timestamp();
        let gated = msg.command == "PRIVMSG";

        let handlers = self
            .irc_index
            .read()
            .get(&msg.command)
            .cloned()
            .unwrap_or_default();
        for module in handlers {
            if gated && !self.allowed(module.name(), &meta, now) {
                continue;
            }
            let ctx = self.context(&msg, &meta, None, irc, module.name());
            self.spawn(module, ctx);
        }

        if gated {
            if let Some(word) = meta.botcmd() {
                let handlers = self
                    .bot_index
                    .read()
                    .get(&word)
                    .cloned()
                    .unwrap_or_default();
                for module in handlers {
                    if !self.allowed(module.name(), &meta, now) {
                        continue;
                    }
                    let ctx = self.context(&msg, &meta, Some(word.clone()), irc, module.name());
                    self.spawn(module, ctx);
                }
            }
        }
    }

    fn allowed(&self, module: &str, meta: &Meta, now: i64) -> bool {
        check_channel_module_access(&self.conf, module, &meta.channel)
            && !acl::is_banned(
                &self.conf.acl_entries(),
                &meta.channel,
                &meta.nickname,
                &meta.username,
                &meta.hostname,
                module,
                now,
            )
    }

    fn context(
        &self,
        msg: &Arc<Message>,
        meta: &Meta,
        botcmd: Option<String>,
        irc: &Arc<Client>,
        module: &str,
    ) -> Context {
        Context {
            msg: msg.clone(),
            channel: meta.channel.clone(),
            nickname: meta.nickname.clone(),
            username: meta.username.clone(),
            hostname: meta.hostname.clone(),
            text: meta.text.clone(),
            args: meta.args.clone(),
            botcmd,
            cmd_prefix: meta.cmd_prefix,
            conf: self.conf.clone(),
            vars: self.memory.scoped(module),
            memory: self.memory.clone(),
            stores: self.stores.clone(),
            irc: irc.clone(),
        }
    }

    /// Runs one `(message, module)` job on the pool, behind an error
    /// boundary: a failing module is logged and never takes the dispatcher
    /// with it.
    fn spawn(&self, module: Arc<dyn Module>, ctx: Context) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let _permit = match pool.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let name = module.name();
            let command = ctx.msg.command.clone();
            if let Err(e) = module.call(ctx).await {
                log::error!("-- Module \"{}\" exited with error on {}: {:?}", name, command, e);
            }
        });
    }
}

#[cfg(test)]
mod test {
    use super::{check_channel_module_access, Dispatcher, Meta};
    use crate::client::Client;
    use crate::config::test::{test_dir, test_document, test_store};
    use crate::config::ConfigStore;
    use crate::conn::Connection;
    use crate::vars::{Stores, VarMemory};
    use dbot_proto::Message;
    use std::sync::Arc;

    fn test_client(conf: &Arc<ConfigStore>) -> Arc<Client> {
        let (ours, _theirs) = tokio::io::duplex(64);
        let (client, _reader) = Client::new(Connection::mock(ours), conf.clone());
        client
    }

    #[tokio::test]
    async fn indices_cover_the_core_modules() {
        let dir = test_dir("dispatch");
        let conf = Arc::new(ConfigStore::from_document(&dir, test_document()));
        let stores = Stores::open(&dir).unwrap();
        let dispatcher = Dispatcher::new(conf, VarMemory::new(), stores, false);

        let index = dispatcher.irc_index.read();
        for command in ["CAP", "AUTHENTICATE", "903", "904", "433", "376"] {
            assert!(index.contains_key(command), "missing {}", command);
        }
        assert!(index.contains_key("PING"));
        assert!(index.contains_key("NOTICE"));
    }

    #[tokio::test]
    async fn channel_access_is_monotone() {
        let conf = test_store("access");
        let (module, channel) = ("tell", "#test");
        assert!(check_channel_module_access(&conf, module, channel));

        conf.add_blacklist(module, channel).unwrap();
        assert!(!check_channel_module_access(&conf, module, channel));
        conf.del_blacklist(module, channel).unwrap();

        conf.add_whitelist(module, "#elsewhere").unwrap();
        assert!(!check_channel_module_access(&conf, module, channel));
        conf.add_whitelist(module, channel).unwrap();
        assert!(check_channel_module_access(&conf, module, channel));
    }

    #[tokio::test]
    async fn botcmd_extraction_honors_the_channel_prefix() {
        let conf = Arc::new(ConfigStore::from_document(
            &test_dir("botcmd"),
            test_document(),
        ));
        let client = test_client(&conf);

        let msg = Message::parse(":a!u@h PRIVMSG #test :.join #x now").unwrap();
        let meta = Meta::new(&msg, &client, &conf);
        assert_eq!(meta.botcmd(), Some("join".to_owned()));
        assert_eq!(meta.args, "#x now");

        let msg = Message::parse(":a!u@h PRIVMSG #test :join #x").unwrap();
        let meta = Meta::new(&msg, &client, &conf);
        assert_eq!(meta.botcmd(), None);

        // A channel override changes the effective prefix.
        conf.set_channel_prefix("#test", "!").unwrap();
        let msg = Message::parse(":a!u@h PRIVMSG #test :!join #x").unwrap();
        let meta = Meta::new(&msg, &client, &conf);
        assert_eq!(meta.botcmd(), Some("join".to_owned()));
        let msg = Message::parse(":a!u@h PRIVMSG #test :.join #x").unwrap();
        let meta = Meta::new(&msg, &client, &conf);
        assert_eq!(meta.botcmd(), None);
    }

    #[tokio::test]
    async fn queries_rewrite_the_channel_to_the_sender() {
        let conf = Arc::new(ConfigStore::from_document(
            &test_dir("query"),
            test_document(),
        ));
        let client = test_client(&conf);
        client.state().write().curr_nickname = "drastikbot".to_owned();

        let msg = Message::parse(":alice!u@h PRIVMSG drastikbot :hi").unwrap();
        let meta = Meta::new(&msg, &client, &conf);
        assert_eq!(meta.channel, "alice");
    }

    #[tokio::test]
    async fn acl_gates_privmsg_delivery() {
        let dir = test_dir("acl-gate");
        let conf = Arc::new(ConfigStore::from_document(&dir, test_document()));
        let entry: crate::acl::AclEntry = "#test alice!*@* 0 ping".parse().unwrap();
        conf.acl_add(&entry).unwrap();
        let stores = Stores::open(&dir).unwrap();
        let dispatcher = Dispatcher::new(conf.clone(), VarMemory::new(), stores, false);
        let client = test_client(&conf);

        let msg = Message::parse(":alice!u@h PRIVMSG #test :.ping").unwrap();
        let meta = Meta::new(&msg, &client, &conf);
        assert!(!dispatcher.allowed("ping", &meta, 1));
        assert!(dispatcher.allowed("other", &meta, 1));

        let msg = Message::parse(":bob!u@h PRIVMSG #test :.ping").unwrap();
        let meta = Meta::new(&msg, &client, &conf);
        assert!(dispatcher.allowed("ping", &meta, 1));
    }
}
