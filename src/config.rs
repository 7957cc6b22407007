//! The JSON configuration store.
//!
//! The whole configuration lives in one serde document backed by
//! `<confdir>/config.json`. Reads are cheap snapshots behind a reader-writer
//! lock; every mutating accessor rewrites the file atomically (temp file,
//! then rename) before it returns.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::acl::AclEntry;
use crate::error::{Error, Result};

fn default_msg_delay() -> u64 {
    1
}

/// The whole configuration document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Document {
    /// Process-level settings.
    #[serde(default)]
    pub sys: SysConf,
    /// Everything about the IRC network and the module system.
    pub irc: IrcConf,
}

/// Process-level settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SysConf {
    /// `info` or `debug`.
    pub log_level: String,
    /// Where log files go; defaults to `<confdir>/logs`.
    pub log_dir: Option<PathBuf>,
    /// Worker pool size; defaults to a small multiple of the core count.
    pub workers: Option<usize>,
}

impl Default for SysConf {
    fn default() -> SysConf {
        SysConf {
            log_level: "info".to_owned(),
            log_dir: None,
            workers: None,
        }
    }
}

/// The `irc` section.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IrcConf {
    /// Nicknames with owner privileges.
    #[serde(default)]
    pub owners: BTreeSet<String>,
    /// How to reach and register with the network.
    pub connection: ConnectionConf,
    /// Channel name to channel key; the key is empty when there is none.
    #[serde(default)]
    pub channels: BTreeMap<String, String>,
    /// Module system settings.
    #[serde(default)]
    pub modules: ModulesConf,
    /// Serialized user access list entries, in order.
    #[serde(default)]
    pub user_acl: Vec<String>,
}

/// The `irc.connection` section.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConf {
    /// Host to connect to.
    pub network: String,
    /// Port to connect to.
    pub port: u16,
    /// Whether to wrap the socket in TLS.
    #[serde(default)]
    pub ssl: bool,
    /// Disables TLS certificate verification. Off by default; enabling it
    /// is logged loudly.
    #[serde(default)]
    pub ssl_noverify: bool,
    /// Server password, sent as PASS before registration.
    #[serde(default)]
    pub net_password: Option<String>,
    /// The nickname to register with.
    pub nickname: String,
    /// The username to register with.
    pub username: String,
    /// The real name to register with.
    pub realname: String,
    /// `sasl`, `nickserv`, or empty for none.
    #[serde(default)]
    pub authentication: String,
    /// The password for the configured authentication method.
    #[serde(default)]
    pub auth_password: String,
    /// Quit message; defaults to the bot's name and version.
    #[serde(default)]
    pub quitmsg: Option<String>,
    /// Seconds to sleep between the parts of a multipart send.
    #[serde(default = "default_msg_delay")]
    pub msg_delay: u64,
}

/// The `irc.modules` section.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulesConf {
    /// User modules to load, in order.
    pub load: Vec<String>,
    /// Filesystem paths searched for user modules.
    pub paths: Vec<PathBuf>,
    /// The command prefix used where no per-channel override exists.
    pub global_prefix: char,
    /// Per-channel command prefix overrides.
    pub channel_prefix: BTreeMap<String, char>,
    /// Channels where a module must not run.
    pub blacklist: BTreeMap<String, BTreeSet<String>>,
    /// When non-empty for a module, the only channels where it runs.
    pub whitelist: BTreeMap<String, BTreeSet<String>>,
}

impl Default for ModulesConf {
    fn default() -> ModulesConf {
        ModulesConf {
            load: Vec::new(),
            paths: Vec::new(),
            global_prefix: '.',
            channel_prefix: BTreeMap::new(),
            blacklist: BTreeMap::new(),
            whitelist: BTreeMap::new(),
        }
    }
}

/// The shared handle to the configuration.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    confdir: PathBuf,
    doc: RwLock<Document>,
}

impl ConfigStore {
    /// Opens `<confdir>/config.json`. Serde's missing-field errors name the
    /// offending key, which is what reaches the user on a fatal startup
    /// error.
    pub fn open(confdir: &Path) -> Result<ConfigStore> {
        let path = confdir.join("config.json");
        let data = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let doc: Document = serde_json::from_str(&data)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Ok(ConfigStore {
            path,
            confdir: confdir.to_owned(),
            doc: RwLock::new(doc),
        })
    }

    /// Builds a store around an in-memory document. The store saves to
    /// `<confdir>/config.json` like any other.
    pub fn from_document(confdir: &Path, doc: Document) -> ConfigStore {
        ConfigStore {
            path: confdir.join("config.json"),
            confdir: confdir.to_owned(),
            doc: RwLock::new(doc),
        }
    }

    fn save(&self, doc: &Document) -> Result<()> {
        let data = serde_json::to_string_pretty(doc)
            .map_err(|e| Error::Config(format!("cannot serialize configuration: {}", e)))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// The configuration directory this store belongs to.
    pub fn confdir(&self) -> &Path {
        &self.confdir
    }

    // Getters. All return owned snapshots so no lock is held by callers.

    pub fn log_level(&self) -> String {
        self.doc.read().sys.log_level.clone()
    }

    pub fn log_dir(&self) -> PathBuf {
        self.doc
            .read()
            .sys
            .log_dir
            .clone()
            .unwrap_or_else(|| self.confdir.join("logs"))
    }

    pub fn workers(&self) -> Option<usize> {
        self.doc.read().sys.workers
    }

    pub fn network(&self) -> String {
        self.doc.read().irc.connection.network.clone()
    }

    pub fn port(&self) -> u16 {
        self.doc.read().irc.connection.port
    }

    pub fn ssl(&self) -> bool {
        self.doc.read().irc.connection.ssl
    }

    pub fn ssl_noverify(&self) -> bool {
        self.doc.read().irc.connection.ssl_noverify
    }

    pub fn net_password(&self) -> Option<String> {
        self.doc.read().irc.connection.net_password.clone()
    }

    pub fn nickname(&self) -> String {
        self.doc.read().irc.connection.nickname.clone()
    }

    pub fn username(&self) -> String {
        self.doc.read().irc.connection.username.clone()
    }

    pub fn realname(&self) -> String {
        self.doc.read().irc.connection.realname.clone()
    }

    /// The configured authentication method, lowercased. Empty means none.
    pub fn authentication(&self) -> String {
        self.doc.read().irc.connection.authentication.to_lowercase()
    }

    /// Whether the configured authentication method is `method`.
    pub fn is_auth_method(&self, method: &str) -> bool {
        self.authentication() == method.to_lowercase()
    }

    pub fn auth_password(&self) -> String {
        self.doc.read().irc.connection.auth_password.clone()
    }

    pub fn quitmsg(&self) -> String {
        self.doc
            .read()
            .irc
            .connection
            .quitmsg
            .clone()
            .unwrap_or_else(|| format!("drastikbot {}", env!("CARGO_PKG_VERSION")))
    }

    pub fn msg_delay(&self) -> u64 {
        self.doc.read().irc.connection.msg_delay
    }

    pub fn owners(&self) -> BTreeSet<String> {
        self.doc.read().irc.owners.clone()
    }

    /// Whether the nickname is an owner of the bot. Nicknames compare
    /// ASCII-caselessly, as everywhere on IRC.
    pub fn is_owner(&self, nickname: &str) -> bool {
        self.doc
            .read()
            .irc
            .owners
            .iter()
            .any(|o| o.eq_ignore_ascii_case(nickname))
    }

    pub fn channels(&self) -> BTreeMap<String, String> {
        self.doc.read().irc.channels.clone()
    }

    pub fn has_channel(&self, channel: &str) -> bool {
        self.doc.read().irc.channels.contains_key(channel)
    }

    pub fn module_load(&self) -> Vec<String> {
        self.doc.read().irc.modules.load.clone()
    }

    pub fn module_paths(&self) -> Vec<PathBuf> {
        self.doc.read().irc.modules.paths.clone()
    }

    pub fn global_prefix(&self) -> char {
        self.doc.read().irc.modules.global_prefix
    }

    /// The command prefix in effect for the channel.
    pub fn channel_prefix(&self, channel: &str) -> char {
        let doc = self.doc.read();
        doc.irc
            .modules
            .channel_prefix
            .get(channel)
            .copied()
            .unwrap_or(doc.irc.modules.global_prefix)
    }

    pub fn blacklist(&self, module: &str) -> BTreeSet<String> {
        self.doc
            .read()
            .irc
            .modules
            .blacklist
            .get(module)
            .cloned()
            .unwrap_or_default()
    }

    pub fn whitelist(&self, module: &str) -> BTreeSet<String> {
        self.doc
            .read()
            .irc
            .modules
            .whitelist
            .get(module)
            .cloned()
            .unwrap_or_default()
    }

    /// The user access list in its serialized form.
    pub fn user_acl(&self) -> Vec<String> {
        self.doc.read().irc.user_acl.clone()
    }

    /// The user access list, parsed. Entries that no longer parse are
    /// skipped; they can only appear through hand-edits of the file.
    pub fn acl_entries(&self) -> Vec<AclEntry> {
        self.doc
            .read()
            .irc
            .user_acl
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect()
    }

    // Setters. Each persists the whole document before returning.

    pub fn add_owner(&self, nickname: &str) -> Result<()> {
        let mut doc = self.doc.write();
        doc.irc.owners.insert(nickname.to_owned());
        self.save(&doc)
    }

    pub fn del_owner(&self, nickname: &str) -> Result<()> {
        let mut doc = self.doc.write();
        doc.irc.owners.remove(nickname);
        self.save(&doc)
    }

    pub fn add_channel(&self, channel: &str, key: &str) -> Result<()> {
        let mut doc = self.doc.write();
        doc.irc
            .channels
            .insert(channel.to_owned(), key.to_owned());
        self.save(&doc)
    }

    pub fn del_channel(&self, channel: &str) -> Result<()> {
        let mut doc = self.doc.write();
        doc.irc.channels.remove(channel);
        doc.irc.modules.channel_prefix.remove(channel);
        self.save(&doc)
    }

    pub fn set_global_prefix(&self, prefix: &str) -> Result<()> {
        let prefix = single_char(prefix)?;
        let mut doc = self.doc.write();
        doc.irc.modules.global_prefix = prefix;
        self.save(&doc)
    }

    /// Sets a per-channel command prefix. The value must be exactly one
    /// character; the constraint belongs here, not to the caller.
    pub fn set_channel_prefix(&self, channel: &str, prefix: &str) -> Result<()> {
        let prefix = single_char(prefix)?;
        let mut doc = self.doc.write();
        doc.irc
            .modules
            .channel_prefix
            .insert(channel.to_owned(), prefix);
        self.save(&doc)
    }

    /// Blacklists a module in a channel. Fails if the module has a
    /// whitelist: at most one of the two may be non-empty.
    pub fn add_blacklist(&self, module: &str, channel: &str) -> Result<()> {
        let mut doc = self.doc.write();
        if doc
            .irc
            .modules
            .whitelist
            .get(module)
            .map(|w| !w.is_empty())
            .unwrap_or(false)
        {
            return Err(Error::Config(format!(
                "module {} has a whitelist; remove it before blacklisting",
                module
            )));
        }
        doc.irc
            .modules
            .blacklist
            .entry(module.to_owned())
            .or_default()
            .insert(channel.to_owned());
        self.save(&doc)
    }

    pub fn del_blacklist(&self, module: &str, channel: &str) -> Result<()> {
        let mut doc = self.doc.write();
        if let Some(channels) = doc.irc.modules.blacklist.get_mut(module) {
            channels.remove(channel);
            if channels.is_empty() {
                doc.irc.modules.blacklist.remove(module);
            }
        }
        self.save(&doc)
    }

    /// Whitelists a module in a channel. Fails if the module has a
    /// blacklist: at most one of the two may be non-empty.
    pub fn add_whitelist(&self, module: &str, channel: &str) -> Result<()> {
        let mut doc = self.doc.write();
        if doc
            .irc
            .modules
            .blacklist
            .get(module)
            .map(|b| !b.is_empty())
            .unwrap_or(false)
        {
            return Err(Error::Config(format!(
                "module {} has a blacklist; remove it before whitelisting",
                module
            )));
        }
        doc.irc
            .modules
            .whitelist
            .entry(module.to_owned())
            .or_default()
            .insert(channel.to_owned());
        self.save(&doc)
    }

    pub fn del_whitelist(&self, module: &str, channel: &str) -> Result<()> {
        let mut doc = self.doc.write();
        if let Some(channels) = doc.irc.modules.whitelist.get_mut(module) {
            channels.remove(channel);
            if channels.is_empty() {
                doc.irc.modules.whitelist.remove(module);
            }
        }
        self.save(&doc)
    }

    pub fn module_load_add(&self, name: &str) -> Result<()> {
        let mut doc = self.doc.write();
        if !doc.irc.modules.load.iter().any(|m| m == name) {
            doc.irc.modules.load.push(name.to_owned());
        }
        self.save(&doc)
    }

    pub fn module_load_del(&self, name: &str) -> Result<()> {
        let mut doc = self.doc.write();
        doc.irc.modules.load.retain(|m| m != name);
        self.save(&doc)
    }

    /// Appends a user access list entry.
    pub fn acl_add(&self, entry: &AclEntry) -> Result<()> {
        let mut doc = self.doc.write();
        doc.irc.user_acl.push(entry.to_string());
        self.save(&doc)
    }

    /// Removes the serialized entry equal to `mask`. Returns whether an
    /// entry was removed.
    pub fn acl_del(&self, mask: &str) -> Result<bool> {
        let mut doc = self.doc.write();
        let before = doc.irc.user_acl.len();
        doc.irc.user_acl.retain(|m| m != mask);
        let removed = doc.irc.user_acl.len() != before;
        self.save(&doc)?;
        Ok(removed)
    }

    /// Drops entries whose expiry has passed. Run once at startup.
    pub fn acl_purge_expired(&self, now: i64) -> Result<()> {
        let mut doc = self.doc.write();
        doc.irc.user_acl.retain(|m| {
            m.parse::<AclEntry>()
                .map(|e| !e.is_expired(now))
                .unwrap_or(false)
        });
        self.save(&doc)
    }
}

fn single_char(s: &str) -> Result<char> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(Error::Config(format!(
            "command prefix must be exactly one character, got {:?}",
            s
        ))),
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::{ConfigStore, ConnectionConf, Document, IrcConf, ModulesConf, SysConf};
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn test_dir(name: &str) -> PathBuf {
        static N: AtomicUsize = AtomicUsize::new(0);
        let dir = std::env::temp_dir().join(format!(
            "drastikbot-test-{}-{}-{}",
            std::process::id(),
            name,
            N.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub(crate) fn test_document() -> Document {
        Document {
            sys: SysConf::default(),
            irc: IrcConf {
                owners: ["drastik".to_owned()].into(),
                connection: ConnectionConf {
                    network: "irc.example.com".into(),
                    port: 6697,
                    ssl: true,
                    ssl_noverify: false,
                    net_password: None,
                    nickname: "drastikbot".into(),
                    username: "drastikbot".into(),
                    realname: "drastikbot".into(),
                    authentication: "sasl".into(),
                    auth_password: "pw".into(),
                    quitmsg: None,
                    msg_delay: 1,
                },
                channels: BTreeMap::from([("#test".to_owned(), String::new())]),
                modules: ModulesConf::default(),
                user_acl: Vec::new(),
            },
        }
    }

    pub(crate) fn test_store(name: &str) -> ConfigStore {
        ConfigStore::from_document(&test_dir(name), test_document())
    }

    #[test]
    fn save_and_reopen() {
        let dir = test_dir("roundtrip");
        let store = ConfigStore::from_document(&dir, test_document());
        store.add_channel("#rust", "key").unwrap();

        let reopened = ConfigStore::open(&dir).unwrap();
        assert_eq!(reopened.channels().get("#rust").unwrap(), "key");
        assert_eq!(reopened.nickname(), "drastikbot");
        assert_eq!(reopened.msg_delay(), 1);
        assert_eq!(reopened.global_prefix(), '.');
    }

    #[test]
    fn missing_field_names_the_key() {
        let dir = test_dir("missing");
        fs::write(
            dir.join("config.json"),
            r#"{"irc": {"connection": {"network": "irc.example.com", "port": 6667}}}"#,
        )
        .unwrap();
        let err = ConfigStore::open(&dir).unwrap_err().to_string();
        assert!(err.contains("nickname"), "error should name the key: {}", err);
    }

    #[test]
    fn channel_prefix_fallback_and_override() {
        let store = test_store("prefix");
        assert_eq!(store.channel_prefix("#test"), '.');
        store.set_channel_prefix("#test", "!").unwrap();
        assert_eq!(store.channel_prefix("#test"), '!');
        assert_eq!(store.channel_prefix("#other"), '.');
    }

    #[test]
    fn channel_prefix_must_be_one_char() {
        let store = test_store("prefix-len");
        assert!(store.set_channel_prefix("#test", "!!").is_err());
        assert!(store.set_channel_prefix("#test", "").is_err());
        assert!(store.set_global_prefix("ab").is_err());
    }

    #[test]
    fn blacklist_whitelist_exclusion() {
        let store = test_store("lists");
        store.add_blacklist("tell", "#test").unwrap();
        assert!(store.add_whitelist("tell", "#other").is_err());
        store.del_blacklist("tell", "#test").unwrap();
        store.add_whitelist("tell", "#other").unwrap();
        assert!(store.add_blacklist("tell", "#test").is_err());
    }

    #[test]
    fn is_owner_is_caseless() {
        let store = test_store("owners");
        assert!(store.is_owner("Drastik"));
        assert!(!store.is_owner("somebody"));
    }

    #[test]
    fn acl_purge_drops_expired() {
        let store = test_store("acl");
        let keep: crate::acl::AclEntry = "* a!*@* 0 *".parse().unwrap();
        let dead: crate::acl::AclEntry = "* b!*@* 5 *".parse().unwrap();
        store.acl_add(&keep).unwrap();
        store.acl_add(&dead).unwrap();
        store.acl_purge_expired(100).unwrap();
        assert_eq!(store.user_acl(), vec![keep.to_string()]);
    }
}
