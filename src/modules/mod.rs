//! The module system: the trait modules implement, the context they are
//! handed, and the statically linked registry.
//!
//! Modules are compiled in and enabled through configuration. A module
//! never reaches global state: everything it may touch arrives through the
//! [`Context`], and its view of the supervisor is the read-only [`Client`]
//! handle.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use dbot_proto::Message;

use crate::client::Client;
use crate::config::ConfigStore;
use crate::error::Result;
use crate::vars::{Stores, VarMemory, VarStore};

pub mod ping;
pub mod registration;
pub mod user_auth;

/// The synthetic command delivered once per session, right after the
/// socket is up, to modules that asked for it.
pub const STARTUP: &str = "__STARTUP";

/// What a module declares at load time.
#[derive(Clone, Copy, Default)]
pub struct Manifest {
    /// Raw IRC commands the module wants to receive.
    pub irc_commands: &'static [&'static str],
    /// Bot command words that invoke the module from a prefixed PRIVMSG.
    pub bot_commands: &'static [&'static str],
    /// Whether the module receives the startup event.
    pub startup: bool,
}

/// Everything a module invocation receives.
pub struct Context {
    /// The parsed message being dispatched.
    pub msg: Arc<Message>,
    /// The channel the message concerns. For private messages this is the
    /// sender's nickname.
    pub channel: String,
    /// The sender's nickname, or empty for server-originated messages.
    pub nickname: String,
    /// The sender's username, when the prefix carried one.
    pub username: String,
    /// The sender's hostname, when the prefix carried one.
    pub hostname: String,
    /// The message text (the trailing parameter).
    pub text: String,
    /// The text minus its first token; the arguments of a bot command.
    pub args: String,
    /// The matched bot command word, for bot-command deliveries.
    pub botcmd: Option<String>,
    /// The command prefix in effect for the channel.
    pub cmd_prefix: char,
    /// The global configuration.
    pub conf: Arc<ConfigStore>,
    /// Variable memory bound to the receiving module's namespace.
    pub vars: VarStore,
    /// The whole variable memory, for modules that share state on purpose.
    pub memory: VarMemory,
    /// The shared in-memory and on-disk stores.
    pub stores: Stores,
    /// The client handle.
    pub irc: Arc<Client>,
}

/// A behavioral module.
pub trait Module: Send + Sync {
    /// The module's registry name.
    fn name(&self) -> &'static str;

    /// The commands and events the module subscribes to.
    fn manifest(&self) -> Manifest;

    /// Handles one dispatched message.
    fn call(self: Arc<Self>, ctx: Context) -> BoxFuture<'static, Result<()>>;
}

/// Builds the module registry: the core set is always present, and names
/// from `irc.modules.load` enable statically linked user modules. Names
/// with no linked implementation are logged and skipped, like a module
/// that failed to import.
pub fn registry(load: &[String]) -> Vec<Arc<dyn Module>> {
    let core: Vec<Arc<dyn Module>> = vec![
        Arc::new(registration::Registration::new()),
        Arc::new(ping::Ping),
        Arc::new(user_auth::UserAuth),
    ];
    for name in load {
        if !core.iter().any(|m| m.name() == name) {
            log::warn!("-- Module \"{}\" is not linked into this build; skipping", name);
        }
    }
    core
}
