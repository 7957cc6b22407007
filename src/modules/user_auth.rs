//! NickServ login-status probes.
//!
//! `user_auth` asks NickServ whether a nickname is logged in (ACC for
//! Freenode-style services, STATUS for Anope) and parks the calling task
//! until the NOTICE handler below resolves the answer, or the timeout runs
//! out.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{json, Value};

use super::{Context, Manifest, Module};
use crate::client::Client;
use crate::error::Result;
use crate::vars::VarMemory;

const PENDING: &str = "_pending";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long a probe waits before giving up.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Asks NickServ whether `nickname` is logged in. `false` on timeout or a
/// negative answer.
pub async fn user_auth(
    memory: &VarMemory,
    irc: &Client,
    nickname: &str,
    timeout: Duration,
) -> bool {
    let store = memory.scoped("user_auth");
    store.varset(nickname, json!(PENDING));
    if irc
        .privmsg("NickServ", &format!("ACC {}", nickname))
        .await
        .is_err()
    {
        return false;
    }
    if irc
        .privmsg("NickServ", &format!("STATUS {}", nickname))
        .await
        .is_err()
    {
        return false;
    }

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;
        if let Some(Value::Bool(authed)) = store.varget(nickname, None, false) {
            return authed;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
    }
}

/// The NOTICE handler side of the probe.
pub struct UserAuth;

impl Module for UserAuth {
    fn name(&self) -> &'static str {
        "user_auth"
    }

    fn manifest(&self) -> Manifest {
        Manifest {
            irc_commands: &["NOTICE"],
            ..Manifest::default()
        }
    }

    fn call(self: Arc<Self>, ctx: Context) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            if ctx.nickname == "NickServ" {
                nickserv_notice(&ctx);
            }
            Ok(())
        })
    }
}

/// Resolves a pending probe from a NickServ NOTICE. ACC answers look like
/// `<nick> ACC 3`, STATUS answers like `STATUS <nick> 3`; level 3 means
/// logged in.
fn nickserv_notice(ctx: &Context) {
    let words: Vec<&str> = ctx.text.split_whitespace().collect();
    let authed = json!(words.last().map(|w| *w == "3").unwrap_or(false));

    match (words.first(), words.get(1)) {
        (Some(nick), Some(&"ACC")) if pending(ctx, nick) => {
            ctx.vars.varset(nick, authed);
        }
        (Some(&"STATUS"), Some(nick)) if pending(ctx, nick) => {
            ctx.vars.varset(nick, authed);
        }
        _ => {}
    }
}

fn pending(ctx: &Context, nick: &str) -> bool {
    ctx.vars.varget(nick, None, false) == Some(json!(PENDING))
}

#[cfg(test)]
mod test {
    use super::{nickserv_notice, PENDING};
    use crate::client::Client;
    use crate::config::test::{test_dir, test_document};
    use crate::config::ConfigStore;
    use crate::conn::Connection;
    use crate::modules::Context;
    use crate::vars::{Stores, VarMemory};
    use dbot_proto::Message;
    use serde_json::json;
    use std::sync::Arc;

    fn notice_ctx(memory: &VarMemory, text: &str) -> Context {
        let dir = test_dir("user-auth");
        let conf = Arc::new(ConfigStore::from_document(&dir, test_document()));
        let stores = Stores::open(&dir).unwrap();
        let (ours, _theirs) = tokio::io::duplex(64);
        let (client, _reader) = Client::new(Connection::mock(ours), conf.clone());
        let line = format!(":NickServ!ns@services NOTICE drastikbot :{}", text);
        Context {
            msg: Arc::new(Message::parse(&line).unwrap()),
            channel: "drastikbot".into(),
            nickname: "NickServ".into(),
            username: "ns".into(),
            hostname: "services".into(),
            text: text.to_owned(),
            args: String::new(),
            botcmd: None,
            cmd_prefix: '.',
            conf,
            vars: memory.scoped("user_auth"),
            memory: memory.clone(),
            stores,
            irc: client,
        }
    }

    #[test]
    fn acc_reply_resolves_pending_probe() {
        let memory = VarMemory::new();
        let store = memory.scoped("user_auth");
        store.varset("alice", json!(PENDING));

        nickserv_notice(&notice_ctx(&memory, "alice ACC 3"));
        assert_eq!(store.varget("alice", None, false), Some(json!(true)));
    }

    #[test]
    fn status_reply_can_deny() {
        let memory = VarMemory::new();
        let store = memory.scoped("user_auth");
        store.varset("bob", json!(PENDING));

        nickserv_notice(&notice_ctx(&memory, "STATUS bob 1"));
        assert_eq!(store.varget("bob", None, false), Some(json!(false)));
    }

    #[test]
    fn unsolicited_notices_are_ignored() {
        let memory = VarMemory::new();
        let store = memory.scoped("user_auth");

        nickserv_notice(&notice_ctx(&memory, "alice ACC 3"));
        assert_eq!(store.varget("alice", None, false), None);
    }
}
