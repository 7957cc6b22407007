//! Connection registration: capability negotiation, SASL PLAIN, nickname
//! collision fallback, NickServ recovery, and the channel auto-join.
//!
//! Registration is an ordinary module driven by the dispatcher; it declares
//! interest in the startup event and the handful of commands the exchange
//! consists of. Other modules see the same early messages and are expected
//! to treat the pre-connected phase as read-only.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;

use super::{Context, Manifest, Module, STARTUP};
use crate::error::Result;
use crate::state::{ConnState, SaslState};

/// The IRCv3 version sent with CAP LS.
const IRCV3_VERSION: &str = "302";

/// The capabilities the bot knows how to use.
const SUPPORTED_CAPS: &[&str] = &["sasl"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Init,
    WaitingCap,
    WaitingCapAck,
    Sasl,
    Connecting,
    Done,
}

pub struct Registration {
    phase: Mutex<Phase>,
}

impl Registration {
    pub fn new() -> Registration {
        Registration {
            phase: Mutex::new(Phase::Init),
        }
    }
}

impl Default for Registration {
    fn default() -> Registration {
        Registration::new()
    }
}

impl Module for Registration {
    fn name(&self) -> &'static str {
        "registration"
    }

    fn manifest(&self) -> Manifest {
        Manifest {
            irc_commands: &["CAP", "AUTHENTICATE", "903", "904", "433", "376"],
            bot_commands: &[],
            startup: true,
        }
    }

    fn call(self: Arc<Self>, ctx: Context) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move { self.handle(ctx).await })
    }
}

impl Registration {
    async fn handle(&self, ctx: Context) -> Result<()> {
        let phase = *self.phase.lock();
        match (ctx.msg.command.as_str(), phase) {
            (STARTUP, Phase::Init) => self.init(&ctx).await,
            ("CAP", Phase::WaitingCap) | ("CAP", Phase::WaitingCapAck) => self.cap(&ctx).await,
            ("AUTHENTICATE", Phase::Sasl) => self.authenticate(&ctx).await,
            ("903", Phase::Sasl) => self.sasl_success(&ctx).await,
            ("904", Phase::Sasl) => self.sasl_fail(&ctx).await,
            // A collision can happen at any point of the exchange.
            ("433", _) => self.err_nicknameinuse(&ctx).await,
            // Servers without CAP support jump straight to the MOTD, so the
            // end of it concludes registration from any phase; a MOTD
            // replayed after that is not a registration event.
            ("376", _) if ctx.irc.state().read().conn_state != ConnState::Connected => {
                self.rpl_endofmotd(&ctx).await
            }
            _ => Ok(()),
        }
    }

    async fn init(&self, ctx: &Context) -> Result<()> {
        let nickname = ctx.conf.nickname();
        {
            let mut state = ctx.irc.state().write();
            state.conn_state = ConnState::Registering;
            state.curr_nickname = nickname.clone();
        }
        *self.phase.lock() = Phase::WaitingCap;

        ctx.irc.send(&["CAP", "LS", IRCV3_VERSION], None).await?;
        ctx.irc
            .send(
                &["USER", &ctx.conf.username(), "0", "*"],
                Some(&ctx.conf.realname()),
            )
            .await?;
        ctx.irc.nick(&nickname).await
    }

    async fn cap(&self, ctx: &Context) -> Result<()> {
        let phase = *self.phase.lock();
        match (ctx.msg.params.get(1).map(String::as_str), phase) {
            (Some("LS"), Phase::WaitingCap) => self.cap_ls(ctx).await,
            (Some("ACK"), Phase::WaitingCapAck) => self.cap_ack(ctx).await,
            _ => Ok(()),
        }
    }

    async fn cap_ls(&self, ctx: &Context) -> Result<()> {
        let offered = ctx.msg.text().to_owned();
        let req: Vec<&str> = offered
            .split_whitespace()
            .filter(|c| SUPPORTED_CAPS.contains(c))
            .collect();

        // Nothing we support: end the negotiation here.
        if req.is_empty() {
            return self.cap_end(ctx).await;
        }

        *self.phase.lock() = Phase::WaitingCapAck;
        ctx.irc.send(&["CAP", "REQ"], Some(&req.join(" "))).await
    }

    async fn cap_ack(&self, ctx: &Context) -> Result<()> {
        let acked: Vec<String> = ctx
            .msg
            .text()
            .split_whitespace()
            .map(str::to_owned)
            .collect();
        let sasl_acked = acked.iter().any(|c| c == "sasl");
        ctx.irc.state().write().ircv3_enabled = acked.into_iter().collect();

        if ctx.conf.is_auth_method("sasl") && sasl_acked {
            *self.phase.lock() = Phase::Sasl;
            ctx.irc.state().write().sasl_state = SaslState::InProgress;
            ctx.irc.send(&["AUTHENTICATE", "PLAIN"], None).await
        } else {
            self.cap_end(ctx).await
        }
    }

    async fn authenticate(&self, ctx: &Context) -> Result<()> {
        if ctx.msg.params.first().map(String::as_str) != Some("+") {
            return Ok(());
        }
        let user = ctx.conf.username();
        let password = ctx.conf.auth_password();
        let payload = BASE64.encode(format!("{}\0{}\0{}", user, user, password));
        ctx.irc.send(&["AUTHENTICATE", &payload], None).await
    }

    async fn sasl_success(&self, ctx: &Context) -> Result<()> {
        ctx.irc.state().write().sasl_state = SaslState::Success;
        self.cap_end(ctx).await
    }

    async fn sasl_fail(&self, ctx: &Context) -> Result<()> {
        log::warn!("! SASL authentication failed.");
        ctx.irc.state().write().sasl_state = SaslState::Fail;
        self.cap_end(ctx).await
    }

    async fn cap_end(&self, ctx: &Context) -> Result<()> {
        *self.phase.lock() = Phase::Connecting;
        ctx.irc.send(&["CAP", "END"], None).await
    }

    async fn err_nicknameinuse(&self, ctx: &Context) -> Result<()> {
        let fallback = {
            let mut state = ctx.irc.state().write();
            state.curr_nickname.push('_');
            state.alt_nickname = true;
            state.curr_nickname.clone()
        };
        ctx.irc.nick(&fallback).await
    }

    async fn rpl_endofmotd(&self, ctx: &Context) -> Result<()> {
        let nickname = ctx.conf.nickname();
        let password = ctx.conf.auth_password();
        let auth = ctx.conf.authentication();
        let alt_nickname = ctx.irc.state().read().alt_nickname;

        if alt_nickname && !auth.is_empty() {
            // The configured nickname is taken, probably by a ghost of a
            // previous session.
            ctx.irc
                .privmsg("NickServ", &format!("GHOST {} {}", nickname, password))
                .await?;
            ctx.irc
                .privmsg("NickServ", &format!("RECOVER {} {}", nickname, password))
                .await?;
        } else if auth == "nickserv" {
            ctx.irc
                .privmsg("NickServ", &format!("IDENTIFY {} {}", nickname, password))
                .await?;
        }

        {
            let mut state = ctx.irc.state().write();
            state.conn_state = ConnState::Connected;
        }
        *self.phase.lock() = Phase::Done;

        ctx.irc.join(&ctx.conf.channels()).await
    }
}

#[cfg(test)]
mod test {
    use super::Registration;
    use crate::client::Client;
    use crate::config::test::{test_dir, test_document};
    use crate::config::ConfigStore;
    use crate::conn::Connection;
    use crate::modules::{Context, Module, STARTUP};
    use crate::state::{ConnState, SaslState};
    use crate::vars::{Stores, VarMemory};
    use dbot_proto::{LineCodec, Message};
    use futures_util::{SinkExt, StreamExt};
    use std::sync::Arc;
    use tokio_util::codec::{Decoder, Framed};

    struct Harness {
        reg: Arc<Registration>,
        client: Arc<Client>,
        server: Framed<tokio::io::DuplexStream, LineCodec>,
        conf: Arc<ConfigStore>,
        stores: Stores,
        memory: VarMemory,
    }

    fn harness(doc: crate::config::Document) -> Harness {
        let dir = test_dir("registration");
        let conf = Arc::new(ConfigStore::from_document(&dir, doc));
        let stores = Stores::open(&dir).unwrap();
        let (ours, theirs) = tokio::io::duplex(4096);
        let (client, _reader) = Client::new(Connection::mock(ours), conf.clone());
        Harness {
            reg: Arc::new(Registration::new()),
            client,
            server: LineCodec::new().framed(theirs),
            conf,
            stores,
            memory: VarMemory::new(),
        }
    }

    impl Harness {
        fn context(&self, msg: Message) -> Context {
            Context {
                msg: Arc::new(msg),
                channel: String::new(),
                nickname: String::new(),
                username: String::new(),
                hostname: String::new(),
                text: String::new(),
                args: String::new(),
                botcmd: None,
                cmd_prefix: '.',
                conf: self.conf.clone(),
                vars: self.memory.scoped("registration"),
                memory: self.memory.clone(),
                stores: self.stores.clone(),
                irc: self.client.clone(),
            }
        }

        async fn feed(&mut self, line: &str) {
            let ctx = self.context(Message::parse(line).unwrap());
            self.reg.clone().call(ctx).await.unwrap();
        }

        async fn startup(&mut self) {
            let ctx = self.context(Message::new(None, STARTUP, vec![]));
            self.reg.clone().call(ctx).await.unwrap();
        }

        async fn sent(&mut self) -> String {
            self.server.next().await.unwrap().unwrap()
        }
    }

    #[tokio::test]
    async fn sasl_happy_path() {
        let mut h = harness(test_document());

        h.startup().await;
        assert_eq!(h.sent().await, "CAP LS 302");
        assert_eq!(h.sent().await, "USER drastikbot 0 * :drastikbot");
        assert_eq!(h.sent().await, "NICK drastikbot");

        h.feed(":s CAP * LS :sasl multi-prefix").await;
        assert_eq!(h.sent().await, "CAP REQ :sasl");

        h.feed(":s CAP * ACK :sasl").await;
        assert_eq!(h.sent().await, "AUTHENTICATE PLAIN");
        assert_eq!(
            h.client.state().read().sasl_state,
            SaslState::InProgress
        );

        h.feed("AUTHENTICATE +").await;
        // base64("drastikbot\0drastikbot\0pw")
        assert_eq!(
            h.sent().await,
            "AUTHENTICATE ZHJhc3Rpa2JvdABkcmFzdGlrYm90AHB3"
        );

        h.feed(":s 903 drastikbot :ok").await;
        assert_eq!(h.sent().await, "CAP END");

        h.feed(":s 376 drastikbot :end").await;
        assert_eq!(h.sent().await, "JOIN #test");

        let state = h.client.state().read();
        assert_eq!(state.conn_state, ConnState::Connected);
        assert_eq!(state.sasl_state, SaslState::Success);
    }

    #[tokio::test]
    async fn sasl_failure_proceeds_without_auth() {
        let mut h = harness(test_document());
        h.startup().await;
        for _ in 0..3 {
            h.sent().await;
        }
        h.feed(":s CAP * LS :sasl").await;
        h.sent().await;
        h.feed(":s CAP * ACK :sasl").await;
        h.sent().await;
        h.feed(":s 904 drastikbot :failed").await;
        assert_eq!(h.sent().await, "CAP END");
        assert_eq!(h.client.state().read().sasl_state, SaslState::Fail);
    }

    #[tokio::test]
    async fn no_common_capability_ends_negotiation() {
        let mut h = harness(test_document());
        h.startup().await;
        for _ in 0..3 {
            h.sent().await;
        }
        h.feed(":s CAP * LS :multi-prefix away-notify").await;
        assert_eq!(h.sent().await, "CAP END");
    }

    #[tokio::test]
    async fn nick_collision_falls_back_and_recovers() {
        let mut doc = test_document();
        doc.irc.connection.nickname = "bob".into();
        doc.irc.connection.authentication = "nickserv".into();
        let mut h = harness(doc);

        h.startup().await;
        for _ in 0..3 {
            h.sent().await;
        }

        h.feed(":s 433 * bob :Nickname is already in use.").await;
        assert_eq!(h.sent().await, "NICK bob_");
        assert!(h.client.state().read().alt_nickname);
        assert_eq!(h.client.state().read().curr_nickname, "bob_");

        h.feed(":s 376 bob_ :end").await;
        assert_eq!(h.sent().await, "PRIVMSG NickServ :GHOST bob pw");
        assert_eq!(h.sent().await, "PRIVMSG NickServ :RECOVER bob pw");
        assert_eq!(h.sent().await, "JOIN #test");
    }

    #[tokio::test]
    async fn nickserv_identify_without_collision() {
        let mut doc = test_document();
        doc.irc.connection.authentication = "nickserv".into();
        let mut h = harness(doc);

        h.startup().await;
        for _ in 0..3 {
            h.sent().await;
        }
        h.feed(":s 376 drastikbot :end").await;
        assert_eq!(
            h.sent().await,
            "PRIVMSG NickServ :IDENTIFY drastikbot pw"
        );
        assert_eq!(h.sent().await, "JOIN #test");
    }
}
