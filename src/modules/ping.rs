//! Replies to PING messages from the server.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use super::{Context, Manifest, Module};
use crate::error::Result;

pub struct Ping;

impl Module for Ping {
    fn name(&self) -> &'static str {
        "ping"
    }

    fn manifest(&self) -> Manifest {
        Manifest {
            irc_commands: &["PING"],
            ..Manifest::default()
        }
    }

    fn call(self: Arc<Self>, ctx: Context) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move { ctx.irc.pong(&ctx.msg.params.join(" ")).await })
    }
}
