//! drastikbot: a long-lived IRC client agent built around an extensible
//! module dispatcher.
//!
//! The crate is organized the way the process runs: the [`supervisor`]
//! opens a [`conn::Connection`] and reads lines, [`dbot_proto`] parses
//! them, [`state`] applies membership effects, and the [`dispatch`]er fans
//! each message out to [`modules`] over a bounded worker pool, gated by the
//! [`acl`] and the channel lists in [`config`]. Modules answer through the
//! [`client::Client`] handle, whose writer enforces the 512-byte line rule.

pub mod acl;
pub mod client;
pub mod config;
pub mod conn;
pub mod dispatch;
pub mod error;
pub mod modules;
pub mod state;
pub mod supervisor;
pub mod vars;
