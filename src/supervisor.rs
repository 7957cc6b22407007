//! The composition root: owns the connect/backoff loop, drives the read
//! task, and handles signals.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use dbot_proto::Message;

use crate::client::Client;
use crate::config::ConfigStore;
use crate::conn::{next_backoff, Connection};
use crate::dispatch::Dispatcher;
use crate::state::{ConnState, StateAction};
use crate::vars::{Stores, VarMemory};

/// Sockets idle longer than this are considered dead. Servers ping well
/// within it.
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// How long in-flight handlers get to finish after a shutdown is requested.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

enum SessionEnd {
    /// The user asked the bot to quit.
    Quit,
    /// The connection died; reconnect.
    Lost,
}

/// The long-lived bot process. Configuration and variable memory outlive
/// sessions; everything else is rebuilt on reconnect.
pub struct Supervisor {
    conf: Arc<ConfigStore>,
    memory: VarMemory,
    stores: Stores,
    dev: bool,
}

impl Supervisor {
    pub fn new(conf: Arc<ConfigStore>, stores: Stores, dev: bool) -> Supervisor {
        Supervisor {
            conf,
            memory: VarMemory::new(),
            stores,
            dev,
        }
    }

    /// Runs until a clean shutdown. Returns the process exit code.
    pub async fn run(&self) -> i32 {
        let mut delay: u64 = 0;
        loop {
            if delay > 0 {
                log::info!(" - Retrying in {} seconds", delay);
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }

            let conn = match Connection::new(&self.conf).await {
                Ok(conn) => conn,
                Err(e) => {
                    log::info!(" - Connection failed: {}", e);
                    delay = next_backoff(delay);
                    continue;
                }
            };

            // A session was established; the next outage backs off afresh.
            delay = 0;
            match self.session(conn).await {
                SessionEnd::Quit => return 0,
                SessionEnd::Lost => {
                    log::info!("[INFO] Connection lost");
                    delay = next_backoff(delay);
                }
            }
        }
    }

    /// One connection's lifetime: registration, then the read loop until
    /// the socket dies or the user interrupts.
    async fn session(&self, conn: Connection) -> SessionEnd {
        let (client, mut stream) = Client::new(conn, self.conf.clone());
        let dispatcher = Dispatcher::new(
            self.conf.clone(),
            self.memory.clone(),
            self.stores.clone(),
            self.dev,
        );

        // A password-protected network wants PASS before anything else.
        if let Some(password) = self.conf.net_password() {
            if client.send(&["PASS", &password], None).await.is_err() {
                return SessionEnd::Lost;
            }
        }

        dispatcher.startup(&client);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    return self.shutdown(&client).await;
                }
                read = tokio::time::timeout(READ_TIMEOUT, stream.next()) => match read {
                    Err(_) => {
                        log::info!("[INFO] Read timed out");
                        return SessionEnd::Lost;
                    }
                    Ok(None) => return SessionEnd::Lost,
                    Ok(Some(Err(e))) => {
                        log::debug!("Read error: {}", e);
                        return SessionEnd::Lost;
                    }
                    Ok(Some(Ok(line))) => {
                        if line.is_empty() {
                            continue;
                        }
                        self.handle_line(&line, &client, &dispatcher).await;
                    }
                }
            }
        }
    }

    /// Parses one line, applies its membership effects on this task so
    /// workers see consistent snapshots, and fans it out.
    async fn handle_line(&self, line: &str, client: &Arc<Client>, dispatcher: &Dispatcher) {
        log::debug!("{}", line);
        let msg = match Message::parse(line) {
            Ok(msg) => msg,
            Err(e) => {
                log::debug!("Dropping unparseable line ({}): {}", e, line);
                return;
            }
        };

        let action = client.state().write().apply(&msg);
        if let Some(StateAction::QueryNames(channel)) = action {
            if let Err(e) = client.names_query(&channel).await {
                log::debug!("NAMES resync failed: {}", e);
            }
        }

        dispatcher.dispatch(Arc::new(msg), client);
    }

    /// First interrupt: announce, QUIT, drain briefly, exit cleanly. A
    /// second interrupt during the drain force-exits.
    async fn shutdown(&self, client: &Arc<Client>) -> SessionEnd {
        log::info!("Interrupt received: quitting");
        tokio::spawn(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Forced exit");
                std::process::exit(2);
            }
        });

        client.state().write().conn_state = ConnState::Disconnected;
        if let Err(e) = client.quit(None).await {
            log::debug!("QUIT failed: {}", e);
        }
        tokio::time::sleep(DRAIN_GRACE).await;
        SessionEnd::Quit
    }
}
