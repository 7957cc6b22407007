//! Process entry point: argument parsing, configuration checks, logger
//! setup, and the runtime.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use flexi_logger::{Duplicate, FileSpec, Logger};

use drastikbot::config::ConfigStore;
use drastikbot::supervisor::Supervisor;
use drastikbot::vars::Stores;

#[derive(Parser)]
#[command(name = "drastikbot", version, about = "An IRC bot focused on its module system")]
struct Opts {
    /// The configuration directory
    #[arg(short = 'c', long = "confdir", value_name = "DIR")]
    confdir: Option<PathBuf>,

    /// Developer mode: debug logging, modules reimported on every dispatch
    #[arg(short = 'd', long = "dev")]
    dev: bool,
}

fn default_confdir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".drastikbot"),
        None => PathBuf::from(".drastikbot"),
    }
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let opts = Opts::parse();
    let confdir = opts.confdir.unwrap_or_else(default_confdir);

    if let Err(e) = fs::create_dir_all(&confdir) {
        eprintln!(
            "[Error] Cannot create config directory {}: {}",
            confdir.display(),
            e
        );
        return 1;
    }

    let conf = match ConfigStore::open(&confdir) {
        Ok(conf) => conf,
        Err(e) => {
            eprintln!("[Error] {}", e);
            return 1;
        }
    };

    let log_dir = conf.log_dir();
    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!("[Error] Cannot create log directory {}: {}", log_dir.display(), e);
        return 1;
    }
    let log_level = if opts.dev {
        "debug".to_owned()
    } else {
        conf.log_level()
    };
    let _logger = match Logger::try_with_str(&log_level).and_then(|l| {
        l.log_to_file(FileSpec::default().directory(&log_dir).basename("runtime"))
            .duplicate_to_stderr(Duplicate::All)
            .start()
    }) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("[Error] Cannot start logger: {}", e);
            return 1;
        }
    };

    log::info!("Drastikbot: Starting...");

    if let Err(e) = conf.acl_purge_expired(Utc::now().timestamp()) {
        log::warn!("Could not purge expired user ACL entries: {}", e);
    }

    let stores = match Stores::open(&confdir) {
        Ok(stores) => stores,
        Err(e) => {
            log::error!("Cannot open the bot databases: {}", e);
            return 1;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Cannot start the runtime: {}", e);
            return 1;
        }
    };

    let supervisor = Supervisor::new(Arc::new(conf), stores, opts.dev);
    runtime.block_on(supervisor.run())
}
