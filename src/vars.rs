//! Variable memory and the shared key-value stores handed to modules.
//!
//! Variable memory is a process-wide map that outlives reconnects. Keys are
//! namespaced by the owning module; the dispatcher hands each module an
//! accessor already bound to its name, so no caller introspection is needed.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::Result;

/// The process-wide variable map.
#[derive(Clone, Default)]
pub struct VarMemory {
    inner: Arc<Mutex<HashMap<String, Value>>>,
}

impl VarMemory {
    pub fn new() -> VarMemory {
        VarMemory::default()
    }

    /// An accessor whose keys are namespaced under `module`.
    pub fn scoped(&self, module: &str) -> VarStore {
        VarStore {
            inner: self.inner.clone(),
            scope: module.to_owned(),
        }
    }
}

/// A module-bound view of the variable memory.
#[derive(Clone)]
pub struct VarStore {
    inner: Arc<Mutex<HashMap<String, Value>>>,
    scope: String,
}

impl VarStore {
    fn key(&self, name: &str, raw: bool) -> String {
        if raw {
            name.to_owned()
        } else {
            format!("{}:{}", self.scope, name)
        }
    }

    /// Stores a value under the module's namespace.
    pub fn varset(&self, name: &str, value: Value) {
        self.inner.lock().insert(self.key(name, false), value);
    }

    /// Fetches a value. With `raw` the name is looked up globally, which is
    /// how modules share state on purpose.
    pub fn varget(&self, name: &str, default: Option<Value>, raw: bool) -> Option<Value> {
        self.inner
            .lock()
            .get(&self.key(name, raw))
            .cloned()
            .or(default)
    }
}

/// The two SQLite stores modules receive: one in-memory, one on disk under
/// the configuration directory. Each is a single shared connection with
/// internal serialization.
#[derive(Clone)]
pub struct Stores {
    pub mem: Arc<Mutex<rusqlite::Connection>>,
    pub disk: Arc<Mutex<rusqlite::Connection>>,
}

impl Stores {
    pub fn open(confdir: &Path) -> Result<Stores> {
        let mem = rusqlite::Connection::open_in_memory()?;
        let disk = rusqlite::Connection::open(confdir.join("drastikbot.db"))?;
        Ok(Stores {
            mem: Arc::new(Mutex::new(mem)),
            disk: Arc::new(Mutex::new(disk)),
        })
    }
}
