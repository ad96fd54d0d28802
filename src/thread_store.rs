//! Parser-scoped store of raw thread rows, keyed by dump name then thread name.
//!
//! This is the only input the long-running matcher needs. It outlives the
//! individual dumps: a session keeps it after the parser is gone.

use std::collections::HashMap;

use serde::Serialize;

use crate::thread::{ThreadInfo, ThreadState};
use crate::tokens::ThreadTokens;

/// Raw fields of one thread as seen in one dump.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadRow {
    pub title: String,
    pub tokens: ThreadTokens,
    pub state: ThreadState,
    pub content: String,
}

impl From<&ThreadInfo> for ThreadRow {
    fn from(thread: &ThreadInfo) -> Self {
        Self {
            title: thread.title.clone(),
            tokens: thread.tokens.clone(),
            state: thread.state,
            content: thread.content.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct DumpRows {
    order: Vec<String>,
    rows: HashMap<String, ThreadRow>,
}

#[derive(Debug, Default)]
pub struct ThreadStore {
    dumps: Vec<String>,
    rows: HashMap<String, DumpRows>,
}

impl ThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dump. Registering the same name again is a no-op.
    pub fn begin_dump(&mut self, dump: &str) {
        if !self.rows.contains_key(dump) {
            self.dumps.push(dump.to_string());
            self.rows.insert(dump.to_string(), DumpRows::default());
        }
    }

    /// Record a thread row. The first row for a given name within a dump wins.
    pub fn insert(&mut self, dump: &str, row: ThreadRow) -> bool {
        self.begin_dump(dump);
        let Some(entry) = self.rows.get_mut(dump) else {
            return false;
        };
        let name = row.tokens.name.clone();
        if entry.rows.contains_key(&name) {
            log::debug!("duplicate thread name '{name}' in {dump}, keeping the first");
            return false;
        }
        entry.order.push(name.clone());
        entry.rows.insert(name, row);
        true
    }

    pub fn get(&self, dump: &str, thread: &str) -> Option<&ThreadRow> {
        self.rows.get(dump)?.rows.get(thread)
    }

    /// Thread names of a dump in insertion order.
    pub fn thread_names(&self, dump: &str) -> &[String] {
        self.rows
            .get(dump)
            .map(|entry| entry.order.as_slice())
            .unwrap_or_default()
    }

    /// Dump names in registration order.
    pub fn dump_names(&self) -> &[String] {
        &self.dumps
    }

    pub fn contains_dump(&self, dump: &str) -> bool {
        self.rows.contains_key(dump)
    }

    pub fn len(&self) -> usize {
        self.dumps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dumps.is_empty()
    }

    pub fn clear(&mut self) {
        self.dumps.clear();
        self.rows.clear();
    }

    /// Move every dump of `other` into this store. A dump name that is
    /// already present keeps its existing rows.
    pub fn merge(&mut self, other: ThreadStore) {
        let ThreadStore { dumps, mut rows } = other;
        for dump in dumps {
            let Some(entry) = rows.remove(&dump) else {
                continue;
            };
            if self.rows.contains_key(&dump) {
                log::warn!("thread store already holds '{dump}', dropping the new rows");
                continue;
            }
            self.dumps.push(dump.clone());
            self.rows.insert(dump, entry);
        }
    }
}
