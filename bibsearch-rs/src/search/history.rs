//! Bounded, most-recent-first history of executed searches.

use crate::config::{HistoryConfig, DEFAULT_HISTORY_CAPACITY};
use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One remembered search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHistoryEntry {
    pub query: String,
    /// Local time of the last search, `YYYY-MM-DD HH:MM:SS`.
    pub last_searched: String,
}

/// Process-wide history shared by every open bibliography.
static GLOBAL_HISTORY: Lazy<SearchHistory> = Lazy::new(SearchHistory::new);

/// LRU list of search strings, keyed case-insensitively.
///
/// Safe to share between threads; every operation takes a short lock.
#[derive(Debug)]
pub struct SearchHistory {
    capacity: usize,
    entries: Mutex<VecDeque<SearchHistoryEntry>>,
}

impl Default for SearchHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchHistory {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// A capacity of zero is raised to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn from_config(config: &HistoryConfig) -> Self {
        Self::with_capacity(config.capacity)
    }

    /// The session-wide history.
    pub fn global() -> &'static SearchHistory {
        &GLOBAL_HISTORY
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record a search now. Blank queries are ignored.
    pub fn add_search(&self, query: &str) {
        self.add_search_at(query, Local::now());
    }

    /// Record a search at a given time.
    ///
    /// An existing entry with the same query (ignoring case) is moved to the
    /// front with the new timestamp; its stored spelling is replaced by the
    /// latest one.
    pub fn add_search_at(&self, query: &str, at: DateTime<Local>) {
        let query = query.trim();
        if query.is_empty() {
            return;
        }

        let mut entries = self.entries.lock();
        if let Some(pos) = position(&entries, query) {
            entries.remove(pos);
        }
        entries.push_front(SearchHistoryEntry {
            query: query.to_string(),
            last_searched: at.format(TIMESTAMP_FORMAT).to_string(),
        });
        while entries.len() > self.capacity {
            if let Some(evicted) = entries.pop_back() {
                tracing::trace!(query = %evicted.query, "evicted from search history");
            }
        }
    }

    /// Remove an entry by query (ignoring case). Returns whether one existed.
    pub fn remove(&self, query: &str) -> bool {
        let mut entries = self.entries.lock();
        match position(&entries, query.trim()) {
            Some(pos) => {
                entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Snapshot of the history, most recent first.
    pub fn get_history(&self) -> Vec<SearchHistoryEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

fn position(entries: &VecDeque<SearchHistoryEntry>, query: &str) -> Option<usize> {
    let key = query.to_lowercase();
    entries.iter().position(|e| e.query.to_lowercase() == key)
}
