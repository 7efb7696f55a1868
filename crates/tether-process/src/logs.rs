use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tether_core::ids::AppId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Where a console entry came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Server,
    Client,
    Build,
    Network,
    Edge,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    pub app_id: AppId,
    pub level: LogLevel,
    pub kind: LogKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Position in the store, assigned by [`LogStore::add`]. Strictly
    /// increasing across all apps of one store.
    #[serde(default)]
    pub seq: u64,
}

impl ConsoleEntry {
    pub fn new(app_id: AppId, level: LogLevel, kind: LogKind, message: impl Into<String>) -> Self {
        Self {
            app_id,
            level,
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            seq: 0,
        }
    }
}

/// Per-app console history. Each app keeps at most `max_per_app` entries;
/// the oldest is evicted first.
#[derive(Clone)]
pub struct LogStore {
    entries: Arc<DashMap<AppId, VecDeque<ConsoleEntry>>>,
    max_per_app: usize,
    next_seq: Arc<AtomicU64>,
}

impl LogStore {
    pub fn new(max_per_app: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            max_per_app: max_per_app.max(1),
            next_seq: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn add(&self, mut entry: ConsoleEntry) {
        let mut logs = self.entries.entry(entry.app_id).or_default();
        entry.seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        logs.push_back(entry);
        while logs.len() > self.max_per_app {
            logs.pop_front();
        }
    }

    pub fn logs(&self, app_id: AppId) -> Vec<ConsoleEntry> {
        self.entries
            .get(&app_id)
            .map(|logs| logs.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Entries of `app_id` added after the entry numbered `after_seq`.
    pub fn logs_since(&self, app_id: AppId, after_seq: u64) -> Vec<ConsoleEntry> {
        self.entries
            .get(&app_id)
            .map(|logs| logs.iter().filter(|e| e.seq > after_seq).cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self, app_id: AppId) {
        self.entries.remove(&app_id);
    }
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new(1_000)
    }
}
