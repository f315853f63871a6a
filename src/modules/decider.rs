//! Slow-query reporting decision.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// Table allow-list entry: a specific table or every table in a keyspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableSelector {
    Table { keyspace: String, table: String },
    Keyspace(String),
}

impl TableSelector {
    /// Parse `"keyspace.table"` or `"keyspace.*"`.
    pub fn parse(entry: &str) -> Option<Self> {
        let (keyspace, table) = entry.trim().split_once('.')?;
        if keyspace.is_empty() || table.is_empty() {
            return None;
        }
        if table == "*" {
            Some(Self::Keyspace(keyspace.to_string()))
        } else {
            Some(Self::Table { keyspace: keyspace.to_string(), table: table.to_string() })
        }
    }
}

/// Decides whether an executed query is slow enough, and on a watched table.
///
/// The threshold is read on every query and may be retuned at runtime, so it
/// lives in an atomic rather than behind a lock.
#[derive(Debug)]
pub struct SlowQueryDecider {
    threshold_micros: AtomicU64,
    tables: HashSet<(String, String)>,
    keyspaces: HashSet<String>,
}

impl SlowQueryDecider {
    /// An empty `selectors` list means every table is watched.
    pub fn new(threshold_micros: u64, selectors: impl IntoIterator<Item = TableSelector>) -> Self {
        let mut tables = HashSet::new();
        let mut keyspaces = HashSet::new();
        for selector in selectors {
            match selector {
                TableSelector::Table { keyspace, table } => {
                    tables.insert((keyspace, table));
                }
                TableSelector::Keyspace(keyspace) => {
                    keyspaces.insert(keyspace);
                }
            }
        }
        Self { threshold_micros: AtomicU64::new(threshold_micros), tables, keyspaces }
    }

    pub fn threshold_micros(&self) -> u64 {
        self.threshold_micros.load(Ordering::Relaxed)
    }

    pub fn set_threshold_micros(&self, threshold_micros: u64) {
        self.threshold_micros.store(threshold_micros, Ordering::Relaxed);
        tracing::info!(threshold_micros, "slow query threshold updated");
    }

    pub fn threshold_millis(&self) -> u64 {
        self.threshold_micros() / 1_000
    }

    pub fn set_threshold_millis(&self, threshold_millis: u64) {
        self.set_threshold_micros(threshold_millis.saturating_mul(1_000));
    }

    fn has_allow_list(&self) -> bool {
        !self.tables.is_empty() || !self.keyspaces.is_empty()
    }

    fn is_watched(&self, keyspace: &str, table: &str) -> bool {
        if self.keyspaces.contains(keyspace) {
            return true;
        }
        self.tables.contains(&(keyspace.to_string(), table.to_string()))
    }

    /// Reportable iff the duration reaches the threshold (inclusive) and the
    /// table is watched.
    pub fn should_report(&self, execution_duration_micros: u64, keyspace: &str, table: &str) -> bool {
        if execution_duration_micros < self.threshold_micros() {
            return false;
        }
        !self.has_allow_list() || self.is_watched(keyspace, table)
    }
}
