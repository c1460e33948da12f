//! Cache state: the query index and table index from the data model, and
//! the read/write paths Stash drives them through.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::executor::{ResultFormat, Rows};
use crate::pg::types::PgValue;

/// One cached result for a specific canonical query + parameter set.
#[derive(Clone)]
pub struct Entry {
    pub result: Rows,
    pub params: Vec<PgValue>,
    pub result_format: ResultFormat,
    pub popularity: u64,
    pub used: Instant,
    pub stale: Option<Instant>,
}

/// A query queued for background refill: its canonical text, the exact
/// parameters and result format of the stale entry being refreshed.
pub struct RefillJob {
    pub query: String,
    pub key: String,
    pub params: Vec<PgValue>,
    pub format: ResultFormat,
}

struct Maps {
    // canonical query -> (parameter key -> entry)
    queries: HashMap<String, HashMap<String, Entry>>,
    // table name -> set of canonical queries that read it
    tables: HashMap<String, HashSet<String>>,
}

/// Shared cache state: the query index, table index, and single lock
/// guarding both together so a write's invalidation and a read's insert
/// never observe a torn update. Snapshot-then-release-then-reacquire is
/// used where a scan would otherwise hold the lock across an await point;
/// nothing here is held reentrantly.
pub struct CacheState {
    maps: RwLock<Maps>,
    launched: AtomicBool,
    shutdown: RwLock<Option<CancellationToken>>,
}

/// Builds an unambiguous key from a parameter list: `Debug` already
/// distinguishes types (e.g. `Text("1")` vs `Int4(1)`), so joining with a
/// separator byte that cannot appear in a `Debug` rendering is enough.
pub fn params_key(params: &[PgValue]) -> String {
    params
        .iter()
        .map(|p| format!("{p:?}"))
        .collect::<Vec<_>>()
        .join("\u{1}")
}

impl CacheState {
    pub fn new() -> Self {
        Self {
            maps: RwLock::new(Maps {
                queries: HashMap::new(),
                tables: HashMap::new(),
            }),
            launched: AtomicBool::new(false),
            shutdown: RwLock::new(None),
        }
    }

    /// Claims the single allowed launch of this cache's background tasks.
    /// Returns `false` if something already launched it.
    pub fn try_launch(&self) -> bool {
        self.launched
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Records the cancellation token driving this cache's background
    /// tasks, so `shutdown` has something to cancel later. Only ever called
    /// once, right after a successful `try_launch`.
    pub fn set_shutdown_token(&self, token: CancellationToken) {
        *self.shutdown.write() = Some(token);
    }

    /// Stops the background cap/retirement/refill tasks, if this cache ever
    /// launched them. A no-op on a cache that was never started.
    pub fn shutdown(&self) {
        if let Some(token) = self.shutdown.read().as_ref() {
            token.cancel();
        }
    }

    /// A live, non-stale hit. Bumps popularity and last-used time.
    pub fn hit(&self, query: &str, key: &str) -> Option<Rows> {
        let mut maps = self.maps.write();
        let entry = maps.queries.get_mut(query)?.get_mut(key)?;
        if entry.stale.is_some() {
            return None;
        }
        entry.popularity += 1;
        entry.used = Instant::now();
        Some(Arc::clone(&entry.result))
    }

    /// Records a fresh read result and indexes it under every table it
    /// references.
    pub fn insert(&self, query: &str, key: &str, entry: Entry, read_tables: &[String]) {
        let mut maps = self.maps.write();
        for table in read_tables {
            maps.tables
                .entry(table.clone())
                .or_default()
                .insert(query.to_string());
        }
        maps.queries
            .entry(query.to_string())
            .or_default()
            .insert(key.to_string(), entry);
    }

    /// Marks every cached entry for the given tables stale. Readers keep
    /// getting served until a background refill (or a fresh miss) replaces
    /// the entry; they just stop being cache hits.
    pub fn invalidate_tables(&self, tables: &[String]) {
        let mut guard = self.maps.write();
        let Maps { queries, tables: table_index } = &mut *guard;
        let now = Instant::now();
        for table in tables {
            let Some(affected_queries) = table_index.get(table) else {
                continue;
            };
            for query in affected_queries {
                if let Some(per_query) = queries.get_mut(query) {
                    for entry in per_query.values_mut() {
                        entry.stale = Some(now);
                    }
                }
            }
        }
    }

    pub fn total_entries(&self) -> usize {
        self.maps.read().queries.values().map(|m| m.len()).sum()
    }

    /// Evicts the least-recently-used entries until the total is at or
    /// under `cap`. Removing a query's last entry drops the query entirely;
    /// its table-index rows are left in place and simply point at nothing,
    /// which `invalidate_tables` tolerates.
    pub fn enforce_cap(&self, cap: usize) {
        let mut maps = self.maps.write();
        loop {
            let total: usize = maps.queries.values().map(|m| m.len()).sum();
            if total <= cap {
                return;
            }
            let oldest = maps
                .queries
                .iter()
                .flat_map(|(q, per_query)| per_query.iter().map(move |(k, e)| (q.clone(), k.clone(), e.used)))
                .min_by_key(|(_, _, used)| *used);
            let Some((query, key, _)) = oldest else {
                return;
            };
            if let Some(per_query) = maps.queries.get_mut(&query) {
                per_query.remove(&key);
                if per_query.is_empty() {
                    maps.queries.remove(&query);
                }
            }
        }
    }

    /// Drops entries that haven't been used within `max_age`.
    pub fn retire(&self, max_age: Duration) {
        let mut maps = self.maps.write();
        let now = Instant::now();
        let mut emptied = Vec::new();
        for (query, per_query) in maps.queries.iter_mut() {
            per_query.retain(|_, entry| now.saturating_duration_since(entry.used) < max_age);
            if per_query.is_empty() {
                emptied.push(query.clone());
            }
        }
        for query in emptied {
            maps.queries.remove(&query);
        }
    }

    /// Stale entries ready to be refilled (stale for at least
    /// `refill_delay`), most-popular query first.
    pub fn stale_candidates(&self, refill_delay: Duration) -> Vec<RefillJob> {
        let maps = self.maps.read();
        let now = Instant::now();

        let mut popularity: Vec<(&String, u64)> = maps
            .queries
            .iter()
            .map(|(q, per_query)| (q, per_query.values().map(|e| e.popularity).sum()))
            .collect();
        popularity.sort_by(|a, b| b.1.cmp(&a.1));

        let mut jobs = Vec::new();
        for (query, _) in popularity {
            let per_query = &maps.queries[query];
            for (key, entry) in per_query.iter() {
                let Some(stale_at) = entry.stale else { continue };
                if now.saturating_duration_since(stale_at) >= refill_delay {
                    jobs.push(RefillJob {
                        query: query.clone(),
                        key: key.clone(),
                        params: entry.params.clone(),
                        format: entry.result_format,
                    });
                }
            }
        }
        jobs
    }

    /// Writes a refreshed result back and clears staleness. A no-op if the
    /// entry was retired or capped out from under the refill.
    pub fn write_back(&self, query: &str, key: &str, rows: Rows) {
        let mut maps = self.maps.write();
        if let Some(entry) = maps.queries.get_mut(query).and_then(|m| m.get_mut(key)) {
            entry.result = rows;
            entry.stale = None;
        }
    }
}

impl Default for CacheState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(rows: Vec<crate::executor::Row>) -> Entry {
        Entry {
            result: Arc::new(rows),
            params: vec![],
            result_format: ResultFormat::Binary,
            popularity: 1,
            used: Instant::now(),
            stale: None,
        }
    }

    #[test]
    fn hit_requires_non_stale_entry() {
        let cache = CacheState::new();
        cache.insert("SELECT * FROM book", "", entry(vec![]), &["book".to_string()]);
        assert!(cache.hit("SELECT * FROM book", "").is_some());

        cache.invalidate_tables(&["book".to_string()]);
        assert!(cache.hit("SELECT * FROM book", "").is_none());
    }

    #[test]
    fn invalidate_only_touches_indexed_tables() {
        let cache = CacheState::new();
        cache.insert("SELECT * FROM book", "", entry(vec![]), &["book".to_string()]);
        cache.invalidate_tables(&["author".to_string()]);
        assert!(cache.hit("SELECT * FROM book", "").is_some());
    }

    #[test]
    fn enforce_cap_evicts_least_recently_used() {
        let cache = CacheState::new();
        let mut old = entry(vec![]);
        old.used = Instant::now() - Duration::from_secs(10);
        cache.insert("SELECT 1", "", old, &[]);
        cache.insert("SELECT 2", "", entry(vec![]), &[]);

        cache.enforce_cap(1);

        assert_eq!(cache.total_entries(), 1);
        assert!(cache.hit("SELECT 2", "").is_some());
        assert!(cache.hit("SELECT 1", "").is_none());
    }

    #[test]
    fn try_launch_is_single_use() {
        let cache = CacheState::new();
        assert!(cache.try_launch());
        assert!(!cache.try_launch());
    }
}
