//! Stash: a table-invalidated result cache. Reads are served from cache
//! when a live entry exists; writes invalidate every cached read that
//! touched the tables they affect. A background worker pool refills stale
//! entries, retires unused ones, and caps total cache size.

pub mod background;
pub mod cache;
mod classifier;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::{PgRelayError, Result};
use crate::executor::{Executor, ResultFormat, Rows, Sql};
use crate::pg::types::PgValue;

use cache::{CacheState, Entry};

/// Tuning knobs for the cache's background maintenance. Setting an
/// `*_interval` to `None` disables that task entirely.
#[derive(Clone)]
pub struct StashConfig {
    pub cap: usize,
    pub cap_interval: Option<Duration>,
    pub retire: Duration,
    pub retire_interval: Option<Duration>,
    pub refill_delay: Duration,
    pub refill_interval: Option<Duration>,
    pub workers: usize,
    pub queue_bound: usize,
}

impl Default for StashConfig {
    fn default() -> Self {
        Self {
            cap: 10_000,
            cap_interval: Some(Duration::from_secs(60)),
            retire: Duration::from_secs(15 * 60),
            retire_interval: Some(Duration::from_secs(60)),
            refill_delay: Duration::from_secs(0),
            refill_interval: Some(Duration::from_secs(16)),
            workers: 4,
            queue_bound: 128,
        }
    }
}

/// A table-invalidated read cache in front of `inner`. Clones created by
/// `transaction()` share the same cache state (and therefore the same
/// background workers) as the executor `start()` was called on.
pub struct Stash<E> {
    inner: E,
    cache: Arc<CacheState>,
    config: StashConfig,
}

impl<E> Stash<E> {
    pub fn new(inner: E, config: StashConfig) -> Self {
        Self {
            inner,
            cache: Arc::new(CacheState::new()),
            config,
        }
    }

    /// Stops this cache's background cap/retirement/refill tasks, if
    /// `start` ever launched them. Any other `Stash`/`Stash::Transaction`
    /// sharing the same cache (e.g. a transactional handle) observes the
    /// same shutdown, since they all hold the same `Arc<CacheState>`.
    pub fn shutdown(&self) {
        self.cache.shutdown();
    }
}

#[async_trait]
impl<E: Executor + Clone + 'static> Executor for Stash<E> {
    type Transaction = Stash<E::Transaction>;

    async fn version(&self) -> Result<String> {
        self.inner.version().await
    }

    async fn exec(&self, sql: Sql, params: &[PgValue], format: ResultFormat) -> Result<Rows> {
        let canonical = sql.canonical();

        if classifier::is_write(&canonical) {
            let affected = classifier::affected_tables(&canonical);
            let rows = self
                .inner
                .exec(Sql::Single(canonical.clone()), params, format)
                .await?;
            if !affected.is_empty() {
                self.cache.invalidate_tables(&affected);
            }
            return Ok(rows);
        }

        let key = cache::params_key(params);
        if let Some(hit) = self.cache.hit(&canonical, &key) {
            return Ok(hit);
        }

        let rows = self
            .inner
            .exec(Sql::Single(canonical.clone()), params, format)
            .await?;

        if classifier::contains_now(&canonical) {
            return Ok(rows);
        }

        let read_tables = classifier::read_tables(&canonical);
        if read_tables.is_empty() {
            return Err(PgRelayError::Cache(
                "a cacheable read must reference at least one table".to_string(),
            ));
        }

        self.cache.insert(
            &canonical,
            &key,
            Entry {
                result: Arc::clone(&rows),
                params: params.to_vec(),
                result_format: format,
                popularity: 1,
                used: Instant::now(),
                stale: None,
            },
            &read_tables,
        );

        Ok(rows)
    }

    async fn transaction<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Stash<E::Transaction>) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let cache = Arc::clone(&self.cache);
        let config = self.config.clone();
        self.inner
            .transaction(move |tx| {
                f(Stash {
                    inner: tx,
                    cache,
                    config,
                })
            })
            .await
    }

    async fn start(&self, n: usize) -> Result<()> {
        self.inner.start(n).await?;
        if !self.cache.try_launch() {
            return Err(PgRelayError::Cache(
                "cannot launch multiple times on same cache data".to_string(),
            ));
        }

        let refill_inner = self.inner.clone();
        let refill: background::RefillFn = Arc::new(move |query, params, format| {
            let inner = refill_inner.clone();
            Box::pin(async move { inner.exec(Sql::Single(query), &params, format).await })
        });

        let token = background::launch(Arc::clone(&self.cache), self.config.clone(), refill);
        self.cache.set_shutdown_token(token);
        Ok(())
    }

    async fn dump(&self) -> Result<String> {
        let inner_dump = self.inner.dump().await?;
        Ok(format!(
            "{inner_dump}\ncached entries: {}",
            self.cache.total_entries()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockExecutor;

    #[tokio::test]
    async fn second_read_is_served_from_cache() {
        let mock = MockExecutor::new().with_success(vec![]).with_success(vec![]);
        let stash = Stash::new(mock.clone(), StashConfig::default());

        stash
            .exec("SELECT * FROM book".into(), &[], ResultFormat::Binary)
            .await
            .unwrap();
        stash
            .exec("SELECT * FROM book".into(), &[], ResultFormat::Binary)
            .await
            .unwrap();

        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn write_invalidates_matching_read() {
        let mock = MockExecutor::new()
            .with_success(vec![])
            .with_success(vec![])
            .with_success(vec![]);
        let stash = Stash::new(mock.clone(), StashConfig::default());

        stash
            .exec("SELECT * FROM book".into(), &[], ResultFormat::Binary)
            .await
            .unwrap();
        stash
            .exec(
                "UPDATE book SET title = $1".into(),
                &[PgValue::Text("X".to_string())],
                ResultFormat::Binary,
            )
            .await
            .unwrap();
        stash
            .exec("SELECT * FROM book".into(), &[], ResultFormat::Binary)
            .await
            .unwrap();

        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn query_without_table_is_never_cached() {
        let mock = MockExecutor::new().with_success(vec![]);
        let stash = Stash::new(mock, StashConfig::default());

        let err = stash
            .exec("SELECT 1".into(), &[], ResultFormat::Binary)
            .await
            .unwrap_err();

        assert!(matches!(err, PgRelayError::Cache(_)));
    }

    #[tokio::test]
    async fn shutdown_before_start_is_a_no_op() {
        let stash = Stash::new(MockExecutor::new(), StashConfig::default());
        stash.shutdown();
    }

    #[tokio::test]
    async fn shutdown_after_start_does_not_panic() {
        let stash = Stash::new(MockExecutor::new(), StashConfig::default());
        stash.start(1).await.unwrap();
        stash.shutdown();
        // A second shutdown call must stay idempotent.
        stash.shutdown();
    }

    #[tokio::test]
    async fn second_launch_on_shared_cache_fails() {
        let stash = Stash::new(MockExecutor::new(), StashConfig::default());
        stash.start(1).await.unwrap();
        let err = stash.start(1).await.unwrap_err();
        assert!(matches!(err, PgRelayError::Cache(_)));
    }
}
