//! Spy: a pass-through observer. Measures wall time around each `exec` and
//! invokes a callback with `(canonical_sql, elapsed)` after the inner call
//! returns successfully. Never transforms the result or the error.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::error::Result;
use crate::executor::{Executor, ResultFormat, Rows, Sql};
use crate::pg::types::PgValue;

/// Callback invoked after each successful `exec`: `(canonical_sql, elapsed)`.
pub type Observer = Arc<dyn Fn(&str, std::time::Duration) + Send + Sync>;

/// Pass-through decorator that reports per-statement timing to an observer.
pub struct Spy<E> {
    inner: E,
    observer: Observer,
}

impl<E> Spy<E> {
    pub fn new(inner: E, observer: Observer) -> Self {
        Self { inner, observer }
    }
}

#[async_trait]
impl<E: Executor> Executor for Spy<E> {
    type Transaction = Spy<E::Transaction>;

    async fn version(&self) -> Result<String> {
        self.inner.version().await
    }

    async fn exec(&self, sql: Sql, params: &[PgValue], format: ResultFormat) -> Result<Rows> {
        let canonical = sql.canonical();
        let started = Instant::now();
        let result = self.inner.exec(sql, params, format).await;
        if result.is_ok() {
            (self.observer)(&canonical, started.elapsed());
        }
        result
    }

    async fn transaction<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Spy<E::Transaction>) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let observer = Arc::clone(&self.observer);
        self.inner
            .transaction(move |tx| f(Spy::new(tx, observer)))
            .await
    }

    async fn start(&self, n: usize) -> Result<()> {
        self.inner.start(n).await
    }

    async fn dump(&self) -> Result<String> {
        self.inner.dump().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockExecutor;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn reports_sql_and_elapsed_on_success() {
        let mock = MockExecutor::new().with_success(vec![]);
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let spy = Spy::new(
            mock,
            Arc::new(move |sql: &str, _elapsed| seen_clone.lock().push(sql.to_string())),
        );

        spy.exec("SELECT 1".into(), &[], ResultFormat::Binary)
            .await
            .unwrap();

        assert_eq!(seen.lock().as_slice(), ["SELECT 1"]);
    }

    #[tokio::test]
    async fn does_not_report_on_failure() {
        let mock = MockExecutor::new().with_failure();
        let called = Arc::new(Mutex::new(false));
        let called_clone = Arc::clone(&called);
        let spy = Spy::new(
            mock,
            Arc::new(move |_sql: &str, _elapsed| *called_clone.lock() = true),
        );

        let _ = spy
            .exec("SELECT 1".into(), &[], ResultFormat::Binary)
            .await;

        assert!(!*called.lock());
    }
}
