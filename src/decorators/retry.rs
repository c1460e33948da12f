//! Retry: retries read-only statements on failure, up to `attempts` times,
//! with no backoff. Write statements and anything inside a transaction run
//! exactly once - partial effects may already be on the connection.

use std::future::Future;

use async_trait::async_trait;

use crate::error::Result;
use crate::executor::{Executor, ResultFormat, Rows, Sql};
use crate::pg::types::PgValue;

fn is_read_only(canonical: &str) -> bool {
    canonical
        .trim_start()
        .split_whitespace()
        .next()
        .map(|tok| tok.eq_ignore_ascii_case("select"))
        .unwrap_or(false)
}

/// Retries read-only (`SELECT ...`) statements up to `attempts` times.
pub struct Retry<E> {
    inner: E,
    attempts: u32,
}

impl<E> Retry<E> {
    pub fn new(inner: E, attempts: u32) -> Self {
        Self { inner, attempts }
    }
}

#[async_trait]
impl<E: Executor> Executor for Retry<E> {
    // Pass-through: operations inside a transaction must never be silently
    // retried.
    type Transaction = E::Transaction;

    async fn version(&self) -> Result<String> {
        self.inner.version().await
    }

    async fn exec(&self, sql: Sql, params: &[PgValue], format: ResultFormat) -> Result<Rows> {
        let canonical = sql.canonical();

        if !is_read_only(&canonical) {
            return self.inner.exec(sql, params, format).await;
        }

        let attempts = self.attempts.max(1);
        let mut last_err = None;
        for attempt in 0..attempts {
            match self
                .inner
                .exec(Sql::Single(canonical.clone()), params, format)
                .await
            {
                Ok(rows) => return Ok(rows),
                Err(e) => {
                    last_err = Some(e);
                    let _ = attempt;
                }
            }
        }
        Err(last_err.expect("loop runs at least once"))
    }

    async fn transaction<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(E::Transaction) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        self.inner.transaction(f).await
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
    use crate::error::PgRelayError;
    use crate::testutil::MockExecutor;

    #[tokio::test]
    async fn retries_select_until_success() {
        let mock = MockExecutor::new()
            .with_failure()
            .with_failure()
            .with_success(vec![]);
        let retry = Retry::new(mock.clone(), 3);

        let result = retry
            .exec("SELECT 2 AS num".into(), &[], ResultFormat::Binary)
            .await;

        assert!(result.is_ok());
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn does_not_retry_insert() {
        let mock = MockExecutor::new().with_error(PgRelayError::Query("boom".to_string()));
        let retry = Retry::new(mock.clone(), 3);

        let result = retry
            .exec(
                "INSERT INTO book (title) VALUES ($1)".into(),
                &[PgValue::Text("X".to_string())],
                ResultFormat::Binary,
            )
            .await;

        assert!(matches!(result, Err(PgRelayError::Query(_))));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_exhausting_attempts() {
        let mock = MockExecutor::new()
            .with_failure()
            .with_failure()
            .with_failure();
        let retry = Retry::new(mock.clone(), 3);

        let result = retry
            .exec("SELECT 1".into(), &[], ResultFormat::Binary)
            .await;

        assert!(result.is_err());
        assert_eq!(mock.call_count(), 3);
    }
}
