//! Impatient: a per-statement timeout, with an exemption list and
//! server-side enforcement inside transactions.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::error::{PgRelayError, Result};
use crate::executor::{Executor, ResultFormat, Rows, Sql};
use crate::pg::types::PgValue;

/// Wraps the inner executor with a deadline `budget` per statement. Any
/// canonical SQL matching one of `exempt` runs without a client-side
/// deadline at all.
pub struct Impatient<E> {
    inner: E,
    budget: Duration,
    exempt: Vec<Regex>,
}

impl<E> Impatient<E> {
    pub fn new(inner: E, budget: Duration, exempt: Vec<Regex>) -> Self {
        Self {
            inner,
            budget,
            exempt,
        }
    }

    fn is_exempt(&self, canonical: &str) -> bool {
        self.exempt.iter().any(|re| re.is_match(canonical))
    }
}

#[async_trait]
impl<E: Executor> Executor for Impatient<E> {
    type Transaction = Impatient<E::Transaction>;

    async fn version(&self) -> Result<String> {
        self.inner.version().await
    }

    async fn exec(&self, sql: Sql, params: &[PgValue], format: ResultFormat) -> Result<Rows> {
        let canonical = sql.canonical();
        if self.is_exempt(&canonical) {
            return self.inner.exec(sql, params, format).await;
        }

        let started = std::time::Instant::now();
        match tokio::time::timeout(self.budget, self.inner.exec(sql, params, format)).await {
            Ok(result) => result,
            Err(_) => Err(PgRelayError::TooSlow {
                budget: self.budget,
                elapsed: started.elapsed(),
                arg_count: params.len(),
            }),
        }
    }

    async fn transaction<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Impatient<E::Transaction>) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let budget = self.budget;
        let exempt = self.exempt.clone();
        let statement_timeout_ms = budget.as_millis();
        self.inner
            .transaction(move |tx| async move {
                tx.exec(
                    Sql::from(format!("SET LOCAL statement_timeout = {statement_timeout_ms}")),
                    &[],
                    ResultFormat::Binary,
                )
                .await?;
                f(Impatient::new(tx, budget, exempt)).await
            })
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
    use std::time::Duration;
    use tokio::time::sleep;

    #[derive(Clone)]
    struct SlowExecutor {
        delay: Duration,
    }

    #[async_trait]
    impl Executor for SlowExecutor {
        type Transaction = SlowExecutor;

        async fn version(&self) -> Result<String> {
            Ok("14.9".to_string())
        }

        async fn exec(&self, _sql: Sql, _params: &[PgValue], _format: ResultFormat) -> Result<Rows> {
            sleep(self.delay).await;
            Ok(std::sync::Arc::new(vec![]))
        }

        async fn transaction<F, Fut, T>(&self, f: F) -> Result<T>
        where
            F: FnOnce(SlowExecutor) -> Fut + Send,
            Fut: Future<Output = Result<T>> + Send,
            T: Send,
        {
            f(self.clone()).await
        }

        async fn dump(&self) -> Result<String> {
            Ok("slow".to_string())
        }
    }

    #[tokio::test]
    async fn raises_too_slow_past_budget() {
        let impatient = Impatient::new(
            SlowExecutor {
                delay: Duration::from_millis(50),
            },
            Duration::from_millis(5),
            vec![],
        );

        let err = impatient
            .exec("SELECT pg_sleep(1)".into(), &[], ResultFormat::Binary)
            .await
            .unwrap_err();

        assert!(matches!(err, PgRelayError::TooSlow { .. }));
    }

    #[tokio::test]
    async fn exempted_query_runs_past_budget() {
        let impatient = Impatient::new(
            SlowExecutor {
                delay: Duration::from_millis(50),
            },
            Duration::from_millis(5),
            vec![Regex::new(r"(?i)^select").unwrap()],
        );

        let result = impatient
            .exec("SELECT pg_sleep(1)".into(), &[], ResultFormat::Binary)
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn fast_query_under_budget_succeeds() {
        let impatient = Impatient::new(MockExecutor::new().with_success(vec![]), Duration::from_secs(5), vec![]);
        let result = impatient
            .exec("SELECT 1".into(), &[], ResultFormat::Binary)
            .await;
        assert!(result.is_ok());
    }
}
