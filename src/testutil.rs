//! A scriptable mock `Executor`, used to exercise the decorator chain's
//! concrete scenarios without a live PostgreSQL server: queue up a sequence
//! of successes/failures, run a decorated stack against it, then assert on
//! `call_count()`.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{PgRelayError, Result};
use crate::executor::{Executor, ResultFormat, Row, Rows, Sql};
use crate::pg::types::PgValue;

#[derive(Clone)]
enum Outcome {
    Success(Vec<Row>),
    Failure(PgRelayError),
}

/// An `Executor` whose `exec` responses are scripted in advance.
#[derive(Clone)]
pub struct MockExecutor {
    queue: Arc<Mutex<VecDeque<Outcome>>>,
    default: Outcome,
    calls: Arc<AtomicUsize>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            default: Outcome::Success(Vec::new()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue one successful `exec` response.
    pub fn with_success(self, rows: Vec<Row>) -> Self {
        self.queue.lock().push_back(Outcome::Success(rows));
        self
    }

    /// Queue one `exec` call that fails with a generic connection error.
    pub fn with_failure(self) -> Self {
        self.with_error(PgRelayError::Connection("mock connection failure".to_string()))
    }

    /// Queue one `exec` call that fails with a specific error.
    pub fn with_error(self, err: PgRelayError) -> Self {
        self.queue.lock().push_back(Outcome::Failure(err));
        self
    }

    /// Number of `exec` calls this executor (or any clone sharing its
    /// state) has served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for MockExecutor {
    type Transaction = MockExecutor;

    async fn version(&self) -> Result<String> {
        Ok("14.9".to_string())
    }

    async fn exec(&self, _sql: Sql, _params: &[PgValue], _format: ResultFormat) -> Result<Rows> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = {
            let mut queue = self.queue.lock();
            queue.pop_front().unwrap_or_else(|| self.default.clone())
        };
        match outcome {
            Outcome::Success(rows) => Ok(Arc::new(rows)),
            Outcome::Failure(err) => Err(err),
        }
    }

    async fn transaction<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(MockExecutor) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        f(self.clone()).await
    }

    async fn dump(&self) -> Result<String> {
        Ok(format!("mock executor, {} call(s)", self.call_count()))
    }
}
