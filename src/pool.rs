//! The connection pool: the bottom of the decorator chain.
//!
//! A fixed-size collection of live connections behind a semaphore (one
//! permit per connection) and a `parking_lot::Mutex`-guarded idle `Vec` -
//! the same shape the hand-rolled driver below it already used for its own
//! pool, generalized here to the `Executor` contract and to eager
//! reconnect-on-error.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OnceCell, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info};

use crate::error::{PgRelayError, Result};
use crate::executor::{Executor, ResultFormat, Rows, Sql};
use crate::pg::connection::PgConnection;
use crate::pg::protocol::Format as WireFormat;
use crate::pg::types::PgValue;
use crate::wire::Wire;

const SLOW_QUERY_THRESHOLD: Duration = Duration::from_secs(1);

/// Maps the executor contract's result format onto the wire protocol's own
/// format tag, so a caller asking for text columns actually gets text
/// columns back instead of having the request silently discarded.
fn wire_format(format: ResultFormat) -> WireFormat {
    match format {
        ResultFormat::Text => WireFormat::Text,
        ResultFormat::Binary => WireFormat::Binary,
    }
}

struct PoolInner {
    wire: Wire,
    idle: Mutex<Vec<PgConnection>>,
    semaphore: Arc<Semaphore>,
    version: OnceCell<String>,
}

/// Fixed-size bounded collection of live connections. Serializes
/// checkout/checkin, reconnects broken connections, runs transactions.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

/// A connection checked out from the pool. Returns its connection to the
/// idle queue on drop, unless the connection was discarded by
/// [`Pool::replace_broken`] and the reconnect attempt itself failed.
struct PoolGuard {
    pool: Pool,
    conn: Option<PgConnection>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.inner.idle.lock().push(conn);
        }
    }
}

impl Pool {
    /// Construct a pool bound to the given configuration source. Call
    /// [`Executor::start`] before issuing any statement.
    pub fn new(wire: Wire) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                wire,
                idle: Mutex::new(Vec::new()),
                semaphore: Arc::new(Semaphore::new(0)),
                version: OnceCell::new(),
            }),
        }
    }

    /// Current number of idle (not checked out) connections.
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    async fn checkout(&self) -> Result<PoolGuard> {
        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PgRelayError::Connection("pool is closed".to_string()))?;

        let popped = self.inner.idle.lock().pop();
        let conn = match popped {
            Some(conn) => conn,
            None => self.inner.wire.connection().await?,
        };

        Ok(PoolGuard {
            pool: self.clone(),
            conn: Some(conn),
            _permit: permit,
        })
    }

    /// Discard whatever connection `guard` is holding (if any) and try to
    /// open a replacement from Wire. Leaves `guard.conn` as `None` if the
    /// replacement itself fails to connect - the connection is simply lost,
    /// and the next checkout that finds the idle queue short will open one
    /// lazily.
    async fn replace_broken(&self, guard: &mut PoolGuard) {
        guard.conn = None;
        guard.conn = self.inner.wire.connection().await.ok();
    }

    async fn memoized_version(&self) -> Result<String> {
        if let Some(v) = self.inner.version.get() {
            return Ok(v.clone());
        }
        let rows = self
            .exec(Sql::from("SELECT version()"), &[], ResultFormat::Text)
            .await?;
        let row = rows
            .first()
            .ok_or_else(|| PgRelayError::Query("version() returned no rows".to_string()))?;
        let value = row
            .first()
            .ok_or_else(|| PgRelayError::Query("version() returned no columns".to_string()))?;
        let text = match value {
            PgValue::Text(s) => s.clone(),
            other => format!("{:?}", other),
        };
        let first_token = text.split_whitespace().next().unwrap_or_default().to_string();
        let _ = self.inner.version.set(first_token.clone());
        Ok(first_token)
    }
}

#[async_trait]
impl Executor for Pool {
    type Transaction = PoolTransaction;

    async fn version(&self) -> Result<String> {
        self.memoized_version().await
    }

    async fn exec(&self, sql: Sql, params: &[PgValue], format: ResultFormat) -> Result<Rows> {
        let canonical = sql.canonical();
        let mut guard = self.checkout().await?;

        let started = Instant::now();
        let outcome = guard
            .conn
            .as_mut()
            .expect("freshly checked out connection")
            .query(&canonical, params, wire_format(format))
            .await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(query_result) => {
                if elapsed >= SLOW_QUERY_THRESHOLD {
                    info!(sql = %canonical, elapsed_ms = elapsed.as_millis() as u64, "query ok");
                } else {
                    debug!(sql = %canonical, elapsed_ms = elapsed.as_millis() as u64, "query ok");
                }
                Ok(Arc::new(query_result.rows))
            }
            Err(e) => {
                let relay_err = PgRelayError::from(e);
                error!(sql = %canonical, error = %relay_err, "query failed");
                if relay_err.is_connection_layer() {
                    self.replace_broken(&mut guard).await;
                }
                Err(relay_err)
            }
        }
    }

    async fn transaction<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(PoolTransaction) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let mut guard = self.checkout().await?;

        if let Err(e) = guard
            .conn
            .as_mut()
            .expect("freshly checked out connection")
            .begin()
            .await
        {
            let relay_err = PgRelayError::from(e);
            error!(error = %relay_err, "BEGIN failed");
            if relay_err.is_connection_layer() {
                self.replace_broken(&mut guard).await;
            }
            return Err(relay_err);
        }

        let conn = guard.conn.take().expect("connection just began a transaction");
        let shared = Arc::new(AsyncMutex::new(Some(conn)));
        let tx = PoolTransaction {
            pool: self.clone(),
            conn: Arc::clone(&shared),
        };

        let result = f(tx).await;

        let mut conn = shared
            .lock()
            .await
            .take()
            .expect("transaction handle must not outlive its connection");

        let finish = if result.is_ok() {
            conn.commit().await
        } else {
            conn.rollback().await
        };

        match finish {
            Ok(()) => guard.conn = Some(conn),
            Err(e) => {
                let relay_err = PgRelayError::from(e);
                error!(error = %relay_err, "COMMIT/ROLLBACK failed");
                self.replace_broken(&mut guard).await;
            }
        }

        result
    }

    async fn start(&self, n: usize) -> Result<()> {
        for _ in 0..n {
            let conn = self.inner.wire.connection().await?;
            self.inner.idle.lock().push(conn);
        }
        self.inner.semaphore.add_permits(n);
        info!(connections = n, "pool started");
        Ok(())
    }

    async fn dump(&self) -> Result<String> {
        let version = self
            .memoized_version()
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        let idle = self.inner.idle.lock();
        let mut out = format!(
            "server version: {version}\nidle connections: {}\n",
            idle.len()
        );
        for (i, conn) in idle.iter().enumerate() {
            out.push_str(&format!("  [{i}] backend_pid={}\n", conn.backend_pid()));
        }
        Ok(out)
    }
}

/// A transaction handle over one checked-out connection. Created at `START
/// TRANSACTION`, destroyed by `COMMIT` or `ROLLBACK` (both driven by the
/// enclosing `Pool::transaction`, not by this type). `exec` is the only
/// operation decorators actually route through it.
#[derive(Clone)]
pub struct PoolTransaction {
    pool: Pool,
    conn: Arc<AsyncMutex<Option<PgConnection>>>,
}

#[async_trait]
impl Executor for PoolTransaction {
    type Transaction = PoolTransaction;

    async fn version(&self) -> Result<String> {
        self.pool
            .inner
            .version
            .get()
            .cloned()
            .ok_or_else(|| PgRelayError::Query("server version not yet known".to_string()))
    }

    async fn exec(&self, sql: Sql, params: &[PgValue], format: ResultFormat) -> Result<Rows> {
        let canonical = sql.canonical();
        let mut locked = self.conn.lock().await;
        let conn = locked
            .as_mut()
            .ok_or_else(|| PgRelayError::Connection("transaction already closed".to_string()))?;
        conn.query(&canonical, params, wire_format(format))
            .await
            .map(|qr| Arc::new(qr.rows))
            .map_err(PgRelayError::from)
    }

    /// A transaction handle does not itself nest transactions (no
    /// savepoints); `f` simply runs against the same already-open
    /// transaction. COMMIT/ROLLBACK remain owned by the outermost
    /// `Pool::transaction` call.
    async fn transaction<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(PoolTransaction) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        f(self.clone()).await
    }

    async fn dump(&self) -> Result<String> {
        Ok("transaction in progress".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_pool_has_no_idle_connections() {
        let pool = Pool::new(Wire::direct("localhost", 5432, "db", "user", None));
        assert_eq!(pool.idle_count(), 0);
    }
}
