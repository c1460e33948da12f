//! A client-side PostgreSQL access layer: a connection pool wrapped by a
//! composable decorator chain providing observability (`Spy`), per-query
//! timeouts (`Impatient`), read retry (`Retry`), and a table-invalidated
//! result cache (`Stash`).
//!
//! The bottom of every stack is `Pool`, which owns actual wire connections.
//! Everything above it - `Spy`, `Impatient`, `Retry`, `Stash` - implements
//! the same `Executor` trait `Pool` does, so they compose freely:
//!
//! ```ignore
//! let pool = Pool::new(wire);
//! let db = Spy::new(Retry::new(Impatient::new(Stash::new(pool, StashConfig::default()),
//!     Duration::from_secs(5), vec![]), 3), observer);
//! db.start(10).await?;
//! ```

mod decorators;
mod error;
mod executor;
mod pg;
mod pool;
pub mod testutil;
mod wire;

pub use decorators::{Impatient, Observer, Retry, Spy, Stash, StashConfig};
pub use error::{PgRelayError, Result};
pub use executor::{collapse_whitespace, Executor, ResultFormat, Row, Rows, Sql};
pub use pg::types::PgValue;
pub use pool::{Pool, PoolTransaction};
pub use wire::Wire;
