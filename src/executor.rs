//! The `Executor` contract shared by `Pool` and every decorator.
//!
//! Every layer of the chain - `Spy`, `Impatient`, `Retry`, `Stash`, and the
//! `Pool` at the bottom - implements the same three operations. Decorators
//! are plain generic wrappers over an inner `Executor`, so a stack like
//! `Spy<Retry<Impatient<Stash<Pool>>>>` is ordinary static dispatch: no
//! `dyn Executor`, no vtable, the whole chain monomorphizes per call site.
//!
//! `transaction` needs a generic `FnOnce(Self::Transaction) -> Fut` callback,
//! which is not object-safe - another reason this interface is consumed
//! generically rather than behind a trait object. The associated
//! `Transaction` type recurses: each decorator's transaction handle wraps its
//! inner's transaction handle, so cross-cutting behavior (spying, timing out,
//! caching) still applies to statements issued inside a transaction.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::pg::types::PgValue;

/// A decoded result row. Column values follow the wire's binary/text decode,
/// so most scalar types come back as their native Rust representation
/// (`PgValue::Text`/`Int4`/...) rather than strings in every case - the one
/// deliberate divergence from a duck-typed `string | bytes` row shape.
pub type Row = Vec<PgValue>;

/// Shared result set. `Arc` makes a Stash cache hit identity-equal to the
/// value produced by the original miss: cloning the `Arc` is a refcount bump,
/// never a copy of the rows.
pub type Rows = Arc<Vec<Row>>;

/// Wire result format requested for a statement's output columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultFormat {
    Text = 0,
    Binary = 1,
}

impl Default for ResultFormat {
    fn default() -> Self {
        ResultFormat::Text
    }
}

/// SQL text as accepted by `exec`: either a single string, or a list of
/// fragments joined with single spaces before canonicalization - mirrors the
/// "canonicalize if an array" input shape consumers pass today.
#[derive(Debug, Clone)]
pub enum Sql {
    Single(String),
    Parts(Vec<String>),
}

impl Sql {
    /// Join (if a list), collapse internal whitespace runs to a single
    /// space, and trim the ends.
    pub fn canonical(&self) -> String {
        let joined = match self {
            Sql::Single(s) => s.clone(),
            Sql::Parts(parts) => parts.join(" "),
        };
        collapse_whitespace(&joined)
    }
}

impl From<&str> for Sql {
    fn from(s: &str) -> Self {
        Sql::Single(s.to_string())
    }
}

impl From<String> for Sql {
    fn from(s: String) -> Self {
        Sql::Single(s)
    }
}

impl From<Vec<String>> for Sql {
    fn from(parts: Vec<String>) -> Self {
        Sql::Parts(parts)
    }
}

impl From<&[&str]> for Sql {
    fn from(parts: &[&str]) -> Self {
        Sql::Parts(parts.iter().map(|s| s.to_string()).collect())
    }
}

/// Collapse runs of whitespace to a single space and trim both ends.
pub fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_space = false;
    for ch in s.trim().chars() {
        if ch.is_whitespace() {
            if !prev_space {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(ch);
            prev_space = false;
        }
    }
    out
}

/// The uniform contract implemented by `Pool` and every decorator.
#[async_trait]
pub trait Executor: Send + Sync {
    /// The handle yielded to a `transaction` callback. Implements the same
    /// interface, restricted in practice to `exec`, so nested decorator
    /// behavior (spying, retrying, caching, timing out) keeps applying to
    /// statements issued inside the transaction.
    type Transaction: Executor;

    /// The server's advertised version, first whitespace-delimited token,
    /// memoized by whichever layer first computes it (the `Pool`).
    async fn version(&self) -> Result<String>;

    /// Execute one statement and return all rows eagerly.
    async fn exec(&self, sql: Sql, params: &[PgValue], format: ResultFormat) -> Result<Rows>;

    /// Run `f` against a transaction-scoped executor; commit on success,
    /// roll back and re-raise on any error.
    async fn transaction<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Self::Transaction) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send;

    /// Open `n` underlying connections. Only meaningful on the outermost
    /// `Pool`; decorators pass it straight through by inheriting this
    /// default, no-op body.
    async fn start(&self, _n: usize) -> Result<()> {
        Ok(())
    }

    /// Human-readable multi-line snapshot of the executor's state.
    async fn dump(&self) -> Result<String>;
}
