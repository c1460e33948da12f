//! Error taxonomy for the pool and decorator chain.
//!
//! The wire-level driver (`pg::error::PgError`) stays a separate, lower-level
//! error type; everything above Wire deals in `PgRelayError`.

use std::time::Duration;

use thiserror::Error;

use crate::pg::error::PgError;

#[derive(Error, Debug, Clone)]
pub enum PgRelayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("statement exceeded {budget:?} (elapsed {elapsed:?}, {arg_count} arg(s))")]
    TooSlow {
        budget: Duration,
        elapsed: Duration,
        arg_count: usize,
    },

    #[error("cache error: {0}")]
    Cache(String),
}

impl PgRelayError {
    /// Whether the connection backing this call should be assumed broken.
    ///
    /// Pool uses this to decide whether to discard and replace the
    /// connection before returning it to the idle queue.
    pub fn is_connection_layer(&self) -> bool {
        matches!(self, PgRelayError::Connection(_))
    }
}

impl From<PgError> for PgRelayError {
    fn from(err: PgError) -> Self {
        match &err {
            PgError::Io(_)
            | PgError::Protocol(_)
            | PgError::Auth(_)
            | PgError::ConnectionClosed
            | PgError::Timeout => PgRelayError::Connection(err.to_string()),
            PgError::Server { .. } | PgError::Type(_) | PgError::StatementNotFound(_) => {
                PgRelayError::Query(err.to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, PgRelayError>;
