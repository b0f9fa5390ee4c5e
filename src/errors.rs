//! Error types for the connection pool

use std::time::Duration;
use thiserror::Error;

/// Failure reported by a [`ConnectionFactory`](crate::ConnectionFactory) or
/// while preparing a freshly opened connection.
///
/// Only [`FactoryError::Transient`] failures are retried during
/// initialization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FactoryError {
    #[error("broken connection: {0}")]
    Transient(String),

    #[error("connection setup failed: {0}")]
    Permanent(String),
}

impl FactoryError {
    /// Whether retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, FactoryError::Transient(_))
    }
}

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Connection pool timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Connection failed liveness check and was discarded")]
    BrokenResource,

    #[error("Could not open any of {requested} connections ({attempts} attempts)")]
    FatalInit { requested: usize, attempts: usize },

    #[error(transparent)]
    Factory(#[from] FactoryError),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Pool is not initialized")]
    NotInitialized,

    #[error("Pool is already initialized")]
    AlreadyInitialized,

    #[error("Invalid pool configuration: {0}")]
    InvalidConfiguration(String),
}

impl PoolError {
    /// Whether the caller may reasonably retry the failed call.
    ///
    /// Timeouts and broken connections leave the pool usable; everything else
    /// needs an intervention first.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PoolError::Timeout(_) | PoolError::BrokenResource | PoolError::Factory(_)
        )
    }

    pub(crate) fn timeout(after: Duration) -> Self {
        PoolError::Timeout(after)
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
