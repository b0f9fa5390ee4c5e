//! Contracts for the pooled resource and the factory that opens it

use crate::errors::FactoryError;

/// A live backend connection managed by the pool
///
/// The pool only needs to know whether the connection is still usable, how
/// to register named statements on it and how to shut it down.
pub trait Connection: Send + 'static {
    /// Whether the connection is still open
    fn is_alive(&self) -> bool;

    /// Register a named statement; called once per configured statement,
    /// right after the connection opens
    fn prepare(&mut self, name: &str, definition: &str) -> Result<(), FactoryError>;

    /// Close the connection; the pool never uses it afterwards
    fn close(&mut self);
}

/// Opens new connections for the pool
///
/// Implementations must be safe to call again after a
/// [`FactoryError::Transient`] failure.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Connection;

    fn connect(&self, target: &str) -> Result<Self::Connection, FactoryError>;
}
