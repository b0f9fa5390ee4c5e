//! # EsoxSolutions.ConnectionPool
//!
//! Bounded, thread-safe pool of database connections for Rust.
//!
//! ## Features
//!
//! - Fixed set of connections opened up front, with per-slot retry on
//!   broken-connection failures
//! - Blocking acquire with timeout and optional cancellation
//! - Async acquire on tokio
//! - Automatic return of connections via RAII (Drop trait)
//! - Liveness check on every acquire; dead connections are discarded
//! - Named statements prepared on every new connection
//! - Growing and shrinking the pool at runtime
//! - Hard drain for shutdown
//! - Health monitoring and metrics
//! - Prometheus metrics export
//!
//! ## Quick Start
//!
//! ```rust
//! use esox_connectionpool::{ConnectionPool, PoolConfiguration};
//! use esox_connectionpool::testing::MockFactory;
//!
//! let config = PoolConfiguration::new("dbname=test").with_pool_size(3);
//! let pool = ConnectionPool::new(MockFactory::new(), config).unwrap();
//! pool.initialize().unwrap();
//! {
//!     let conn = pool.acquire().unwrap();
//!     println!("Got connection {}", conn.connection_id());
//!     // Connection automatically returned when `conn` goes out of scope
//! }
//! ```

mod pool;
mod config;
mod connection;
mod registry;
mod lease;
mod metrics;
mod health;
mod errors;
pub mod testing;

pub use pool::ConnectionPool;
pub use config::{PoolConfiguration, Statement};
pub use connection::{Connection, ConnectionFactory};
pub use registry::{DecreaseOutcome, RegistrySnapshot};
pub use lease::PooledConnection;
pub use metrics::PoolMetrics;
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use health::HealthStatus;
pub use errors::{FactoryError, PoolError, PoolResult};
pub use tokio_util::sync::CancellationToken;
