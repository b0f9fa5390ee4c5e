//! Core connection pool implementation

use crate::config::PoolConfiguration;
use crate::connection::{Connection, ConnectionFactory};
use crate::errors::{FactoryError, PoolError, PoolResult};
use crate::health::HealthStatus;
use crate::lease::{LeaseTicket, PooledConnection, ReturnFn};
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::registry::{DecreaseOutcome, Registry, RegistrySnapshot, Retirement, Returned};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Longest a blocked acquire sleeps before looking at its cancellation token
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Sleep between two attempts of an async acquire
const ASYNC_POLL_INTERVAL: Duration = Duration::from_millis(10);

struct PoolInner<F: ConnectionFactory> {
    factory: F,
    config: PoolConfiguration,
    registry: Mutex<Registry<F::Connection>>,
    available: Condvar,
    leases: DashMap<u64, Instant>,
    metrics: MetricsTracker,
    next_id: AtomicU64,
}

/// Bounded pool of connections opened by a [`ConnectionFactory`]
///
/// Cloning the pool is cheap; every clone shares the same connections.
///
/// # Examples
///
/// ```
/// use esox_connectionpool::{ConnectionPool, PoolConfiguration};
/// use esox_connectionpool::testing::MockFactory;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new("dbname=test")
///     .with_pool_size(3)
///     .with_timeout(Duration::from_secs(2))
///     .with_statement("test_query", "SELECT 1");
///
/// let pool = ConnectionPool::new(MockFactory::new(), config).unwrap();
/// assert_eq!(pool.initialize().unwrap(), 3);
///
/// {
///     let conn = pool.acquire().unwrap();
///     assert_eq!(conn.statement("test_query"), Some("SELECT 1"));
///     assert_eq!(pool.on_loan_count(), 1);
/// }
///
/// assert_eq!(pool.idle_count(), 3);
/// ```
pub struct ConnectionPool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Create an empty pool; call [`initialize`](Self::initialize) before use
    pub fn new(factory: F, config: PoolConfiguration) -> PoolResult<Self> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(PoolInner {
                factory,
                config,
                registry: Mutex::new(Registry::new()),
                available: Condvar::new(),
                leases: DashMap::new(),
                metrics: MetricsTracker::new(),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    /// Open the configured number of connections
    ///
    /// Broken-connection failures are retried per slot; any other factory
    /// failure aborts. Slots that stay broken are dropped, so the returned
    /// capacity may be lower than `pool_size`. Fails with
    /// [`PoolError::FatalInit`] when not a single connection could be opened.
    pub fn initialize(&self) -> PoolResult<usize> {
        if self.inner.registry.lock().is_ready() {
            return Err(PoolError::AlreadyInitialized);
        }

        let requested = self.inner.config.pool_size;
        let mut created = Vec::with_capacity(requested);

        for slot in 0..requested {
            match self.create_with_retry(slot) {
                Ok(conn) => created.push((self.next_id(), conn)),
                Err(e) if e.is_transient() => {
                    tracing::warn!(slot, error = %e, "giving up on connection slot");
                }
                Err(e) => {
                    tracing::warn!(slot, error = %e, "connection setup failed, aborting initialization");
                    self.close_all(created.into_iter().map(|(_, conn)| conn));
                    return Err(e.into());
                }
            }
        }

        if created.is_empty() {
            tracing::error!(requested, "could not open any connection");
            return Err(PoolError::FatalInit {
                requested,
                attempts: requested * self.inner.config.connect_attempts,
            });
        }

        let installed = self.inner.registry.lock().install(created);
        match installed {
            Ok(capacity) => {
                self.inner.available.notify_all();
                tracing::info!(requested, capacity, "connection pool initialized");
                Ok(capacity)
            }
            Err(rejected) => {
                self.close_all(rejected.into_iter().map(|(_, conn)| conn));
                Err(PoolError::AlreadyInitialized)
            }
        }
    }

    /// Borrow a connection, waiting up to the configured timeout
    pub fn acquire(&self) -> PoolResult<PooledConnection<F::Connection>> {
        self.acquire_inner(self.inner.config.acquire_timeout, None)
    }

    /// Borrow a connection, waiting up to `timeout`
    pub fn acquire_timeout(&self, timeout: Duration) -> PoolResult<PooledConnection<F::Connection>> {
        self.acquire_inner(timeout, None)
    }

    /// Borrow a connection; the wait ends early once `token` is cancelled
    pub fn acquire_with_cancel(
        &self,
        token: &CancellationToken,
    ) -> PoolResult<PooledConnection<F::Connection>> {
        self.acquire_inner(self.inner.config.acquire_timeout, Some(token))
    }

    /// Borrow a connection only if one is idle right now
    ///
    /// `Ok(None)` means every connection is lent out. A broken connection or
    /// an uninitialized pool is still reported as an error.
    pub fn try_acquire(&self) -> PoolResult<Option<PooledConnection<F::Connection>>> {
        match self.acquire_inner(Duration::ZERO, None) {
            Ok(conn) => Ok(Some(conn)),
            Err(PoolError::Timeout(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Borrow a connection asynchronously, waiting up to the configured timeout
    pub async fn acquire_async(&self) -> PoolResult<PooledConnection<F::Connection>> {
        let timeout = self.inner.config.acquire_timeout;

        let result = tokio::time::timeout(timeout, async {
            loop {
                match self.try_acquire() {
                    Ok(Some(conn)) => return Ok(conn),
                    Ok(None) => tokio::time::sleep(ASYNC_POLL_INTERVAL).await,
                    Err(e) => return Err(e),
                }
            }
        })
        .await;

        match result {
            Ok(acquired) => acquired,
            Err(_) => {
                MetricsTracker::incr(&self.inner.metrics.acquire_timeouts);
                Err(PoolError::timeout(timeout))
            }
        }
    }

    /// Async acquire that gives up as soon as `token` is cancelled
    pub async fn acquire_async_with_cancel(
        &self,
        token: &CancellationToken,
    ) -> PoolResult<PooledConnection<F::Connection>> {
        tokio::select! {
            acquired = self.acquire_async() => acquired,
            () = token.cancelled() => {
                MetricsTracker::incr(&self.inner.metrics.acquire_cancellations);
                Err(PoolError::Cancelled)
            }
        }
    }

    /// Forget every connection and close the idle ones
    ///
    /// Does not wait for outstanding leases: their connections are closed
    /// when they come back. Blocked acquirers fail with
    /// [`PoolError::NotInitialized`]. Returns the number of idle connections
    /// closed.
    pub fn drain(&self) -> usize {
        let (idle, snapshot) = {
            let mut registry = self.inner.registry.lock();
            let snapshot = registry.snapshot();
            (registry.drain(), snapshot)
        };
        self.inner.leases.clear();
        self.inner.available.notify_all();

        let closed = idle.len();
        self.close_all(idle);
        tracing::info!(
            closed,
            abandoned_leases = snapshot.on_loan,
            "connection pool drained"
        );
        closed
    }

    /// Open one more connection and add it to the pool
    ///
    /// Cancels a pending retirement instead when one exists. Fails without
    /// changing capacity when the factory fails.
    pub fn increase_connection(&self) -> PoolResult<()> {
        {
            let mut registry = self.inner.registry.lock();
            if !registry.is_ready() {
                return Err(PoolError::NotInitialized);
            }
            if registry.cancel_retirement() {
                tracing::debug!("cancelled pending retirement");
                return Ok(());
            }
        }

        let conn = self.create_connection()?;
        let id = self.next_id();

        let mut registry = self.inner.registry.lock();
        if !registry.is_ready() {
            drop(registry);
            self.close_all([conn]);
            return Err(PoolError::NotInitialized);
        }
        registry.add(id, conn);
        let capacity = registry.target_capacity();
        drop(registry);

        self.inner.available.notify_one();
        tracing::debug!(connection_id = id, capacity, "connection added");
        Ok(())
    }

    /// Remove one connection from the pool without blocking
    ///
    /// An idle connection is closed right away; if all are lent out the next
    /// one to come back is closed instead.
    pub fn decrease_connection(&self) -> DecreaseOutcome {
        let retirement = self.inner.registry.lock().retire_one();
        match retirement {
            Retirement::Now(conn) => {
                self.close_all([conn]);
                tracing::debug!("idle connection retired");
                DecreaseOutcome::Closed
            }
            Retirement::Deferred => {
                tracing::debug!("connection marked for retirement on return");
                DecreaseOutcome::Deferred
            }
            Retirement::Unchanged => DecreaseOutcome::Unchanged,
        }
    }

    /// Target capacity, counting pending retirements as done
    pub fn current_capacity(&self) -> usize {
        self.inner.registry.lock().target_capacity()
    }

    pub fn idle_count(&self) -> usize {
        self.snapshot().idle
    }

    pub fn on_loan_count(&self) -> usize {
        self.snapshot().on_loan
    }

    pub fn pending_retirements(&self) -> usize {
        self.snapshot().pending_retirements
    }

    pub fn is_ready(&self) -> bool {
        self.inner.registry.lock().is_ready()
    }

    pub fn config(&self) -> &PoolConfiguration {
        &self.inner.config
    }

    /// Consistent copy of the registry counters
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.inner.registry.lock().snapshot()
    }

    /// Get health status
    pub fn get_health_status(&self) -> HealthStatus {
        let longest_lease = self
            .inner
            .leases
            .iter()
            .map(|lease| lease.value().elapsed())
            .max();

        HealthStatus::new(
            self.snapshot(),
            self.inner.config.pool_size,
            longest_lease,
            self.inner.config.lease_warning_threshold,
        )
    }

    /// Get pool metrics
    pub fn get_metrics(&self) -> PoolMetrics {
        self.inner.metrics.get_metrics(self.snapshot())
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.get_metrics().export()
    }

    /// Export metrics in Prometheus format
    #[cfg(feature = "metrics")]
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> Result<String, prometheus::Error> {
        crate::metrics::MetricsExporter::export_prometheus(&self.get_metrics(), pool_name, tags)
    }

    fn acquire_inner(
        &self,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> PoolResult<PooledConnection<F::Connection>> {
        // `None` means the timeout is too large to represent: wait without limit.
        let deadline = Instant::now().checked_add(timeout);
        let mut registry = self.inner.registry.lock();

        let entry = loop {
            if !registry.is_ready() {
                return Err(PoolError::NotInitialized);
            }
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                // We may have consumed the wakeup meant for another waiter.
                if registry.has_idle() {
                    self.inner.available.notify_one();
                }
                MetricsTracker::incr(&self.inner.metrics.acquire_cancellations);
                return Err(PoolError::Cancelled);
            }
            if let Some(entry) = registry.take_idle() {
                break entry;
            }

            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                drop(registry);
                // Zero-wait polls are not timeouts.
                if !timeout.is_zero() {
                    MetricsTracker::incr(&self.inner.metrics.acquire_timeouts);
                    tracing::debug!(?timeout, "acquire timed out");
                }
                return Err(PoolError::timeout(timeout));
            }

            let poll_at = cancel.map(|_| now + CANCEL_POLL_INTERVAL);
            tracing::trace!("waiting for an idle connection");
            match deadline.into_iter().chain(poll_at).min() {
                Some(wake_at) => {
                    self.inner.available.wait_until(&mut registry, wake_at);
                }
                None => self.inner.available.wait(&mut registry),
            }
        };

        if !entry.conn.is_alive() {
            registry.forget_slot();
            let capacity = registry.target_capacity();
            drop(registry);

            MetricsTracker::incr(&self.inner.metrics.broken_discarded);
            tracing::warn!(connection_id = entry.id, capacity, "discarding broken connection");
            self.close_all([entry.conn]);
            return Err(PoolError::BrokenResource);
        }

        registry.lend();
        let generation = registry.generation();
        drop(registry);

        Ok(self.lease(entry.id, generation, entry.conn))
    }

    fn lease(&self, id: u64, generation: u64, conn: F::Connection) -> PooledConnection<F::Connection> {
        let acquired_at = Instant::now();
        self.inner.leases.insert(id, acquired_at);
        MetricsTracker::incr(&self.inner.metrics.total_acquired);
        tracing::debug!(connection_id = id, "connection acquired");

        let ticket = LeaseTicket {
            id,
            generation,
            acquired_at,
        };
        PooledConnection::new(conn, ticket, self.make_return_fn())
    }

    fn make_return_fn(&self) -> ReturnFn<F::Connection> {
        let inner = Arc::clone(&self.inner);

        Arc::new(move |conn, ticket| {
            let returned = inner.registry.lock().give_back(ticket.generation, ticket.id, conn);
            MetricsTracker::incr(&inner.metrics.total_released);

            match returned {
                Returned::Reinserted => {
                    inner.leases.remove(&ticket.id);
                    inner.available.notify_one();
                    tracing::debug!(connection_id = ticket.id, "connection released");
                }
                Returned::Retired(mut conn) => {
                    inner.leases.remove(&ticket.id);
                    conn.close();
                    MetricsTracker::incr(&inner.metrics.connections_closed);
                    tracing::debug!(connection_id = ticket.id, "connection retired on release");
                }
                Returned::Stale(mut conn) => {
                    inner.leases.remove(&ticket.id);
                    conn.close();
                    MetricsTracker::incr(&inner.metrics.connections_closed);
                    tracing::debug!(connection_id = ticket.id, "lease outlived drain, connection closed");
                }
            }
        })
    }

    fn create_with_retry(&self, slot: usize) -> Result<F::Connection, FactoryError> {
        let attempts = self.inner.config.connect_attempts;
        let mut attempt = 1;

        loop {
            match self.create_connection() {
                Ok(conn) => return Ok(conn),
                Err(e) if e.is_transient() && attempt < attempts => {
                    MetricsTracker::incr(&self.inner.metrics.creation_retries);
                    tracing::warn!(slot, attempt, error = %e, "retrying connection");
                    if !self.inner.config.retry_delay.is_zero() {
                        std::thread::sleep(self.inner.config.retry_delay);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Connect, check liveness and register the configured statements
    fn create_connection(&self) -> Result<F::Connection, FactoryError> {
        let result = self.open_and_prepare();
        match &result {
            Ok(_) => MetricsTracker::incr(&self.inner.metrics.connections_created),
            Err(e) => {
                MetricsTracker::incr(&self.inner.metrics.creation_failures);
                tracing::debug!(error = %e, "connection attempt failed");
            }
        }
        result
    }

    fn open_and_prepare(&self) -> Result<F::Connection, FactoryError> {
        let mut conn = self.inner.factory.connect(&self.inner.config.target)?;
        if !conn.is_alive() {
            conn.close();
            return Err(FactoryError::Transient("connection not open after connect".to_string()));
        }

        for statement in &self.inner.config.statements {
            if let Err(e) = conn.prepare(&statement.name, &statement.definition) {
                conn.close();
                return Err(e);
            }
        }
        Ok(conn)
    }

    fn close_all(&self, conns: impl IntoIterator<Item = F::Connection>) {
        for mut conn in conns {
            conn.close();
            MetricsTracker::incr(&self.inner.metrics.connections_closed);
        }
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }
}
