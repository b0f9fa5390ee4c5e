//! Metrics collection and export for connection pools

use crate::registry::RegistrySnapshot;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Metrics data for a pool
///
/// # Examples
///
/// ```
/// use esox_connectionpool::ConnectionPool;
/// use esox_connectionpool::PoolConfiguration;
/// use esox_connectionpool::testing::MockFactory;
///
/// let pool = ConnectionPool::new(MockFactory::new(), PoolConfiguration::new("mock").with_pool_size(3)).unwrap();
/// pool.initialize().unwrap();
///
/// {
///     let _conn = pool.acquire().unwrap();
///     let metrics = pool.get_metrics();
///     assert_eq!(metrics.total_acquired, 1);
///     assert_eq!(metrics.on_loan, 1);
/// }
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoolMetrics {
    /// Connections opened by the factory
    pub connections_created: usize,

    /// Connections closed by the pool
    pub connections_closed: usize,

    /// Factory calls that failed, including retried ones
    pub creation_failures: usize,

    /// Retries after a broken-connection failure
    pub creation_retries: usize,

    /// Successful acquires
    pub total_acquired: usize,

    /// Leases handed back
    pub total_released: usize,

    /// Acquires that ran out of time
    pub acquire_timeouts: usize,

    /// Acquires aborted through a cancellation token
    pub acquire_cancellations: usize,

    /// Connections dropped because they failed the liveness check
    pub broken_discarded: usize,

    /// Current idle connections
    pub idle: usize,

    /// Current lent connections
    pub on_loan: usize,

    /// Current capacity
    pub capacity: usize,

    /// Share of capacity currently lent out (0.0 to 1.0)
    pub utilization: f64,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("connections_created".to_string(), self.connections_created.to_string());
        metrics.insert("connections_closed".to_string(), self.connections_closed.to_string());
        metrics.insert("creation_failures".to_string(), self.creation_failures.to_string());
        metrics.insert("creation_retries".to_string(), self.creation_retries.to_string());
        metrics.insert("total_acquired".to_string(), self.total_acquired.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("acquire_timeouts".to_string(), self.acquire_timeouts.to_string());
        metrics.insert("acquire_cancellations".to_string(), self.acquire_cancellations.to_string());
        metrics.insert("broken_discarded".to_string(), self.broken_discarded.to_string());
        metrics.insert("idle".to_string(), self.idle.to_string());
        metrics.insert("on_loan".to_string(), self.on_loan.to_string());
        metrics.insert("capacity".to_string(), self.capacity.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_connectionpool::{ConnectionPool, PoolConfiguration};
    /// use esox_connectionpool::testing::MockFactory;
    /// use std::collections::HashMap;
    ///
    /// let pool = ConnectionPool::new(MockFactory::new(), PoolConfiguration::new("mock").with_pool_size(2)).unwrap();
    /// pool.initialize().unwrap();
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = pool.export_metrics_prometheus("orders", Some(&tags)).unwrap();
    /// assert!(output.contains("connpool_connections_idle"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> Result<String, prometheus::Error> {
        use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};

        let labels = Self::format_labels(pool_name, tags);
        let registry = Registry::new();
        let opts = |name: &str, help: &str| Opts::new(name, help).const_labels(labels.clone());

        let gauges = [
            ("connpool_connections_idle", "Current idle connections", metrics.idle),
            ("connpool_connections_on_loan", "Current lent connections", metrics.on_loan),
            ("connpool_capacity", "Current pool capacity", metrics.capacity),
        ];
        for (name, help, value) in gauges {
            let gauge = IntGauge::with_opts(opts(name, help))?;
            gauge.set(value as i64);
            registry.register(Box::new(gauge))?;
        }

        let utilization = Gauge::with_opts(opts("connpool_utilization", "Pool utilization ratio"))?;
        utilization.set(metrics.utilization);
        registry.register(Box::new(utilization))?;

        let counters = [
            ("connpool_connections_created_total", "Connections opened", metrics.connections_created),
            ("connpool_connections_closed_total", "Connections closed", metrics.connections_closed),
            ("connpool_creation_failures_total", "Failed connection attempts", metrics.creation_failures),
            ("connpool_creation_retries_total", "Connection attempts retried", metrics.creation_retries),
            ("connpool_acquired_total", "Successful acquires", metrics.total_acquired),
            ("connpool_released_total", "Leases returned", metrics.total_released),
            ("connpool_acquire_timeouts_total", "Acquire timeouts", metrics.acquire_timeouts),
            ("connpool_acquire_cancellations_total", "Acquires cancelled", metrics.acquire_cancellations),
            ("connpool_broken_discarded_total", "Connections discarded as broken", metrics.broken_discarded),
        ];
        for (name, help, value) in counters {
            let counter = IntCounter::with_opts(opts(name, help))?;
            counter.inc_by(value as u64);
            registry.register(Box::new(counter))?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        if let Some(tags) = tags {
            labels.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        labels.insert("pool".to_string(), pool_name.to_string());
        labels
    }
}

/// Internal metrics tracker
#[derive(Default)]
pub(crate) struct MetricsTracker {
    pub connections_created: AtomicUsize,
    pub connections_closed: AtomicUsize,
    pub creation_failures: AtomicUsize,
    pub creation_retries: AtomicUsize,
    pub total_acquired: AtomicUsize,
    pub total_released: AtomicUsize,
    pub acquire_timeouts: AtomicUsize,
    pub acquire_cancellations: AtomicUsize,
    pub broken_discarded: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, snapshot: RegistrySnapshot) -> PoolMetrics {
        let utilization = if snapshot.capacity > 0 {
            snapshot.on_loan as f64 / snapshot.capacity as f64
        } else {
            0.0
        };

        PoolMetrics {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            creation_failures: self.creation_failures.load(Ordering::Relaxed),
            creation_retries: self.creation_retries.load(Ordering::Relaxed),
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
            acquire_cancellations: self.acquire_cancellations.load(Ordering::Relaxed),
            broken_discarded: self.broken_discarded.load(Ordering::Relaxed),
            idle: snapshot.idle,
            on_loan: snapshot.on_loan,
            capacity: snapshot.capacity,
            utilization,
        }
    }
}
