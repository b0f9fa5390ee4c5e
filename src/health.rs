//! Health monitoring for connection pools

use crate::registry::RegistrySnapshot;
use std::time::Duration;

/// Health status of a connection pool
///
/// # Examples
///
/// ```
/// use esox_connectionpool::{ConnectionPool, PoolConfiguration};
/// use esox_connectionpool::testing::MockFactory;
///
/// let pool = ConnectionPool::new(MockFactory::new(), PoolConfiguration::new("mock").with_pool_size(3)).unwrap();
/// pool.initialize().unwrap();
///
/// let health = pool.get_health_status();
/// assert!(health.is_healthy());
/// assert_eq!(health.idle_connections, 3);
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// Current pool utilization (0.0 to 1.0)
    pub utilization: f64,

    pub idle_connections: usize,

    pub on_loan_connections: usize,

    pub capacity: usize,

    /// Configured pool size
    pub requested_size: usize,

    pub pending_retirements: usize,

    /// Longest time any current lease has been held
    pub longest_lease: Option<Duration>,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    pub(crate) fn new(
        snapshot: RegistrySnapshot,
        requested_size: usize,
        longest_lease: Option<Duration>,
        lease_warning_threshold: Option<Duration>,
    ) -> Self {
        let utilization = if snapshot.capacity > 0 {
            snapshot.on_loan as f64 / snapshot.capacity as f64
        } else {
            0.0
        };

        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if snapshot.capacity == 0 {
            warnings.push("Pool has no connections".to_string());
            is_healthy = false;
        }

        if utilization > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", utilization * 100.0));
            is_healthy = false;
        }

        if snapshot.idle == 0 && snapshot.capacity > 0 {
            warnings.push("No idle connections".to_string());
        }

        if snapshot.capacity < requested_size && snapshot.capacity > 0 {
            warnings.push(format!(
                "Running below configured size: {} of {} connections",
                snapshot.capacity, requested_size
            ));
        }

        if snapshot.pending_retirements > 0 {
            warnings.push(format!(
                "{} connection(s) waiting to be retired",
                snapshot.pending_retirements
            ));
        }

        if let (Some(longest), Some(threshold)) = (longest_lease, lease_warning_threshold)
            && longest > threshold
        {
            warnings.push(format!("Lease held for {:?}", longest));
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization,
            idle_connections: snapshot.idle,
            on_loan_connections: snapshot.on_loan,
            capacity: snapshot.capacity,
            requested_size,
            pending_retirements: snapshot.pending_retirements,
            longest_lease,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}
