//! Pool configuration options

use crate::errors::{PoolError, PoolResult};
use std::collections::HashSet;
use std::time::Duration;

/// A named operation registered on every connection right after it opens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub name: String,
    pub definition: String,
}

impl Statement {
    pub fn new(name: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definition: definition.into(),
        }
    }
}

/// Configuration for connection pool behavior
///
/// # Examples
///
/// ```
/// use esox_connectionpool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new("dbname=test user=postgres")
///     .with_pool_size(10)
///     .with_timeout(Duration::from_secs(5))
///     .with_statement("find_user", "SELECT * FROM users WHERE id = $1");
///
/// assert_eq!(config.pool_size, 10);
/// assert_eq!(config.statements.len(), 1);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfiguration {
    /// Connection string handed to the factory
    pub target: String,

    /// Number of connections `initialize` tries to open
    pub pool_size: usize,

    /// How long `acquire` waits for an idle connection
    pub acquire_timeout: Duration,

    /// Statements prepared on each new connection, in order
    pub statements: Vec<Statement>,

    /// Attempts per slot during initialization on broken-connection failures
    pub connect_attempts: usize,

    /// Pause between two attempts on the same slot
    pub retry_delay: Duration,

    /// Leases held longer than this are reported by the health check
    pub lease_warning_threshold: Option<Duration>,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            target: String::new(),
            pool_size: 10,
            acquire_timeout: Duration::from_secs(5),
            statements: Vec::new(),
            connect_attempts: 5,
            retry_delay: Duration::ZERO,
            lease_warning_threshold: None,
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration for the given connection string
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    /// Set the number of connections opened by `initialize`
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the acquire timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Register a statement to prepare on every connection
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_connectionpool::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::new("dbname=test")
    ///     .with_statement("find_user", "SELECT * FROM users WHERE id = $1")
    ///     .with_statement("insert_user", "INSERT INTO users (name, email) VALUES ($1, $2)");
    ///
    /// assert_eq!(config.statements[1].name, "insert_user");
    /// ```
    pub fn with_statement(mut self, name: impl Into<String>, definition: impl Into<String>) -> Self {
        self.statements.push(Statement::new(name, definition));
        self
    }

    pub fn with_connect_attempts(mut self, attempts: usize) -> Self {
        self.connect_attempts = attempts;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Report leases held longer than `threshold` as a health warning
    pub fn with_lease_warning_threshold(mut self, threshold: Duration) -> Self {
        self.lease_warning_threshold = Some(threshold);
        self
    }

    /// Check the configuration for values the pool cannot work with
    pub fn validate(&self) -> PoolResult<()> {
        if self.pool_size == 0 {
            return Err(PoolError::InvalidConfiguration(
                "pool_size must be positive".to_string(),
            ));
        }
        if self.connect_attempts == 0 {
            return Err(PoolError::InvalidConfiguration(
                "connect_attempts must be positive".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for statement in &self.statements {
            if statement.name.is_empty() {
                return Err(PoolError::InvalidConfiguration(
                    "statement name must not be empty".to_string(),
                ));
            }
            if !seen.insert(statement.name.as_str()) {
                return Err(PoolError::InvalidConfiguration(format!(
                    "duplicate statement name '{}'",
                    statement.name
                )));
            }
        }
        Ok(())
    }
}
