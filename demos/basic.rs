//! Basic usage of ConnectionPool against the in-memory factory

use esox_connectionpool::testing::MockFactory;
use esox_connectionpool::{ConnectionPool, PoolConfiguration, PoolError};
use std::time::Duration;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== EsoxSolutions.ConnectionPool - Basic Examples ===\n");

    let config = PoolConfiguration::new("dbname=test user=postgres host=localhost port=5432")
        .with_pool_size(3)
        .with_timeout(Duration::from_millis(200))
        .with_statement("find_user", "SELECT * FROM users WHERE id = $1")
        .with_statement("insert_user", "INSERT INTO users (name, email) VALUES ($1, $2)");

    let pool = match ConnectionPool::new(MockFactory::new(), config) {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    // Opening no connection at all is fatal for startup.
    if let Err(e) = pool.initialize() {
        eprintln!("could not start pool: {e}");
        std::process::exit(1);
    }

    simple_lease(&pool);
    exhaustion(&pool);
    resizing(&pool);
    metrics_and_health(&pool);

    pool.drain();
    println!("Drained - capacity now {}", pool.current_capacity());
}

fn simple_lease(pool: &ConnectionPool<MockFactory>) {
    println!("1. Simple Lease:");
    {
        let conn = pool.acquire().unwrap();
        println!("   Got connection {}", conn.connection_id());
        println!("   find_user => {:?}", conn.statement("find_user"));
        // Connection automatically returned when dropped
    }
    println!("   Idle after return: {}\n", pool.idle_count());
}

fn exhaustion(pool: &ConnectionPool<MockFactory>) {
    println!("2. Exhaustion:");
    let held: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
    println!("   On loan: {}, idle: {}", pool.on_loan_count(), pool.idle_count());

    match pool.acquire() {
        Err(PoolError::Timeout(after)) => println!("   Fourth acquire timed out after {after:?}"),
        other => println!("   Unexpected: {other:?}"),
    }

    drop(held);
    println!("   Idle after release: {}\n", pool.idle_count());
}

fn resizing(pool: &ConnectionPool<MockFactory>) {
    println!("3. Resizing:");
    println!("   Capacity: {}", pool.current_capacity());
    println!("   Decrease: {:?}", pool.decrease_connection());
    println!("   Capacity: {}", pool.current_capacity());
    pool.increase_connection().unwrap();
    println!("   Capacity after increase: {}\n", pool.current_capacity());
}

fn metrics_and_health(pool: &ConnectionPool<MockFactory>) {
    println!("4. Metrics and Health:");
    let _conn = pool.acquire().unwrap();

    let health = pool.get_health_status();
    println!("   Health: {}", if health.is_healthy { "Healthy" } else { "Unhealthy" });
    println!("   Utilization: {:.1}%", health.utilization * 100.0);

    let mut metrics: Vec<_> = pool.export_metrics().into_iter().collect();
    metrics.sort();
    for (key, value) in metrics {
        println!("     {key}: {value}");
    }
    println!();
}
