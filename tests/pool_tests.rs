use esox_connectionpool::testing::MockFactory;
use esox_connectionpool::{
    ConnectionPool, DecreaseOutcome, FactoryError, PoolConfiguration, PoolError, RegistrySnapshot,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

fn pool_with(size: usize, timeout: Duration) -> (ConnectionPool<MockFactory>, MockFactory) {
    let factory = MockFactory::new();
    let config = PoolConfiguration::new("dbname=test user=postgres")
        .with_pool_size(size)
        .with_timeout(timeout)
        .with_statement("test_query", "SELECT 1");
    let pool = ConnectionPool::new(factory.clone(), config).unwrap();
    (pool, factory)
}

fn assert_within_capacity(snapshot: RegistrySnapshot) {
    assert!(
        snapshot.idle + snapshot.on_loan <= snapshot.capacity,
        "{snapshot:?} exceeds capacity"
    );
}

#[test]
fn test_basic_scenario() {
    let (pool, _) = pool_with(3, Duration::from_secs(2));
    pool.initialize().unwrap();
    assert_eq!(pool.idle_count(), 3);
    assert_eq!(pool.on_loan_count(), 0);

    let first = pool.acquire().unwrap();
    assert_eq!((pool.on_loan_count(), pool.idle_count()), (1, 2));

    let second = pool.acquire().unwrap();
    let _third = pool.acquire().unwrap();
    assert_eq!((pool.on_loan_count(), pool.idle_count()), (3, 0));

    let started = Instant::now();
    assert!(matches!(pool.acquire(), Err(PoolError::Timeout(_))));
    assert!(started.elapsed() >= Duration::from_secs(2));

    drop(first);
    assert_eq!(pool.idle_count(), 1);

    let retried = pool.acquire().unwrap();
    assert_eq!(retried.statement("test_query"), Some("SELECT 1"));
    drop(second);
}

#[test]
fn test_round_trip_restores_registry() {
    let (pool, _) = pool_with(3, Duration::from_secs(1));
    pool.initialize().unwrap();
    let before = pool.snapshot();

    {
        let _conn = pool.acquire().unwrap();
        assert_ne!(pool.snapshot(), before);
    }

    assert_eq!(pool.snapshot(), before);
}

#[test]
fn test_fifo_idle_selection() {
    let (pool, _) = pool_with(2, Duration::from_secs(1));
    pool.initialize().unwrap();

    let first_id = pool.acquire().unwrap().id();
    // The connection just returned went to the back of the queue.
    let next_id = pool.acquire().unwrap().id();
    assert_ne!(first_id, next_id);
}

#[test]
fn test_timeout_boundary() {
    let (pool, _) = pool_with(2, Duration::from_millis(100));
    pool.initialize().unwrap();
    let _a = pool.acquire().unwrap();
    let _b = pool.acquire().unwrap();
    let before = pool.snapshot();

    let started = Instant::now();
    let err = pool.acquire().unwrap_err();
    let waited = started.elapsed();

    assert!(matches!(err, PoolError::Timeout(d) if d == Duration::from_millis(100)));
    assert!(waited >= Duration::from_millis(100), "returned after {waited:?}");
    assert!(waited < Duration::from_secs(2), "waited {waited:?}");
    assert_eq!(pool.snapshot(), before);
    assert_eq!(pool.get_metrics().acquire_timeouts, 1);
}

#[test]
fn test_release_wakes_blocked_acquire() {
    let (pool, _) = pool_with(1, Duration::from_secs(5));
    pool.initialize().unwrap();
    let held = pool.acquire().unwrap();

    let waiter = {
        let pool = pool.clone();
        std::thread::spawn(move || pool.acquire().map(|conn| conn.id()))
    };

    std::thread::sleep(Duration::from_millis(50));
    let held_id = held.id();
    drop(held);

    assert_eq!(waiter.join().unwrap().unwrap(), held_id);
    assert_eq!(pool.idle_count(), 1);
}

#[test]
fn test_cancelled_waiter_passes_wakeup_on() {
    let (pool, _) = pool_with(1, Duration::from_secs(5));
    pool.initialize().unwrap();
    let held = pool.acquire().unwrap();

    let token = esox_connectionpool::CancellationToken::new();
    let cancelled = {
        let pool = pool.clone();
        let token = token.clone();
        std::thread::spawn(move || pool.acquire_with_cancel(&token).map(|_| ()))
    };
    std::thread::sleep(Duration::from_millis(20));

    let plain = {
        let pool = pool.clone();
        std::thread::spawn(move || {
            let started = Instant::now();
            pool.acquire().map(|_| started.elapsed())
        })
    };
    std::thread::sleep(Duration::from_millis(20));

    token.cancel();
    drop(held);

    assert!(matches!(cancelled.join().unwrap(), Err(PoolError::Cancelled)));
    let waited = plain.join().unwrap().unwrap();
    assert!(waited < Duration::from_secs(1), "plain waiter blocked for {waited:?}");
    assert_eq!(pool.idle_count(), 1);
}

#[test]
fn test_initialize_retries_transient_failures() {
    let (pool, factory) = pool_with(3, Duration::from_secs(1));
    factory.fail_next(4, FactoryError::Transient("connection reset".into()));

    assert_eq!(pool.initialize().unwrap(), 3);
    assert_eq!(factory.connect_calls(), 7);
    assert_eq!(pool.get_metrics().creation_retries, 4);
}

#[test]
fn test_initialize_accepts_partial_pool() {
    let (pool, factory) = pool_with(3, Duration::from_secs(1));
    // The first slot burns all five attempts, the others succeed.
    factory.fail_next(5, FactoryError::Transient("connection reset".into()));

    assert_eq!(pool.initialize().unwrap(), 2);
    assert_eq!(pool.current_capacity(), 2);
    assert_eq!(pool.idle_count() + pool.on_loan_count(), 2);
    assert!(pool.get_health_status().warnings[0].contains("2 of 3"));
}

#[test]
fn test_dead_on_open_counts_as_broken_connection() {
    let (pool, factory) = pool_with(2, Duration::from_secs(1));
    factory.open_dead(2);

    // Slot 0 needs three attempts, the others one each.
    assert_eq!(pool.initialize().unwrap(), 2);
    assert_eq!(factory.connect_calls(), 5);
    assert_eq!(factory.closed(), 2);
}

#[test]
fn test_initialize_fails_when_nothing_opens() {
    let (pool, factory) = pool_with(3, Duration::from_secs(1));
    factory.fail_always(FactoryError::Transient("no route to host".into()));

    match pool.initialize() {
        Err(PoolError::FatalInit { requested, attempts }) => {
            assert_eq!(requested, 3);
            assert_eq!(attempts, 15);
        }
        other => panic!("expected FatalInit, got {other:?}"),
    }
    assert_eq!(factory.connect_calls(), 15);
    assert!(!pool.is_ready());

    factory.recover();
    assert_eq!(pool.initialize().unwrap(), 3);
}

#[test]
fn test_permanent_failure_aborts_initialize() {
    let (pool, factory) = pool_with(3, Duration::from_secs(1));
    factory.fail_prepare(FactoryError::Permanent("syntax error".into()));

    assert!(matches!(
        pool.initialize(),
        Err(PoolError::Factory(FactoryError::Permanent(_)))
    ));
    assert_eq!(factory.connect_calls(), 1);
    assert_eq!(factory.closed(), factory.opened());
    assert!(!pool.is_ready());
}

#[test]
fn test_drain_clears_state() {
    let (pool, factory) = pool_with(3, Duration::from_secs(1));
    pool.initialize().unwrap();
    {
        let _conn = pool.acquire().unwrap();
        assert_eq!(pool.on_loan_count(), 1);
    }

    assert_eq!(pool.drain(), 3);
    assert_eq!(
        pool.snapshot(),
        RegistrySnapshot { idle: 0, on_loan: 0, capacity: 0, pending_retirements: 0 }
    );
    assert_eq!(pool.current_capacity(), 0);
    assert_eq!(factory.closed(), 3);
    assert!(matches!(pool.acquire(), Err(PoolError::NotInitialized)));

    assert_eq!(pool.initialize().unwrap(), 3);
    assert!(pool.acquire().is_ok());
}

#[test]
fn test_lease_outliving_drain_is_closed() {
    let (pool, factory) = pool_with(2, Duration::from_secs(1));
    pool.initialize().unwrap();
    let lease = pool.acquire().unwrap();

    pool.drain();
    pool.initialize().unwrap();
    drop(lease);

    assert_eq!(pool.snapshot().capacity, 2);
    assert_eq!(pool.idle_count(), 2);
    assert_eq!(pool.on_loan_count(), 0);
    assert_eq!(factory.closed(), 2);
}

#[test]
fn test_drain_wakes_waiters() {
    let (pool, _) = pool_with(1, Duration::from_secs(5));
    pool.initialize().unwrap();
    let _held = pool.acquire().unwrap();

    let waiter = {
        let pool = pool.clone();
        std::thread::spawn(move || pool.acquire().map(|_| ()))
    };
    std::thread::sleep(Duration::from_millis(50));
    pool.drain();

    assert!(matches!(waiter.join().unwrap(), Err(PoolError::NotInitialized)));
}

#[test]
fn test_resize_round_trip() {
    let (pool, _) = pool_with(2, Duration::from_secs(1));
    pool.initialize().unwrap();
    assert_eq!(pool.current_capacity(), 2);

    assert_eq!(pool.decrease_connection(), DecreaseOutcome::Closed);
    assert_eq!(pool.current_capacity(), 1);

    pool.increase_connection().unwrap();
    assert_eq!(pool.current_capacity(), 2);
    assert_eq!(pool.idle_count(), 2);
}

#[test]
fn test_increase_adds_usable_connection() {
    let (pool, _) = pool_with(1, Duration::from_millis(50));
    pool.initialize().unwrap();
    let _held = pool.acquire().unwrap();

    pool.increase_connection().unwrap();
    let extra = pool.acquire().unwrap();
    assert_eq!(extra.statement_count(), 1);
    assert_eq!(pool.current_capacity(), 2);
}

#[test]
fn test_increase_failure_keeps_capacity() {
    let (pool, factory) = pool_with(2, Duration::from_secs(1));
    pool.initialize().unwrap();
    factory.fail_next(1, FactoryError::Transient("connection reset".into()));

    assert!(matches!(
        pool.increase_connection(),
        Err(PoolError::Factory(FactoryError::Transient(_)))
    ));
    assert_eq!(pool.current_capacity(), 2);
}

#[test]
fn test_decrease_with_everything_on_loan() {
    let (pool, factory) = pool_with(2, Duration::from_millis(50));
    pool.initialize().unwrap();
    let a = pool.acquire().unwrap();
    let b = pool.acquire().unwrap();

    let started = Instant::now();
    assert_eq!(pool.decrease_connection(), DecreaseOutcome::Deferred);
    assert!(started.elapsed() < Duration::from_millis(50));
    assert_eq!(pool.current_capacity(), 1);
    assert_eq!(pool.pending_retirements(), 1);

    drop(a);
    assert_eq!(factory.closed(), 1);
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.snapshot().capacity, 1);

    drop(b);
    assert_eq!(pool.idle_count(), 1);
    assert_eq!(pool.current_capacity(), 1);
}

#[test]
fn test_decrease_down_to_nothing() {
    let (pool, _) = pool_with(1, Duration::from_millis(50));
    pool.initialize().unwrap();

    assert_eq!(pool.decrease_connection(), DecreaseOutcome::Closed);
    assert_eq!(pool.decrease_connection(), DecreaseOutcome::Unchanged);
    assert_eq!(pool.current_capacity(), 0);
    assert!(matches!(pool.acquire(), Err(PoolError::Timeout(_))));
}

#[test]
fn test_increase_cancels_pending_retirement() {
    let (pool, factory) = pool_with(1, Duration::from_millis(50));
    pool.initialize().unwrap();
    let held = pool.acquire().unwrap();

    assert_eq!(pool.decrease_connection(), DecreaseOutcome::Deferred);
    pool.increase_connection().unwrap();
    assert_eq!(factory.opened(), 1);
    assert_eq!(pool.current_capacity(), 1);

    drop(held);
    assert_eq!(pool.idle_count(), 1);
    assert_eq!(factory.closed(), 0);
}

#[test]
fn test_concurrent_acquire_release() {
    const THREADS: usize = 20;
    const CAPACITY: usize = 10;

    let (pool, _) = pool_with(CAPACITY, Duration::from_secs(5));
    pool.initialize().unwrap();

    let in_use: Arc<parking_lot::Mutex<HashSet<usize>>> = Arc::default();
    let stop = AtomicBool::new(false);
    let cycles = AtomicUsize::new(0);

    crossbeam::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|_| {
                while !stop.load(Ordering::Relaxed) {
                    let conn = match pool.acquire() {
                        Ok(conn) => conn,
                        Err(PoolError::Timeout(_)) => continue,
                        Err(e) => panic!("unexpected error: {e}"),
                    };
                    assert!(in_use.lock().insert(conn.id()), "connection lent twice");

                    let snapshot = pool.snapshot();
                    assert!(snapshot.on_loan <= snapshot.capacity);
                    assert_within_capacity(snapshot);

                    std::thread::yield_now();
                    assert!(in_use.lock().remove(&conn.id()));
                    drop(conn);
                    cycles.fetch_add(1, Ordering::Relaxed);
                }
            });
        }

        std::thread::sleep(Duration::from_millis(300));
        stop.store(true, Ordering::Relaxed);
    })
    .unwrap();

    assert!(cycles.load(Ordering::Relaxed) > 0);
    assert_eq!(
        pool.snapshot(),
        RegistrySnapshot { idle: CAPACITY, on_loan: 0, capacity: CAPACITY, pending_retirements: 0 }
    );
    let metrics = pool.get_metrics();
    assert_eq!(metrics.total_acquired, metrics.total_released);
}

#[test]
fn test_concurrent_resize_keeps_invariant() {
    let (pool, _) = pool_with(4, Duration::from_millis(20));
    pool.initialize().unwrap();
    let stop = AtomicBool::new(false);

    crossbeam::scope(|scope| {
        for _ in 0..6 {
            scope.spawn(|_| {
                while !stop.load(Ordering::Relaxed) {
                    if let Ok(conn) = pool.acquire() {
                        assert_within_capacity(pool.snapshot());
                        drop(conn);
                    }
                }
            });
        }
        scope.spawn(|_| {
            while !stop.load(Ordering::Relaxed) {
                pool.decrease_connection();
                assert_within_capacity(pool.snapshot());
                pool.increase_connection().unwrap();
                assert_within_capacity(pool.snapshot());
            }
        });

        std::thread::sleep(Duration::from_millis(200));
        stop.store(true, Ordering::Relaxed);
    })
    .unwrap();

    let snapshot = pool.snapshot();
    assert_eq!(snapshot.on_loan, 0);
    assert_eq!(snapshot.pending_retirements, 0);
    assert_eq!(snapshot.idle, snapshot.capacity);
    assert_eq!(pool.current_capacity(), 4);
}
