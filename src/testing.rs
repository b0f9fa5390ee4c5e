//! In-memory connection factory for tests, demos and benchmarks
//!
//! [`MockFactory`] is cheap to clone; every clone shares the same script and
//! bookkeeping, so a test can keep a handle after giving the factory to a
//! pool.

use crate::connection::{Connection, ConnectionFactory};
use crate::errors::FactoryError;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
struct Script {
    failures: VecDeque<FactoryError>,
    always_fail: Option<FactoryError>,
    dead_on_open: usize,
    prepare_failure: Option<FactoryError>,
}

#[derive(Default)]
struct MockState {
    script: Mutex<Script>,
    connections: Mutex<Vec<Arc<AtomicBool>>>,
    connect_calls: AtomicUsize,
    closed: AtomicUsize,
}

/// Scriptable factory producing [`MockConnection`]s
#[derive(Clone, Default)]
pub struct MockFactory {
    state: Arc<MockState>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` connects with `error`
    pub fn fail_next(&self, count: usize, error: FactoryError) {
        let mut script = self.state.script.lock();
        script.failures.extend(std::iter::repeat_n(error, count));
    }

    /// Fail every connect from now on
    pub fn fail_always(&self, error: FactoryError) {
        self.state.script.lock().always_fail = Some(error);
    }

    /// Stop failing
    pub fn recover(&self) {
        let mut script = self.state.script.lock();
        script.failures.clear();
        script.always_fail = None;
        script.prepare_failure = None;
    }

    /// The next `count` connections report themselves closed right after opening
    pub fn open_dead(&self, count: usize) {
        self.state.script.lock().dead_on_open += count;
    }

    /// Fail every statement registration with `error`
    pub fn fail_prepare(&self, error: FactoryError) {
        self.state.script.lock().prepare_failure = Some(error);
    }

    /// Mark every connection opened so far as dead
    pub fn kill_all(&self) {
        for alive in self.state.connections.lock().iter() {
            alive.store(false, Ordering::SeqCst);
        }
    }

    /// Number of `connect` calls, successful or not
    pub fn connect_calls(&self) -> usize {
        self.state.connect_calls.load(Ordering::SeqCst)
    }

    /// Number of connections opened successfully
    pub fn opened(&self) -> usize {
        self.state.connections.lock().len()
    }

    /// Number of connections closed through [`Connection::close`]
    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }
}

impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    fn connect(&self, target: &str) -> Result<MockConnection, FactoryError> {
        self.state.connect_calls.fetch_add(1, Ordering::SeqCst);

        let (alive, prepare_failure) = {
            let mut script = self.state.script.lock();
            if let Some(error) = script.failures.pop_front() {
                return Err(error);
            }
            if let Some(error) = &script.always_fail {
                return Err(error.clone());
            }
            let alive = if script.dead_on_open > 0 {
                script.dead_on_open -= 1;
                false
            } else {
                true
            };
            (alive, script.prepare_failure.clone())
        };

        let flag = Arc::new(AtomicBool::new(alive));
        let id = {
            let mut connections = self.state.connections.lock();
            connections.push(Arc::clone(&flag));
            connections.len()
        };

        Ok(MockConnection {
            id,
            target: target.to_string(),
            alive: flag,
            closed: false,
            prepared: BTreeMap::new(),
            prepare_failure,
            state: Arc::clone(&self.state),
        })
    }
}

/// Connection handed out by [`MockFactory`]
pub struct MockConnection {
    id: usize,
    target: String,
    alive: Arc<AtomicBool>,
    closed: bool,
    prepared: BTreeMap<String, String>,
    prepare_failure: Option<FactoryError>,
    state: Arc<MockState>,
}

impl MockConnection {
    /// Unique per factory, starting at 1
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Definition registered under `name`
    pub fn statement(&self, name: &str) -> Option<&str> {
        self.prepared.get(name).map(String::as_str)
    }

    pub fn statement_count(&self) -> usize {
        self.prepared.len()
    }

    /// Simulate the backend dropping this connection
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

impl Connection for MockConnection {
    fn is_alive(&self) -> bool {
        !self.closed && self.alive.load(Ordering::SeqCst)
    }

    fn prepare(&mut self, name: &str, definition: &str) -> Result<(), FactoryError> {
        if let Some(error) = &self.prepare_failure {
            return Err(error.clone());
        }
        self.prepared.insert(name.to_string(), definition.to_string());
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.alive.store(false, Ordering::SeqCst);
            self.state.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
