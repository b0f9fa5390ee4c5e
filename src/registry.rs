//! Bookkeeping for idle and lent connections
//!
//! The registry holds every pool invariant. It is plain data: the pool wraps
//! it in a single mutex and never touches a field outside that lock.

use std::collections::VecDeque;

/// An idle connection waiting in the FIFO
pub(crate) struct IdleEntry<C> {
    pub id: u64,
    pub conn: C,
}

/// What happened to a connection handed back by a lease
pub(crate) enum Returned<C> {
    /// Appended to the idle queue
    Reinserted,
    /// A retirement was pending; the caller closes the connection
    Retired(C),
    /// The lease predates the last drain; the caller closes the connection
    Stale(C),
}

/// Result of [`ConnectionPool::decrease_connection`](crate::ConnectionPool::decrease_connection)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecreaseOutcome {
    /// An idle connection was closed immediately
    Closed,
    /// Every connection is lent out; the next one returned will be closed
    Deferred,
    /// Nothing left to retire
    Unchanged,
}

pub(crate) enum Retirement<C> {
    Now(C),
    Deferred,
    Unchanged,
}

/// Point-in-time copy of the registry counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub idle: usize,
    pub on_loan: usize,
    pub capacity: usize,
    pub pending_retirements: usize,
}

pub(crate) struct Registry<C> {
    idle: VecDeque<IdleEntry<C>>,
    on_loan: usize,
    capacity: usize,
    pending_retirements: usize,
    generation: u64,
    ready: bool,
}

impl<C> Registry<C> {
    pub fn new() -> Self {
        Self {
            idle: VecDeque::new(),
            on_loan: 0,
            capacity: 0,
            pending_retirements: 0,
            generation: 0,
            ready: false,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_idle(&self) -> bool {
        !self.idle.is_empty()
    }

    /// Populate an empty registry; capacity becomes the number installed.
    ///
    /// Hands the connections back if the registry is already in use.
    pub fn install(&mut self, conns: Vec<(u64, C)>) -> Result<usize, Vec<(u64, C)>> {
        if self.ready {
            return Err(conns);
        }

        self.idle = conns
            .into_iter()
            .map(|(id, conn)| IdleEntry { id, conn })
            .collect();
        self.on_loan = 0;
        self.capacity = self.idle.len();
        self.pending_retirements = 0;
        self.ready = true;
        self.check_invariant();
        Ok(self.capacity)
    }

    /// Pop the oldest idle connection. The caller must follow up with
    /// [`lend`](Self::lend) or [`forget_slot`](Self::forget_slot).
    pub fn take_idle(&mut self) -> Option<IdleEntry<C>> {
        self.idle.pop_front()
    }

    pub fn lend(&mut self) {
        self.on_loan += 1;
        self.check_invariant();
    }

    /// Drop the slot of a connection that turned out dead
    pub fn forget_slot(&mut self) {
        self.capacity = self.capacity.saturating_sub(1);
        self.check_invariant();
    }

    pub fn give_back(&mut self, generation: u64, id: u64, conn: C) -> Returned<C> {
        if generation != self.generation || !self.ready {
            return Returned::Stale(conn);
        }

        self.on_loan = self.on_loan.saturating_sub(1);

        if self.pending_retirements > 0 {
            self.pending_retirements -= 1;
            self.capacity = self.capacity.saturating_sub(1);
            self.check_invariant();
            return Returned::Retired(conn);
        }

        self.idle.push_back(IdleEntry { id, conn });
        self.check_invariant();
        Returned::Reinserted
    }

    /// Add a freshly created connection and grow capacity by one
    pub fn add(&mut self, id: u64, conn: C) {
        self.idle.push_back(IdleEntry { id, conn });
        self.capacity += 1;
        self.check_invariant();
    }

    /// Undo one pending retirement instead of creating a new connection
    pub fn cancel_retirement(&mut self) -> bool {
        if self.pending_retirements == 0 {
            return false;
        }
        self.pending_retirements -= 1;
        true
    }

    pub fn retire_one(&mut self) -> Retirement<C> {
        if let Some(entry) = self.idle.pop_front() {
            self.capacity = self.capacity.saturating_sub(1);
            self.check_invariant();
            return Retirement::Now(entry.conn);
        }
        if self.on_loan > self.pending_retirements {
            self.pending_retirements += 1;
            return Retirement::Deferred;
        }
        Retirement::Unchanged
    }

    /// Forget everything and hand back the idle connections for closing
    pub fn drain(&mut self) -> Vec<C> {
        let idle = std::mem::take(&mut self.idle);
        self.on_loan = 0;
        self.capacity = 0;
        self.pending_retirements = 0;
        self.generation += 1;
        self.ready = false;
        idle.into_iter().map(|entry| entry.conn).collect()
    }

    /// Capacity once all pending retirements have happened
    pub fn target_capacity(&self) -> usize {
        self.capacity - self.pending_retirements
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            idle: self.idle.len(),
            on_loan: self.on_loan,
            capacity: self.capacity,
            pending_retirements: self.pending_retirements,
        }
    }

    fn check_invariant(&self) {
        debug_assert!(
            self.idle.len() + self.on_loan <= self.capacity,
            "idle ({}) + on_loan ({}) exceeds capacity ({})",
            self.idle.len(),
            self.on_loan,
            self.capacity
        );
        debug_assert!(self.pending_retirements <= self.on_loan);
    }
}
