//! RAII handle for a borrowed connection

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identifies one lease to the pool when it comes back
#[derive(Debug, Clone, Copy)]
pub(crate) struct LeaseTicket {
    pub id: u64,
    pub generation: u64,
    pub acquired_at: Instant,
}

pub(crate) type ReturnFn<C> = Arc<dyn Fn(C, LeaseTicket) + Send + Sync>;

/// A pooled connection that automatically returns to the pool when dropped
///
/// The handle is the only owner of the connection while it is lent out. It
/// cannot be cloned, and dropping it (on any exit path) is the only way the
/// connection goes back to the pool.
pub struct PooledConnection<C> {
    conn: Option<C>,
    ticket: LeaseTicket,
    return_fn: ReturnFn<C>,
}

impl<C> PooledConnection<C> {
    pub(crate) fn new(conn: C, ticket: LeaseTicket, return_fn: ReturnFn<C>) -> Self {
        Self {
            conn: Some(conn),
            ticket,
            return_fn,
        }
    }

    /// Pool-assigned id of the wrapped connection
    pub fn connection_id(&self) -> u64 {
        self.ticket.id
    }

    /// How long this lease has been held
    pub fn held_for(&self) -> Duration {
        self.ticket.acquired_at.elapsed()
    }

    /// Give the connection back to the pool now
    pub fn release(self) {
        drop(self);
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        // Only `Drop` takes the connection out.
        match self.conn.as_ref() {
            Some(conn) => conn,
            None => unreachable!("connection already returned"),
        }
    }
}

impl<C> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.conn.as_mut() {
            Some(conn) => conn,
            None => unreachable!("connection already returned"),
        }
    }
}

impl<C> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection_id", &self.ticket.id)
            .field("held_for", &self.held_for())
            .finish()
    }
}

impl<C> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            (self.return_fn)(conn, self.ticket);
        }
    }
}
