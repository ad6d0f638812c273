//! Pending-session queue between the acceptor and the worker pool.
//!
//! A bounded FIFO: the acceptor blocks on a full queue (that block is the
//! server's admission backpressure) and workers block on an empty one.
//! Shutdown is sticky; once set, pushes fail without consuming the session
//! and pops drain to `None`, and every blocked thread is woken to observe
//! the flag.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::session::Session;

#[derive(Debug)]
struct Inner {
    pending: VecDeque<Session>,
    shutdown: bool,
}

/// Bounded handoff of accepted sessions to the worker pool.
#[derive(Debug)]
pub(crate) struct SessionQueue {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl SessionQueue {
    pub(crate) fn new(capacity: usize) -> SessionQueue {
        SessionQueue {
            inner: Mutex::new(Inner {
                pending: VecDeque::with_capacity(capacity),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Hands a session to the pool, blocking while the queue is full.
    /// After shutdown the session is handed back instead.
    pub(crate) fn push(&self, session: Session) -> Result<(), Session> {
        let mut inner = self.inner.lock();
        loop {
            if inner.shutdown {
                return Err(session);
            }
            if inner.pending.len() < self.capacity {
                break;
            }
            self.not_full.wait(&mut inner);
        }
        inner.pending.push_back(session);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Takes the oldest pending session, blocking while the queue is
    /// empty. `None` means the queue was shut down.
    pub(crate) fn pop(&self) -> Option<Session> {
        let mut inner = self.inner.lock();
        loop {
            if inner.shutdown {
                return None;
            }
            if let Some(session) = inner.pending.pop_front() {
                self.not_full.notify_one();
                return Some(session);
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Marks the queue shut down and wakes every blocked thread.
    pub(crate) fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.shutdown = true;
        // Both sides must wake to observe the flag; notify with the lock
        // held so no waiter slips between the store and the wake-up.
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }
}
