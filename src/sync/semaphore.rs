//! Bounded-concurrency gate with a priority-ordered wait queue.
//!
//! Every fetch (listing or media) holds one unit while active. Under
//! contention the highest-priority waiter is woken first; callers pass the
//! engine's ever-increasing offset as priority, so requests issued later in
//! the run outrank ones still waiting from earlier. That bias toward the
//! most recently discovered work can starve long-parked waiters and is kept
//! deliberately.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Counting semaphore whose waiters are served in max-priority order.
pub struct PrioritySemaphore {
    inner: Mutex<Inner>,
}

struct Inner {
    capacity: usize,
    allocated: usize,
    next_seq: u64,
    waiters: BinaryHeap<Waiter>,
}

struct Waiter {
    priority: u64,
    seq: u64,
    tx: oneshot::Sender<()>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    /// Highest priority first; FIFO among equal priorities.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

impl PrioritySemaphore {
    /// Create a semaphore with `capacity` units.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Arc<Self> {
        assert!(capacity > 0, "invalid capacity");

        Arc::new(Self {
            inner: Mutex::new(Inner {
                capacity,
                allocated: 0,
                next_seq: 0,
                waiters: BinaryHeap::new(),
            }),
        })
    }

    /// Take one unit, parking behind higher-priority waiters when at
    /// capacity. Returns `Error::Cancelled` without a unit once `cancel`
    /// fires.
    pub async fn acquire(
        self: &Arc<Self>,
        priority: u64,
        cancel: &CancellationToken,
    ) -> Result<AdmissionGuard> {
        let (mut rx, seq) = {
            let mut inner = self.inner.lock().unwrap();

            if inner.allocated < inner.capacity {
                inner.allocated += 1;
                return Ok(AdmissionGuard {
                    semaphore: Arc::clone(self),
                });
            }

            let (tx, rx) = oneshot::channel();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.waiters.push(Waiter { priority, seq, tx });
            (rx, seq)
        };

        tokio::select! {
            result = &mut rx => match result {
                Ok(()) => Ok(AdmissionGuard {
                    semaphore: Arc::clone(self),
                }),
                // The sender is only dropped without sending when the
                // semaphore itself is gone.
                Err(_) => Err(Error::Cancelled),
            },
            _ = cancel.cancelled() => {
                let mut inner = self.inner.lock().unwrap();
                if rx.try_recv().is_ok() {
                    // A release handed us a unit as we gave up; put it back.
                    Self::release_locked(&mut inner);
                } else {
                    inner.waiters.retain(|w| w.seq != seq);
                }
                Err(Error::Cancelled)
            }
        }
    }

    /// Number of parked waiters.
    #[cfg(test)]
    fn waiting(&self) -> usize {
        self.inner.lock().unwrap().waiters.len()
    }

    fn release(&self) {
        let mut inner = self.inner.lock().unwrap();
        Self::release_locked(&mut inner);
    }

    fn release_locked(inner: &mut Inner) {
        inner.allocated -= 1;

        // Hand freed units to the highest-priority waiters. A waiter whose
        // receiver is already gone refuses the hand-off; skip it.
        while inner.allocated < inner.capacity {
            let Some(waiter) = inner.waiters.pop() else {
                break;
            };
            if waiter.tx.send(()).is_ok() {
                inner.allocated += 1;
            }
        }
    }
}

/// One allocated admission unit, released on drop.
pub struct AdmissionGuard {
    semaphore: Arc<PrioritySemaphore>,
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}
