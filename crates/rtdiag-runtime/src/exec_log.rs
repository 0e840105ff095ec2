//! Bounded execution log of per-job timing records.
//!
//! The log is an arena allocated once at construction. Appends copy a
//! record into the next free slot under a blocking mutex; once every slot
//! is used further records are rejected with [`CapacityExceeded`] and
//! discarded. Nothing is ever overwritten and the arena never grows.
//!
//! # Locking
//!
//! Writers hold the lock only for the slot copy, never across the job's
//! compute phase. The report emitter holds it once, at the end, while it
//! walks the records in append order.

use rtdiag_common::task::JobRecord;
use static_assertions::assert_impl_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Append rejected because every slot is in use.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("execution log full ({capacity} records)")]
pub struct CapacityExceeded {
    /// Fixed capacity of the log.
    pub capacity: usize,
}

/// Preallocated slots plus the append cursor.
#[derive(Debug)]
struct Arena {
    slots: Box<[JobRecord]>,
    /// Number of slots in use; the next append goes to `slots[len]`.
    len: usize,
}

/// Fixed-capacity, append-only record buffer shared by all job runners.
#[derive(Debug)]
pub struct ExecutionLog {
    arena: Mutex<Arena>,
    capacity: usize,
    /// Records rejected since construction or the last reset.
    dropped: AtomicU64,
}

assert_impl_all!(ExecutionLog: Send, Sync);

impl ExecutionLog {
    /// Create a log with room for `capacity` records (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            arena: Mutex::new(Arena {
                slots: vec![JobRecord::default(); capacity].into_boxed_slice(),
                len: 0,
            }),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Acquire the arena. A runner that panicked mid-append cannot leave a
    /// half-written slot visible (the cursor moves after the copy), so a
    /// poisoned lock is still safe to use.
    fn arena(&self) -> MutexGuard<'_, Arena> {
        self.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one record.
    ///
    /// Returns the slot index on success.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityExceeded`] when the log is full; the record is
    /// discarded and the caller is not expected to retry.
    pub fn append(&self, record: JobRecord) -> Result<usize, CapacityExceeded> {
        let mut arena = self.arena();
        let idx = arena.len;
        if idx >= arena.slots.len() {
            drop(arena);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(CapacityExceeded {
                capacity: self.capacity,
            });
        }
        arena.slots[idx] = record;
        arena.len = idx + 1;
        Ok(idx)
    }

    /// Run `f` over the retained records in append order while holding the lock.
    pub fn with_records<R>(&self, f: impl FnOnce(&[JobRecord]) -> R) -> R {
        let arena = self.arena();
        f(&arena.slots[..arena.len])
    }

    /// Copy of the retained records in append order.
    #[must_use]
    pub fn records(&self) -> Vec<JobRecord> {
        self.with_records(<[JobRecord]>::to_vec)
    }

    /// Number of retained records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.arena().len
    }

    /// Returns true if no record has been retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fixed capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true once every slot is in use.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Records rejected for lack of space.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Forget every record and the drop count. The arena is reused as is.
    pub fn reset(&self) {
        let mut arena = self.arena();
        arena.len = 0;
        self.dropped.store(0, Ordering::Relaxed);
    }
}
