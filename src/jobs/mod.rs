//! Job state, storage and live progress streaming.
//!
//! - **types**: the observable `Job` record and its state machine
//! - **registry**: concurrency-safe store of `JobHandle`s with TTL eviction
//! - **publisher**: per-job fan-out of snapshots to bounded subscriber queues

pub mod publisher;
pub mod registry;
pub mod types;

pub use publisher::{PublisherHandle, Subscription, DEFAULT_QUEUE_CAPACITY};
pub use registry::{JobHandle, JobRegistry};
pub use types::{
    Job, JobError, JobStatus, JobSummary, LogEntry, LogLevel, StageRecord, StageStatus,
};

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

// Poisoning is ignored: every critical section leaves the guarded data consistent.

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn read_unpoisoned<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn write_unpoisoned<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
