//! Concurrency-safe job store.
//!
//! The registry is the only structure shared between API handlers and
//! orchestrator runs. Both the map lock and each job's own mutex are held only
//! for the bookkeeping itself, never across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::publisher::{PublisherHandle, Subscription};
use super::types::{Job, JobStatus, JobSummary, LogLevel};
use super::{lock_unpoisoned, read_unpoisoned, write_unpoisoned};

/// Shared handle to one job's state and its publisher.
pub struct JobHandle {
    job_id: String,
    job: Mutex<Job>,
    publisher: PublisherHandle,
}

impl JobHandle {
    /// Wraps a job and spawns its publisher task.
    pub fn new(job: Job, queue_capacity: usize) -> Self {
        let publisher = PublisherHandle::spawn(job.clone(), queue_capacity);
        Self {
            job_id: job.job_id.clone(),
            job: Mutex::new(job),
            publisher,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Clones the current state of the job.
    pub fn snapshot(&self) -> Job {
        lock_unpoisoned(&self.job).clone()
    }

    pub fn status(&self) -> JobStatus {
        lock_unpoisoned(&self.job).status
    }

    /// When the job reached a terminal status, if it has.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        lock_unpoisoned(&self.job).finished_at
    }

    /// Builds the list entry without cloning logs or stage records.
    pub fn summary(&self) -> JobSummary {
        JobSummary::from(&*lock_unpoisoned(&self.job))
    }

    /// Applies a mutation and publishes the resulting snapshot.
    ///
    /// The snapshot is queued while the lock is still held so subscribers
    /// observe mutations in exactly the order they were applied.
    pub fn update<R>(&self, mutate: impl FnOnce(&mut Job) -> R) -> R {
        let mut job = lock_unpoisoned(&self.job);
        let out = mutate(&mut job);
        self.publisher.publish(Arc::new(job.clone()));
        out
    }

    /// Appends a log entry to the job.
    pub fn log(&self, level: LogLevel, message: impl Into<String>, stage_index: Option<usize>) {
        let message = message.into();
        self.update(|job| job.push_log(level, message, stage_index));
    }

    /// Opens a progress subscription for this job.
    pub async fn subscribe(&self) -> Option<Subscription> {
        self.publisher.subscribe().await
    }
}

/// Store of all jobs known to this process.
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<JobHandle>>>,
    ttl: Duration,
    queue_capacity: usize,
}

impl JobRegistry {
    /// Creates an empty registry.
    ///
    /// Terminal jobs older than `ttl` are removed by [`JobRegistry::evict_expired`].
    pub fn new(ttl: Duration, queue_capacity: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            ttl,
            queue_capacity,
        }
    }

    /// Creates and stores a new pending job.
    pub fn create<S: AsRef<str>>(
        &self,
        source_reference: impl Into<String>,
        stage_names: &[S],
    ) -> Arc<JobHandle> {
        let job_id = Uuid::new_v4().to_string();
        let job = Job::new(job_id.clone(), source_reference, stage_names);
        let handle = Arc::new(JobHandle::new(job, self.queue_capacity));
        write_unpoisoned(&self.jobs).insert(job_id, Arc::clone(&handle));
        handle
    }

    pub fn get(&self, job_id: &str) -> Option<Arc<JobHandle>> {
        read_unpoisoned(&self.jobs).get(job_id).cloned()
    }

    pub fn snapshot(&self, job_id: &str) -> Option<Job> {
        self.get(job_id).map(|handle| handle.snapshot())
    }

    /// Lists jobs, newest first.
    pub fn list(&self) -> Vec<JobSummary> {
        let handles: Vec<Arc<JobHandle>> = read_unpoisoned(&self.jobs).values().cloned().collect();
        let mut summaries: Vec<JobSummary> = handles.iter().map(|h| h.summary()).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    /// Removes a job. Running orchestrators keep their own handle and finish normally.
    pub fn remove(&self, job_id: &str) -> bool {
        write_unpoisoned(&self.jobs).remove(job_id).is_some()
    }

    pub fn len(&self) -> usize {
        read_unpoisoned(&self.jobs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops terminal jobs that finished more than `ttl` ago. Returns the count removed.
    pub fn evict_expired(&self) -> usize {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();

        let expired: Vec<String> = {
            let jobs = read_unpoisoned(&self.jobs);
            jobs.iter()
                .filter(|(_, handle)| {
                    // finished_at is only set on the transition to a terminal status
                    handle
                        .finished_at()
                        .is_some_and(|finished| now - finished >= ttl)
                })
                .map(|(id, _)| id.clone())
                .collect()
        };

        if expired.is_empty() {
            return 0;
        }

        let mut jobs = write_unpoisoned(&self.jobs);
        let removed = expired
            .iter()
            .filter(|id| jobs.remove(id.as_str()).is_some())
            .count();
        tracing::debug!(removed, remaining = jobs.len(), "Evicted expired jobs");
        removed
    }

    /// Starts a background task that calls [`JobRegistry::evict_expired`] every `interval`.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // skip the immediate first tick
            loop {
                tick.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.evict_expired();
            }
        })
    }
}
