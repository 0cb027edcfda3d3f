//! Per-job progress fan-out.
//!
//! Each job owns one publisher task. The job handle pushes a snapshot onto an
//! unbounded channel after every mutation; the task forwards it to a bounded
//! queue per subscriber. Publishing never waits on subscribers: when a queue is
//! full the oldest buffered snapshot is discarded. The terminal snapshot is
//! always the last one pushed, so it can never be the one discarded, and the
//! queue is closed right after it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::Stream;
use tokio::sync::{mpsc, oneshot, Notify};

use super::lock_unpoisoned;
use super::types::Job;
use crate::metrics;

/// Default number of snapshots buffered per subscriber.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

enum PublisherCommand {
    Publish(Arc<Job>),
    Subscribe(oneshot::Sender<Subscription>),
}

/// Sending side of a job's publisher task.
#[derive(Clone)]
pub struct PublisherHandle {
    tx: mpsc::UnboundedSender<PublisherCommand>,
}

impl PublisherHandle {
    /// Spawns the publisher task for a job, seeded with its initial snapshot.
    pub fn spawn(initial: Job, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_publisher(rx, Arc::new(initial), queue_capacity.max(1)));
        Self { tx }
    }

    /// Queues a snapshot for fan-out. Never blocks.
    pub fn publish(&self, snapshot: Arc<Job>) {
        if self.tx.send(PublisherCommand::Publish(snapshot)).is_err() {
            tracing::debug!("Publisher task gone; dropping snapshot");
        }
    }

    /// Registers a new subscriber.
    ///
    /// The returned subscription yields the latest snapshot first. Returns
    /// `None` if the publisher task has stopped.
    pub async fn subscribe(&self) -> Option<Subscription> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(PublisherCommand::Subscribe(reply_tx)).ok()?;
        reply_rx.await.ok()
    }
}

async fn run_publisher(
    mut rx: mpsc::UnboundedReceiver<PublisherCommand>,
    mut latest: Arc<Job>,
    capacity: usize,
) {
    let mut subscribers: Vec<SubscriberQueue> = Vec::new();

    while let Some(command) = rx.recv().await {
        match command {
            PublisherCommand::Publish(snapshot) => {
                latest = snapshot;
                let terminal = latest.is_terminal();
                subscribers.retain(|s| !s.is_abandoned());
                for subscriber in &subscribers {
                    subscriber.push(Arc::clone(&latest), terminal);
                }
                if terminal {
                    subscribers.clear();
                }
            }
            PublisherCommand::Subscribe(reply) => {
                let queue = SubscriberQueue::new(capacity);
                let terminal = latest.is_terminal();
                queue.push(Arc::clone(&latest), terminal);
                if !terminal {
                    subscribers.push(queue.clone());
                }
                let _ = reply.send(Subscription { queue });
            }
        }
    }

    for subscriber in subscribers {
        subscriber.close();
    }
}

struct QueueState {
    items: VecDeque<Arc<Job>>,
    closed: bool,
    dropped: u64,
}

struct QueueInner {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

#[derive(Clone)]
struct SubscriberQueue {
    inner: Arc<QueueInner>,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    items: VecDeque::with_capacity(capacity),
                    closed: false,
                    dropped: 0,
                }),
                notify: Notify::new(),
                capacity,
            }),
        }
    }

    fn push(&self, snapshot: Arc<Job>, close_after: bool) {
        {
            let mut state = lock_unpoisoned(&self.inner.state);
            if state.closed {
                return;
            }
            if state.items.len() >= self.inner.capacity {
                state.items.pop_front();
                state.dropped += 1;
                metrics::record_dropped_update();
            }
            state.items.push_back(snapshot);
            if close_after {
                state.closed = true;
            }
        }
        self.inner.notify.notify_one();
    }

    fn close(&self) {
        lock_unpoisoned(&self.inner.state).closed = true;
        self.inner.notify.notify_one();
    }

    /// True once the subscriber side has been dropped.
    fn is_abandoned(&self) -> bool {
        Arc::strong_count(&self.inner) == 1
    }
}

/// Receiving side of a job progress subscription.
pub struct Subscription {
    queue: SubscriberQueue,
}

impl Subscription {
    /// Waits for the next snapshot. Returns `None` after the terminal snapshot.
    pub async fn recv(&mut self) -> Option<Arc<Job>> {
        loop {
            {
                let mut state = lock_unpoisoned(&self.queue.inner.state);
                if let Some(snapshot) = state.items.pop_front() {
                    return Some(snapshot);
                }
                if state.closed {
                    return None;
                }
            }
            self.queue.inner.notify.notified().await;
        }
    }

    /// Number of snapshots discarded because this subscriber fell behind.
    pub fn dropped(&self) -> u64 {
        lock_unpoisoned(&self.queue.inner.state).dropped
    }

    /// Converts the subscription into a stream of snapshots.
    pub fn into_stream(self) -> impl Stream<Item = Arc<Job>> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|snapshot| (snapshot, sub))
        })
    }
}
