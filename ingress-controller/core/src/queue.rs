//! A deduplicating, rate-limited FIFO of sync tasks.
//!
//! Many producers may enqueue keys; a single consumer dequeues them. A key
//! that is enqueued while it is already waiting is collapsed into the waiting
//! entry. A key that is enqueued while it is being processed is held back
//! until the consumer calls [`WorkQueue::done`], so at most one instance of a
//! key is ever in flight.

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::Mutex;
use std::{collections::VecDeque, hash::Hash, sync::Arc};
use tokio::{sync::Notify, time};

const BASE_DELAY: time::Duration = time::Duration::from_millis(5);
const MAX_DELAY: time::Duration = time::Duration::from_secs(300);

#[derive(Debug)]
pub struct WorkQueue<T> {
    inner: Arc<Inner<T>>,
}

#[derive(Copy, Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("work queue is shutting down")]
    ShuttingDown,
}

#[derive(Debug)]
struct Inner<T> {
    state: Mutex<State<T>>,
    notify: Notify,
}

#[derive(Debug)]
struct State<T> {
    queue: VecDeque<T>,
    // Keys that must be (re)delivered: waiting in `queue` or held behind an
    // in-flight instance.
    dirty: HashSet<T>,
    processing: HashSet<T>,
    failures: HashMap<T, u32>,
    shutting_down: bool,
}

// === impl WorkQueue ===

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    failures: HashMap::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Enqueues a key unless it is already waiting.
    pub fn add(&self, item: T) -> Result<(), QueueError> {
        let mut state = self.inner.state.lock();
        if state.shutting_down {
            return Err(QueueError::ShuttingDown);
        }
        if !state.dirty.insert(item.clone()) {
            return Ok(());
        }
        if state.processing.contains(&item) {
            return Ok(());
        }
        state.queue.push_back(item);
        drop(state);
        self.inner.notify.notify_one();
        Ok(())
    }

    /// Waits for the next key. Returns `None` once the queue has been shut
    /// down and drained.
    pub async fn get(&self) -> Option<T> {
        loop {
            {
                let mut state = self.inner.state.lock();
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    /// Marks a key as processed, redelivering it if it was enqueued while in
    /// flight.
    pub fn done(&self, item: &T) {
        let mut state = self.inner.state.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Re-enqueues a failed key after an exponential per-key backoff.
    pub fn requeue(&self, item: T) -> time::Duration {
        let delay = {
            let mut state = self.inner.state.lock();
            let failures = state.failures.entry(item.clone()).or_default();
            let delay = backoff(*failures);
            *failures = failures.saturating_add(1);
            delay
        };
        self.add_after(item, delay);
        delay
    }

    /// Enqueues a key after a delay.
    pub fn add_after(&self, item: T, delay: time::Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = queue.add(item);
        });
    }

    /// Clears the failure history of a key.
    pub fn forget(&self, item: &T) {
        self.inner.state.lock().failures.remove(item);
    }

    pub fn num_requeues(&self, item: &T) -> u32 {
        self.inner
            .state
            .lock()
            .failures
            .get(item)
            .copied()
            .unwrap_or_default()
    }

    /// The number of keys waiting to be dequeued.
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops accepting new keys. The consumer observes `None` after the
    /// waiting keys have been drained.
    pub fn shutdown(&self) {
        self.inner.state.lock().shutting_down = true;
        self.inner.notify.notify_one();
    }
}

fn backoff(failures: u32) -> time::Duration {
    let factor = 2u32.checked_pow(failures).unwrap_or(u32::MAX);
    BASE_DELAY.saturating_mul(factor).min(MAX_DELAY)
}
