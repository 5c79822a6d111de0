//! In-memory work queue implementation.

use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{ItemState, QueueItem, RetryPolicy, deadline_after};
use crate::domain::ResourceKey;
use crate::observability::QueueStats;

/// Delayed entry for the priority queue.
///
/// Reverse ordering so BinaryHeap acts as a min-heap (earliest first).
#[derive(Debug)]
struct Delayed<K> {
    ready_at: Instant,
    seq: u64,
    key: K,
}

impl<K> PartialEq for Delayed<K> {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl<K> Eq for Delayed<K> {}

impl<K> PartialOrd for Delayed<K> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Delayed<K> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct WorkQueueState<K> {
    /// Eligible keys in arrival order. A key is here at most once.
    queue: VecDeque<K>,

    /// Keys that need processing (queued, or re-added while in flight).
    dirty: HashSet<K>,

    /// Keys handed out by `get` and not `done` yet.
    processing: HashSet<K>,

    /// Earliest eligible time per delayed key.
    waiting: HashMap<K, Instant>,

    /// Heap over `waiting`; may contain superseded entries.
    delayed: BinaryHeap<Delayed<K>>,

    /// Consecutive failures per key.
    failures: HashMap<K, u32>,

    enqueued_at: HashMap<K, Instant>,

    seq: u64,
    shutting_down: bool,
    retry_policy: RetryPolicy,
}

impl<K: Clone + Eq + Hash> WorkQueueState<K> {
    fn new(retry_policy: RetryPolicy) -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            waiting: HashMap::new(),
            delayed: BinaryHeap::new(),
            failures: HashMap::new(),
            enqueued_at: HashMap::new(),
            seq: 0,
            shutting_down: false,
            retry_policy,
        }
    }

    /// Mark `key` dirty. Returns true when it was pushed onto the ready queue.
    fn insert(&mut self, key: K, now: Instant) -> bool {
        if self.dirty.contains(&key) {
            return false;
        }
        self.dirty.insert(key.clone());
        self.enqueued_at.entry(key.clone()).or_insert(now);
        if self.processing.contains(&key) {
            // picked up again on done()
            return false;
        }
        self.queue.push_back(key);
        true
    }

    /// Returns true when `ready_at` became the key's earliest eligible time.
    fn schedule(&mut self, key: K, ready_at: Instant) -> bool {
        if let Some(existing) = self.waiting.get(&key)
            && *existing <= ready_at
        {
            return false;
        }
        self.waiting.insert(key.clone(), ready_at);
        self.seq += 1;
        self.delayed.push(Delayed {
            ready_at,
            seq: self.seq,
            key,
        });
        true
    }

    /// Move delayed keys whose time has come to the ready queue.
    fn promote_delayed(&mut self, now: Instant) {
        while let Some(entry) = self.delayed.peek() {
            if entry.ready_at > now {
                break;
            }
            let Some(entry) = self.delayed.pop() else {
                break;
            };
            if self.waiting.get(&entry.key) == Some(&entry.ready_at) {
                self.waiting.remove(&entry.key);
                self.insert(entry.key, now);
            }
        }
    }

    fn next_wake(&self) -> Option<Instant> {
        self.delayed.peek().map(|entry| entry.ready_at)
    }

    fn take_next(&mut self) -> Option<K> {
        let key = self.queue.pop_front()?;
        self.dirty.remove(&key);
        self.enqueued_at.remove(&key);
        self.processing.insert(key.clone());
        Some(key)
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.queue.len(),
            in_flight: self.processing.len(),
            delayed: self.waiting.len(),
            failing: self.failures.len(),
            shutting_down: self.shutting_down,
        }
    }
}

/// Deduplicating, delayable queue of keys awaiting reconciliation.
///
/// - a key is pending at most once, however often it is added
/// - a key handed out by `get` is not handed out again until `done`
/// - an `add` during processing makes the key eligible again on `done`
pub struct WorkQueue<K = ResourceKey> {
    state: Mutex<WorkQueueState<K>>,
    notify: Notify,
}

impl<K: Clone + Eq + Hash + Send> WorkQueue<K> {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self {
            state: Mutex::new(WorkQueueState::new(retry_policy)),
            notify: Notify::new(),
        }
    }

    /// Make `key` eligible. No-op while shutting down.
    pub async fn add(&self, key: K) {
        let pushed = {
            let mut state = self.state.lock().await;
            if state.shutting_down {
                return;
            }
            state.insert(key, Instant::now())
        };
        if pushed {
            self.notify.notify_one();
        }
    }

    /// Make `key` eligible after `delay`. Keeps the earliest of several delays.
    pub async fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            return self.add(key).await;
        }
        let rescheduled = {
            let mut state = self.state.lock().await;
            if state.shutting_down {
                return;
            }
            let ready_at = deadline_after(delay);
            state.schedule(key, ready_at)
        };
        // a sleeping get() may need to wake up earlier
        if rescheduled {
            self.notify.notify_one();
        }
    }

    /// Record a failure for `key` and schedule it with backoff.
    ///
    /// Returns the delay used, `None` while shutting down.
    pub async fn add_rate_limited(&self, key: K) -> Option<Duration> {
        let (rescheduled, delay) = {
            let mut state = self.state.lock().await;
            if state.shutting_down {
                return None;
            }
            let failures = {
                let count = state.failures.entry(key.clone()).or_insert(0);
                *count = count.saturating_add(1);
                *count
            };
            let delay = state.retry_policy.next_delay(failures);
            let ready_at = deadline_after(delay);
            (state.schedule(key, ready_at), delay)
        };
        if rescheduled {
            self.notify.notify_one();
        }
        Some(delay)
    }

    /// Reset the failure count of `key`.
    pub async fn forget(&self, key: &K) {
        self.state.lock().await.failures.remove(key);
    }

    pub async fn num_requeues(&self, key: &K) -> u32 {
        self.state
            .lock()
            .await
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Wait for the next eligible key and mark it in flight.
    ///
    /// Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            // register before inspecting state so a concurrent add/shutdown is not missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut state = self.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                state.promote_delayed(Instant::now());
                if let Some(key) = state.take_next() {
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        // promotion may have released several keys at once
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
                state.next_wake()
            };

            match wake_at {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {},
                        _ = tokio::time::sleep_until(at) => {},
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Non-blocking `get`.
    pub async fn try_get(&self) -> Option<K> {
        let mut state = self.state.lock().await;
        if state.shutting_down {
            return None;
        }
        state.promote_delayed(Instant::now());
        state.take_next()
    }

    /// Release the in-flight mark of `key`.
    pub async fn done(&self, key: &K) {
        let requeued = {
            let mut state = self.state.lock().await;
            state.processing.remove(key);
            if !state.shutting_down && state.dirty.contains(key) {
                state.queue.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.notify.notify_one();
        }
    }

    /// Stop handing out work. Pending and delayed keys are dropped, every
    /// blocked `get` returns `None`, later adds are ignored.
    pub async fn shut_down(&self) {
        {
            let mut state = self.state.lock().await;
            state.shutting_down = true;
            state.queue.clear();
            state.dirty.clear();
            state.waiting.clear();
            state.delayed.clear();
            state.enqueued_at.clear();
        }
        self.notify.notify_waiters();
    }

    pub async fn is_shutting_down(&self) -> bool {
        self.state.lock().await.shutting_down
    }

    /// Number of eligible keys.
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> QueueStats {
        self.state.lock().await.stats()
    }

    /// Scheduling metadata of `key`, `None` when the queue does not track it.
    pub async fn item(&self, key: &K) -> Option<QueueItem<K>> {
        let state = self.state.lock().await;
        let in_flight = state.processing.contains(key);
        let dirty = state.dirty.contains(key);
        let eligible_at = state.waiting.get(key).copied();
        let item_state = match (in_flight, dirty, eligible_at) {
            (true, true, _) => ItemState::InFlightDirty,
            (true, false, _) => ItemState::InFlight,
            (false, true, _) => ItemState::Pending,
            (false, false, Some(_)) => ItemState::Delayed,
            (false, false, None) => return None,
        };
        Some(QueueItem {
            key: key.clone(),
            state: item_state,
            enqueued_at: state.enqueued_at.get(key).copied(),
            retries: state.failures.get(key).copied().unwrap_or(0),
            eligible_at,
        })
    }
}

impl<K: Clone + Eq + Hash + Send> Default for WorkQueue<K> {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
