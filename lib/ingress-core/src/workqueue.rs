//! Rate limited work queue
//!
//! Keys are deduplicated while pending: adding a key that is already queued
//! replaces its payload, so the latest event for a key is the one processed.
//! A key is never handed to two workers at once; adding a key that is being
//! processed parks it until `done` is called for it.
//!
//! Every fresh add bumps a per-key generation when it is requested. Delayed
//! adds and retries that land after a newer request are dropped, and neither
//! retries nor nudges displace an event that is already pending.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

/// Per-item backoff with a fast regime for the first failures followed by a
/// fixed slow delay
#[derive(Debug)]
pub struct FastSlowRateLimiter {
    fast_delay: Duration,
    slow_delay: Duration,
    max_fast_attempts: u32,
    failures: Mutex<HashMap<String, u32>>,
}

impl FastSlowRateLimiter {
    pub fn new(fast_delay: Duration, slow_delay: Duration, max_fast_attempts: u32) -> Self {
        Self {
            fast_delay,
            slow_delay,
            max_fast_attempts,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Delay before the next attempt for `key`; counts as one attempt
    pub fn when(&self, key: &str) -> Duration {
        let mut failures = lock(&self.failures);
        let attempts = failures.entry(key.to_string()).or_insert(0);
        *attempts += 1;
        self.backoff_duration(*attempts)
    }

    /// Delay for the given 1-based attempt number
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        if attempt > self.max_fast_attempts {
            return self.slow_delay;
        }
        let exponential = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.fast_delay
            .saturating_mul(exponential)
            .min(self.slow_delay)
    }

    pub fn forget(&self, key: &str) {
        lock(&self.failures).remove(key);
    }

    pub fn num_requeues(&self, key: &str) -> u32 {
        lock(&self.failures).get(key).copied().unwrap_or(0)
    }
}

impl Default for FastSlowRateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 5)
    }
}

/// Where a queued payload came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Source {
    /// A new event; replaces whatever is pending
    Fresh,
    /// Another attempt at the item that just failed
    Retry,
    /// A request to look at the key again, with no intent of its own
    Nudge,
}

struct Pending<T> {
    generation: u64,
    source: Source,
    item: T,
}

struct QueueState<T> {
    queue: VecDeque<String>,
    dirty: HashMap<String, Pending<T>>,
    /// Generation of the item each worker is holding
    processing: HashMap<String, u64>,
    /// Generation of the newest fresh add requested per key
    generations: HashMap<String, u64>,
    shutting_down: bool,
}

impl<T> QueueState<T> {
    fn latest(&self, key: &str) -> u64 {
        self.generations.get(key).copied().unwrap_or(0)
    }
}

pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    limiter: FastSlowRateLimiter,
}

impl<T: Send + 'static> WorkQueue<T> {
    pub fn new(limiter: FastSlowRateLimiter) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashMap::new(),
                processing: HashMap::new(),
                generations: HashMap::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            limiter,
        }
    }

    /// Queue `item` under `key`, replacing any payload still pending for it
    pub fn add(&self, key: &str, item: T) {
        let generation = self.request(key);
        self.insert(key, generation, Source::Fresh, item);
    }

    /// Queue `item` once the rate limiter allows another attempt for `key`.
    /// It is dropped if a newer add for `key` is requested meanwhile.
    pub fn add_rate_limited(self: &Arc<Self>, key: &str, item: T) {
        let generation = self.request(key);
        self.schedule(key, generation, Source::Fresh, item);
    }

    /// Like `add_rate_limited`, but never displaces a pending payload
    pub fn add_rate_limited_if_absent(self: &Arc<Self>, key: &str, item: T) {
        let generation = lock(&self.state).latest(key);
        self.schedule(key, generation, Source::Nudge, item);
    }

    /// Retry the item currently held for `key`; call before `done`. The retry
    /// is dropped if a newer add was requested since the item was queued.
    pub fn requeue(self: &Arc<Self>, key: &str, item: T) {
        let generation = {
            let state = lock(&self.state);
            state
                .processing
                .get(key)
                .copied()
                .unwrap_or_else(|| state.latest(key))
        };
        self.schedule(key, generation, Source::Retry, item);
    }

    fn request(&self, key: &str) -> u64 {
        let mut state = lock(&self.state);
        let generation = state.generations.entry(key.to_string()).or_insert(0);
        *generation += 1;
        *generation
    }

    fn schedule(self: &Arc<Self>, key: &str, generation: u64, source: Source, item: T) {
        let delay = self.limiter.when(key);
        if delay.is_zero() {
            self.insert(key, generation, source, item);
            return;
        }
        let queue = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.insert(&key, generation, source, item);
        });
    }

    fn insert(&self, key: &str, generation: u64, source: Source, item: T) {
        let mut state = lock(&self.state);
        if state.shutting_down {
            return;
        }
        let latest = state.latest(key);
        if source != Source::Nudge && generation != latest {
            trace!(key = %key, generation, latest, "dropping outdated item");
            return;
        }

        let pending = Pending {
            generation,
            source,
            item,
        };
        if let Some(current) = state.dirty.get(key).map(|queued| queued.source) {
            let replace = match source {
                Source::Fresh => true,
                Source::Retry => current == Source::Nudge,
                Source::Nudge => false,
            };
            if replace {
                state.dirty.insert(key.to_string(), pending);
            }
            trace!(key = %key, replaced = replace, "coalesced pending item");
            return;
        }

        state.dirty.insert(key.to_string(), pending);
        if state.processing.contains_key(key) {
            return;
        }
        state.queue.push_back(key.to_string());
        drop(state);
        self.notify.notify_one();
    }

    /// Next key and its payload; `None` once the queue is shut down
    pub async fn get(&self) -> Option<(String, T)> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = lock(&self.state);
                while let Some(key) = state.queue.pop_front() {
                    if let Some(pending) = state.dirty.remove(&key) {
                        state.processing.insert(key.clone(), pending.generation);
                        return Some((key, pending.item));
                    }
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark `key` as processed, requeueing it if it was added meanwhile
    pub fn done(&self, key: &str) {
        let mut state = lock(&self.state);
        state.processing.remove(key);
        if state.dirty.contains_key(key) && !state.shutting_down {
            state.queue.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Reset the retry history of `key`
    pub fn forget(&self, key: &str) {
        self.limiter.forget(key);
    }

    pub fn num_requeues(&self, key: &str) -> u32 {
        self.limiter.num_requeues(key)
    }

    /// Stop handing out items and wake every waiting worker
    pub fn shutdown(&self) {
        lock(&self.state).shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        lock(&self.state).shutting_down
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        lock(&self.state).queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> Arc<WorkQueue<u32>> {
        Arc::new(WorkQueue::new(FastSlowRateLimiter::new(
            Duration::from_millis(1),
            Duration::from_millis(10),
            3,
        )))
    }

    #[test]
    fn test_fast_then_slow_backoff() {
        let limiter = FastSlowRateLimiter::default();
        assert_eq!(limiter.when("a"), Duration::from_secs(1));
        assert_eq!(limiter.when("a"), Duration::from_secs(2));
        assert_eq!(limiter.when("a"), Duration::from_secs(4));
        assert_eq!(limiter.when("a"), Duration::from_secs(8));
        assert_eq!(limiter.when("a"), Duration::from_secs(16));
        assert_eq!(limiter.when("a"), Duration::from_secs(60));
        assert_eq!(limiter.when("a"), Duration::from_secs(60));
        assert_eq!(limiter.num_requeues("a"), 7);

        // Other keys keep their own history
        assert_eq!(limiter.when("b"), Duration::from_secs(1));

        limiter.forget("a");
        assert_eq!(limiter.num_requeues("a"), 0);
        assert_eq!(limiter.when("a"), Duration::from_secs(1));
    }

    #[test]
    fn test_fast_regime_capped_at_slow_delay() {
        let limiter = FastSlowRateLimiter::new(Duration::from_secs(10), Duration::from_secs(30), 10);
        assert_eq!(limiter.backoff_duration(1), Duration::from_secs(10));
        assert_eq!(limiter.backoff_duration(2), Duration::from_secs(20));
        assert_eq!(limiter.backoff_duration(3), Duration::from_secs(30));
        assert_eq!(limiter.backoff_duration(40), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_pending_key_keeps_latest_payload() {
        let q = queue();
        q.add("ns/a", 1);
        q.add("ns/b", 2);
        q.add("ns/a", 3);
        assert_eq!(q.len(), 2);

        assert_eq!(q.get().await, Some(("ns/a".to_string(), 3)));
        assert_eq!(q.get().await, Some(("ns/b".to_string(), 2)));
    }

    #[tokio::test]
    async fn test_key_added_while_processing_waits_for_done() {
        let q = queue();
        q.add("ns/a", 1);
        let (key, _) = q.get().await.unwrap();

        q.add("ns/a", 2);
        assert!(q.is_empty());

        q.done(&key);
        assert_eq!(q.get().await, Some(("ns/a".to_string(), 2)));
    }

    #[tokio::test]
    async fn test_rate_limited_add_is_delivered() {
        let q = queue();
        q.add_rate_limited("ns/a", 7);
        let got = tokio::time::timeout(Duration::from_secs(1), q.get()).await.unwrap();
        assert_eq!(got, Some(("ns/a".to_string(), 7)));
        assert_eq!(q.num_requeues("ns/a"), 1);
        q.forget("ns/a");
        assert_eq!(q.num_requeues("ns/a"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_does_not_displace_newer_event() {
        let q = queue();
        q.add("ns/a", 1);
        let (key, item) = q.get().await.unwrap();

        // A delete arrives while the add is being processed, then the add fails
        q.add_rate_limited("ns/a", 2);
        q.requeue(&key, item);
        q.done(&key);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(q.get().await, Some(("ns/a".to_string(), 2)));
        assert!(q.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outdated_delayed_add_is_dropped() {
        let q = queue();
        q.add_rate_limited("ns/a", 1);
        q.add_rate_limited("ns/a", 1);
        q.forget("ns/a");
        // Shortest delay again, but requested last
        q.add_rate_limited("ns/a", 2);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(q.get().await, Some(("ns/a".to_string(), 2)));
        assert!(q.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_of_latest_event_is_delivered() {
        let q = queue();
        q.add("ns/a", 1);
        let (key, item) = q.get().await.unwrap();
        q.requeue(&key, item);
        q.done(&key);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(q.get().await, Some(("ns/a".to_string(), 1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nudge_keeps_pending_event() {
        let q = queue();
        q.add("ns/a", 2);
        q.add_rate_limited_if_absent("ns/a", 9);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(q.get().await, Some(("ns/a".to_string(), 2)));
        assert!(q.is_empty());

        q.done("ns/a");
        q.add_rate_limited_if_absent("ns/a", 9);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(q.get().await, Some(("ns/a".to_string(), 9)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_replaces_pending_nudge() {
        let q = queue();
        q.add("ns/a", 2);
        let (key, item) = q.get().await.unwrap();

        q.add_rate_limited_if_absent("ns/a", 9);
        tokio::time::sleep(Duration::from_millis(100)).await;
        q.requeue(&key, item);
        q.done(&key);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(q.get().await, Some(("ns/a".to_string(), 2)));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiting_workers() {
        let q = queue();
        let waiter = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;
        q.shutdown();
        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, None);

        q.add("ns/a", 1);
        assert!(q.is_empty());
    }
}
