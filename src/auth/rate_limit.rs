//! Per-client rate limiting.
//!
//! Provides a sliding window rate limiter keyed by client identity. The quota
//! is passed on each call as a [`Policy`], so the strict login policy and the
//! lenient general policy share one code path and one limiter.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::PolicyConfig;

/// A quota: at most `limit` admitted requests per trailing `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub limit: usize,
    pub window: Duration,
}

impl Policy {
    pub const fn new(limit: usize, window: Duration) -> Self {
        Self { limit, window }
    }

    /// 5 attempts per 5 minutes.
    pub const fn login() -> Self {
        Self::new(5, Duration::from_secs(300))
    }

    /// 100 requests per minute.
    pub const fn api() -> Self {
        Self::new(100, Duration::from_secs(60))
    }

    /// 60 requests per minute.
    pub const fn general() -> Self {
        Self::new(60, Duration::from_secs(60))
    }
}

impl From<PolicyConfig> for Policy {
    fn from(config: PolicyConfig) -> Self {
        Self::new(config.limit, Duration::from_secs(config.window_seconds))
    }
}

/// Shortest interval accepted by [`RateLimiter::start_sweep_task`].
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Admitted request instants for one key.
#[derive(Debug)]
struct Window {
    /// Window last used to admit on this key; the sweep prunes with it.
    span: Duration,
    hits: VecDeque<Instant>,
}

impl Window {
    fn new(span: Duration) -> Self {
        Self {
            span,
            hits: VecDeque::new(),
        }
    }

    /// Drop hits whose age is at least `span`. Hits are pushed in order, so
    /// stale ones are always at the front.
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) >= self.span {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }
}

/// A sliding window rate limiter that tracks requests per key.
///
/// All state sits behind one mutex, so the prune, check and record steps of
/// [`RateLimiter::admit`] are atomic with respect to each other and to
/// [`RateLimiter::sweep`].
pub struct RateLimiter<K = String> {
    windows: Mutex<HashMap<K, Window>>,
}

impl<K> RateLimiter<K>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty rate limiter.
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Window>> {
        self.windows.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check if a request for `key` is allowed under `policy` and record it.
    ///
    /// Returns `true` if the request is admitted, `false` if rate limited.
    pub fn admit(&self, key: &K, policy: Policy) -> bool {
        self.admit_at(key, policy, Instant::now())
    }

    /// Like [`RateLimiter::admit`] with an explicit current instant.
    pub fn admit_at(&self, key: &K, policy: Policy, now: Instant) -> bool {
        let mut windows = self.lock();

        let window = windows
            .entry(key.clone())
            .or_insert_with(|| Window::new(policy.window));

        window.span = policy.window;
        window.prune(now);

        if window.hits.len() >= policy.limit {
            return false;
        }

        window.hits.push_back(now);
        true
    }

    /// Number of requests `key` could still make under `policy` right now,
    /// without recording anything.
    pub fn remaining(&self, key: &K, policy: Policy) -> usize {
        self.remaining_at(key, policy, Instant::now())
    }

    /// Like [`RateLimiter::remaining`] with an explicit current instant.
    pub fn remaining_at(&self, key: &K, policy: Policy, now: Instant) -> usize {
        let windows = self.lock();

        let used = windows.get(key).map_or(0, |window| {
            window
                .hits
                .iter()
                .filter(|&&t| now.saturating_duration_since(t) < policy.window)
                .count()
        });

        policy.limit.saturating_sub(used)
    }

    /// Prune stale hits for every key and forget keys left with none.
    ///
    /// Returns the number of keys removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Like [`RateLimiter::sweep`] with an explicit current instant.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut windows = self.lock();
        let before = windows.len();

        windows.retain(|_, window| {
            window.prune(now);
            !window.hits.is_empty()
        });

        before - windows.len()
    }

    /// Get the number of keys being tracked.
    pub fn tracked_keys(&self) -> usize {
        self.lock().len()
    }
}

impl<K> RateLimiter<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    /// Start a background sweep task.
    ///
    /// Spawns a tokio task that calls [`RateLimiter::sweep`] every `interval`
    /// until the returned handle is stopped. Intervals shorter than
    /// [`MIN_SWEEP_INTERVAL`] are raised to it.
    pub fn start_sweep_task(self: &Arc<Self>, interval: Duration) -> SweepHandle {
        let interval = if interval < MIN_SWEEP_INTERVAL {
            warn!(
                requested_ms = interval.as_millis() as u64,
                "Sweep interval too short, using minimum"
            );
            MIN_SWEEP_INTERVAL
        } else {
            interval
        };

        let limiter = Arc::clone(self);
        let shutdown = Arc::new(Notify::new());
        let stop = Arc::clone(&shutdown);

        let task = tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            // The first tick completes immediately.
            interval_timer.tick().await;
            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        let removed = limiter.sweep();
                        if removed > 0 {
                            debug!(removed, remaining = limiter.tracked_keys(), "Rate limiter sweep");
                        }
                    }
                    _ = stop.notified() => break,
                }
            }
        });

        info!(interval_ms = interval.as_millis() as u64, "Rate limiter sweep started");

        SweepHandle { shutdown, task }
    }
}

impl<K> Default for RateLimiter<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running sweep task.
///
/// Dropping the handle leaves the task running for the life of the runtime.
pub struct SweepHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Stop scheduling sweeps and wait for the task to exit.
    ///
    /// A sweep already underway runs to completion first.
    pub async fn stop(self) {
        // notify_one stores a permit, so a task busy sweeping still sees it.
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            error!(error = %e, "Sweep task ended abnormally");
        }
        info!("Rate limiter sweep stopped");
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_rate_limiter_allows_under_limit() {
        let limiter = RateLimiter::new();
        let policy = Policy::new(5, MINUTE);

        for _ in 0..5 {
            assert!(limiter.admit(&"10.0.0.1".to_string(), policy));
        }
    }

    #[test]
    fn test_rate_limiter_blocks_over_limit() {
        let limiter = RateLimiter::new();
        let policy = Policy::new(3, MINUTE);
        let key = "10.0.0.1".to_string();
        let now = Instant::now();

        assert!(limiter.admit_at(&key, policy, now));
        assert!(limiter.admit_at(&key, policy, now));
        assert!(limiter.admit_at(&key, policy, now));
        assert!(!limiter.admit_at(&key, policy, now));
    }

    #[test]
    fn test_rate_limiter_separate_keys() {
        let limiter = RateLimiter::new();
        let policy = Policy::new(2, MINUTE);
        let now = Instant::now();

        assert!(limiter.admit_at(&1000u32, policy, now));
        assert!(limiter.admit_at(&1000u32, policy, now));
        assert!(!limiter.admit_at(&1000u32, policy, now));

        // Another key still has its full quota
        assert!(limiter.admit_at(&1001u32, policy, now));
        assert!(limiter.admit_at(&1001u32, policy, now));
        assert!(!limiter.admit_at(&1001u32, policy, now));
    }

    #[test]
    fn test_rate_limiter_window_expiry() {
        let limiter = RateLimiter::new();
        let policy = Policy::new(2, MINUTE);
        let start = Instant::now();

        assert!(limiter.admit_at(&"k", policy, start));
        assert!(limiter.admit_at(&"k", policy, start));
        assert!(!limiter.admit_at(&"k", policy, start + Duration::from_secs(59)));

        // A hit whose age equals the window no longer counts.
        assert!(limiter.admit_at(&"k", policy, start + MINUTE));
    }

    #[test]
    fn test_sliding_not_fixed_window() {
        let limiter = RateLimiter::new();
        let policy = Policy::new(2, MINUTE);
        let start = Instant::now();

        assert!(limiter.admit_at(&"k", policy, start));
        assert!(limiter.admit_at(&"k", policy, start + Duration::from_secs(30)));
        // First hit has aged out, second has not.
        assert!(limiter.admit_at(&"k", policy, start + Duration::from_secs(61)));
        assert!(!limiter.admit_at(&"k", policy, start + Duration::from_secs(62)));
    }

    #[test]
    fn test_rejection_does_not_grow_window() {
        let limiter = RateLimiter::new();
        let policy = Policy::new(1, MINUTE);
        let start = Instant::now();

        assert!(limiter.admit_at(&"k", policy, start));
        for i in 1..50 {
            assert!(!limiter.admit_at(&"k", policy, start + Duration::from_secs(i)));
        }
        // Only the admitted hit counts, so the key frees up a window after it.
        assert!(limiter.admit_at(&"k", policy, start + MINUTE));
    }

    #[test]
    fn test_zero_limit_always_rejects() {
        let limiter = RateLimiter::new();
        let policy = Policy::new(0, MINUTE);

        assert!(!limiter.admit(&"k", policy));
        assert!(!limiter.admit(&"k", policy));
        assert_eq!(limiter.remaining(&"k", policy), 0);
    }

    #[test]
    fn test_remaining() {
        let limiter = RateLimiter::new();
        let policy = Policy::new(3, MINUTE);
        let now = Instant::now();

        assert_eq!(limiter.remaining_at(&"k", policy, now), 3);
        limiter.admit_at(&"k", policy, now);
        limiter.admit_at(&"k", policy, now);
        assert_eq!(limiter.remaining_at(&"k", policy, now), 1);
        assert_eq!(limiter.remaining_at(&"k", policy, now + MINUTE), 3);
        // Checking does not record.
        assert_eq!(limiter.remaining_at(&"k", policy, now), 1);
    }

    #[test]
    fn test_rate_limiter_sweep() {
        let limiter = RateLimiter::new();
        let policy = Policy::new(10, MINUTE);
        let start = Instant::now();

        limiter.admit_at(&1000u32, policy, start);
        limiter.admit_at(&1001u32, policy, start);
        limiter.admit_at(&1002u32, policy, start + Duration::from_secs(30));
        assert_eq!(limiter.tracked_keys(), 3);

        // Nothing has aged out yet.
        assert_eq!(limiter.sweep_at(start + Duration::from_secs(59)), 0);
        assert_eq!(limiter.tracked_keys(), 3);

        assert_eq!(limiter.sweep_at(start + MINUTE), 2);
        assert_eq!(limiter.tracked_keys(), 1);

        // The surviving key kept its in-window hit.
        assert_eq!(limiter.remaining_at(&1002u32, policy, start + MINUTE), 9);
    }

    #[test]
    fn test_sweep_uses_each_keys_window() {
        let limiter = RateLimiter::new();
        let start = Instant::now();

        limiter.admit_at(&"login:1.2.3.4", Policy::login(), start);
        limiter.admit_at(&"general:1.2.3.4", Policy::general(), start);

        assert_eq!(limiter.sweep_at(start + Duration::from_secs(120)), 1);
        assert_eq!(limiter.tracked_keys(), 1);
        assert_eq!(
            limiter.remaining_at(&"login:1.2.3.4", Policy::login(), start + Duration::from_secs(120)),
            4
        );
    }

    #[test]
    fn test_concurrent_admission_never_over_admits() {
        const THREADS: usize = 32;
        const LIMIT: usize = 7;

        let limiter = Arc::new(RateLimiter::new());
        let policy = Policy::new(LIMIT, MINUTE);
        let admitted = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let admitted = Arc::clone(&admitted);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    if limiter.admit(&"shared".to_string(), policy) {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), LIMIT);
    }

    #[test]
    fn test_policy_presets() {
        assert_eq!(Policy::login(), Policy::new(5, Duration::from_secs(300)));
        assert_eq!(Policy::api(), Policy::new(100, MINUTE));
        assert_eq!(Policy::general(), Policy::new(60, MINUTE));

        let from_config = Policy::from(PolicyConfig {
            limit: 9,
            window_seconds: 30,
        });
        assert_eq!(from_config, Policy::new(9, Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_sweep_task_reclaims_and_stops() {
        let limiter: Arc<RateLimiter<String>> = Arc::new(RateLimiter::new());
        let policy = Policy::new(5, Duration::from_millis(50));

        limiter.admit(&"a".to_string(), policy);
        limiter.admit(&"b".to_string(), policy);
        assert_eq!(limiter.tracked_keys(), 2);

        let handle = limiter.start_sweep_task(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(limiter.tracked_keys(), 0);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_zero_sweep_interval_is_clamped() {
        let limiter: Arc<RateLimiter<String>> = Arc::new(RateLimiter::new());
        let policy = Policy::new(5, Duration::from_millis(20));
        limiter.admit(&"a".to_string(), policy);

        let handle = limiter.start_sweep_task(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Still running, and still sweeping.
        assert!(!handle.is_finished());
        assert_eq!(limiter.tracked_keys(), 0);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_sweep_handle_stop_before_first_sweep() {
        let limiter: Arc<RateLimiter<String>> = Arc::new(RateLimiter::new());
        let handle = limiter.start_sweep_task(Duration::from_secs(3600));
        assert!(!handle.is_finished());
        handle.stop().await;
    }
}
