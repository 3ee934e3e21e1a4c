//! Sliding-window rate limiter keyed by client identity.
//!
//! Each identity keeps the instants of its admitted calls inside the trailing
//! window. Prune, check and append happen under that identity's own lock, so two
//! racing calls for the same identity can never both slip in under the threshold.
//! The limiter is built once at startup and lives as long as the process.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

type Window = Arc<Mutex<VecDeque<Instant>>>;

pub struct RateLimiter<C: Clock = SystemClock> {
    /// Maximum admitted calls per window.
    threshold: usize,
    window: Duration,
    clock: C,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter<SystemClock> {
    pub fn new(threshold: usize, window: Duration) -> Self {
        Self::with_clock(threshold, window, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(threshold: usize, window: Duration, clock: C) -> Self {
        Self {
            threshold,
            window,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admit or reject one call for `identity`, recording it when admitted.
    pub fn admit(&self, identity: &str) -> bool {
        let window = self.window_for(identity);
        let mut calls = lock(&window);
        let now = self.clock.now();
        self.prune(&mut calls, now);

        if calls.len() >= self.threshold {
            tracing::debug!(
                "Rate limit hit for {}: {} calls in {:?}",
                identity,
                calls.len(),
                self.window
            );
            return false;
        }
        calls.push_back(now);
        true
    }

    /// Time until `identity` may be admitted again, or `None` if it may call now.
    pub fn retry_after(&self, identity: &str) -> Option<Duration> {
        let window = self.window_for(identity);
        let mut calls = lock(&window);
        let now = self.clock.now();
        self.prune(&mut calls, now);

        if calls.len() < self.threshold {
            return None;
        }
        // With threshold 0 nothing is ever admitted, so there is no slot to wait for.
        let oldest = calls.front()?;
        Some(self.window.saturating_sub(now.saturating_duration_since(*oldest)))
    }

    fn window_for(&self, identity: &str) -> Window {
        let mut windows = lock(&self.windows);
        Arc::clone(windows.entry(identity.to_string()).or_default())
    }

    fn prune(&self, calls: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = calls.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                calls.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Window state stays valid even if a holder panicked, so poisoning is ignored.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Clock that only moves when told to.
    struct ManualClock {
        start: Instant,
        offset: Mutex<Duration>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                start: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
            }
        }

        fn advance(&self, by: Duration) {
            *self.offset.lock().unwrap() += by;
        }
    }

    impl Clock for Arc<ManualClock> {
        fn now(&self) -> Instant {
            self.start + *self.offset.lock().unwrap()
        }
    }

    fn limiter(threshold: usize) -> (RateLimiter<Arc<ManualClock>>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (
            RateLimiter::with_clock(threshold, Duration::from_secs(60), Arc::clone(&clock)),
            clock,
        )
    }

    #[test]
    fn test_denies_call_past_threshold() {
        let (limiter, _clock) = limiter(3);
        assert!(limiter.admit("alice"));
        assert!(limiter.admit("alice"));
        assert!(limiter.admit("alice"));
        assert!(!limiter.admit("alice"));
        assert!(!limiter.admit("alice"));
    }

    #[test]
    fn test_identities_are_independent() {
        let (limiter, _clock) = limiter(1);
        assert!(limiter.admit("alice"));
        assert!(!limiter.admit("alice"));
        assert!(limiter.admit("bob"));
    }

    #[test]
    fn test_window_slides() {
        let (limiter, clock) = limiter(2);
        assert!(limiter.admit("alice"));
        clock.advance(Duration::from_secs(30));
        assert!(limiter.admit("alice"));
        assert!(!limiter.admit("alice"));

        // First call falls out of the window at t=60s.
        clock.advance(Duration::from_secs(30));
        assert!(limiter.admit("alice"));
        assert!(!limiter.admit("alice"));

        clock.advance(Duration::from_secs(60));
        assert!(limiter.admit("alice"));
        assert!(limiter.admit("alice"));
    }

    #[test]
    fn test_denied_calls_are_not_recorded() {
        let (limiter, clock) = limiter(1);
        assert!(limiter.admit("alice"));
        clock.advance(Duration::from_secs(59));
        assert!(!limiter.admit("alice"));
        // Had the denial been recorded, this would still be blocked.
        clock.advance(Duration::from_secs(1));
        assert!(limiter.admit("alice"));
    }

    #[test]
    fn test_retry_after() {
        let (limiter, clock) = limiter(1);
        assert_eq!(limiter.retry_after("alice"), None);
        assert!(limiter.admit("alice"));
        clock.advance(Duration::from_secs(20));
        assert_eq!(limiter.retry_after("alice"), Some(Duration::from_secs(40)));
    }

    #[test]
    fn test_zero_threshold_denies_everything() {
        let (limiter, _clock) = limiter(0);
        assert!(!limiter.admit("alice"));
        assert_eq!(limiter.retry_after("alice"), None);
    }

    #[test]
    fn test_concurrent_admission_never_exceeds_threshold() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let admitted = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..32)
                .map(|_| scope.spawn(|| limiter.admit("shared")))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });
        assert_eq!(admitted, 5);
        assert!(!limiter.admit("shared"));
    }
}
