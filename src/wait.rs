//! Waiting strategy for the backend thread when the queue runs dry.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

const UNBLOCKED: u8 = 0;
const BLOCKED: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    pub spin_max: u32,
    pub yield_max: u32,
    pub block_timeout: Duration,
    /// Stay in the yield tier forever instead of parking.
    pub never_block: bool,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            spin_max: 1000,
            yield_max: 100,
            block_timeout: Duration::from_millis(1),
            never_block: false,
        }
    }
}

/// Consumer-side wait used when the queue is empty.
///
/// Each call to [`HybridWait::block`] escalates one step: the first
/// `spin_max` calls return at once so the caller re-polls hot, the next
/// `yield_max` calls yield the processor, and every call after that parks on
/// a condition variable for up to `block_timeout`. [`HybridWait::reset`]
/// goes back to spinning once work shows up.
///
/// A producer's [`HybridWait::unblock`] can land between the consumer's last
/// empty poll and its transition to `blocked`; that wakeup is lost and the
/// consumer sleeps until the timeout. The timeout bounds the extra latency.
///
/// # Thread Safety
/// [`HybridWait::block`] and [`HybridWait::reset`] belong to the single
/// consumer. [`HybridWait::unblock`] may be called from any number of
/// producers; it costs one relaxed load unless the consumer is parked.
///
/// # Examples
///
/// ```
/// use async_binary_logger::{HybridWait, WaitConfig};
/// use std::time::Duration;
///
/// let wait = HybridWait::new(WaitConfig {
///     spin_max: 1,
///     yield_max: 1,
///     block_timeout: Duration::from_millis(1),
///     never_block: false,
/// });
/// assert!(wait.block()); // spin
/// assert!(wait.block()); // yield
/// assert!(wait.block()); // parked until the timeout
/// wait.reset();
/// ```
pub struct HybridWait {
    config: WaitConfig,
    state: AtomicU8,
    // consumer-only; atomic so the struct can be shared with producers
    attempts: AtomicU32,
    lock: Mutex<()>,
    cond: Condvar,
}

impl HybridWait {
    pub fn new(config: WaitConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(UNBLOCKED),
            attempts: AtomicU32::new(0),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    pub fn config(&self) -> &WaitConfig {
        &self.config
    }

    /// One escalation step.
    ///
    /// # Returns
    /// * `true` if the call ended without seeing an [`HybridWait::unblock`]:
    ///   a spin, a yield, or a park that timed out
    /// * `false` if a producer woke the parked consumer
    ///
    /// # Thread Safety
    /// Consumer thread only.
    pub fn block(&self) -> bool {
        let attempts = self.attempts.load(Ordering::Relaxed);
        let spin_max = self.config.spin_max;
        let yield_limit = spin_max.saturating_add(self.config.yield_max);

        if attempts < spin_max {
            self.attempts.store(attempts + 1, Ordering::Relaxed);
            std::hint::spin_loop();
            return true;
        }
        if attempts < yield_limit || self.config.never_block {
            if attempts < yield_limit {
                self.attempts.store(attempts + 1, Ordering::Relaxed);
            }
            thread::yield_now();
            return true;
        }

        let mut guard = self.lock.lock();
        self.state.store(BLOCKED, Ordering::SeqCst);
        let result = self.cond.wait_for(&mut guard, self.config.block_timeout);
        let was = self.state.swap(UNBLOCKED, Ordering::SeqCst);
        // An unblock that raced the timeout still counts as a wakeup.
        result.timed_out() && was == BLOCKED
    }

    /// Wakes the consumer if it is parked. Any thread.
    #[inline]
    pub fn unblock(&self) {
        if self.state.load(Ordering::Relaxed) == BLOCKED
            && self.state.swap(UNBLOCKED, Ordering::SeqCst) == BLOCKED
        {
            let _guard = self.lock.lock();
            self.cond.notify_one();
        }
    }

    /// Back to the spin tier. Consumer thread only.
    #[inline]
    pub fn reset(&self) {
        self.attempts.store(0, Ordering::Relaxed);
    }

    pub fn is_blocked(&self) -> bool {
        self.state.load(Ordering::Relaxed) == BLOCKED
    }
}

impl Default for HybridWait {
    fn default() -> Self {
        Self::new(WaitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn config(spin_max: u32, yield_max: u32, timeout_ms: u64) -> WaitConfig {
        WaitConfig {
            spin_max,
            yield_max,
            block_timeout: Duration::from_millis(timeout_ms),
            never_block: false,
        }
    }

    #[test]
    fn test_spin_and_yield_tiers_return_immediately() {
        let wait = HybridWait::new(config(3, 2, 10_000));
        let start = Instant::now();
        for _ in 0..5 {
            assert!(wait.block());
        }
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(!wait.is_blocked());
    }

    #[test]
    fn test_block_tier_times_out() {
        let wait = HybridWait::new(config(2, 2, 30));
        for _ in 0..4 {
            wait.block();
        }
        let start = Instant::now();
        assert!(wait.block(), "no unblock: still blocked");
        assert!(start.elapsed() >= Duration::from_millis(25));
        assert!(!wait.is_blocked());
    }

    #[test]
    fn test_reset_restarts_spinning() {
        let wait = HybridWait::new(config(1, 0, 10_000));
        wait.block();
        wait.reset();
        let start = Instant::now();
        assert!(wait.block());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_never_block_stays_in_yield_tier() {
        let wait = HybridWait::new(WaitConfig {
            never_block: true,
            ..config(0, 0, 10_000)
        });
        let start = Instant::now();
        for _ in 0..100 {
            assert!(wait.block());
        }
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_unblock_wakes_parked_consumer() {
        let wait = Arc::new(HybridWait::new(config(0, 0, 10_000)));
        let consumer = {
            let wait = wait.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let still_blocked = wait.block();
                (still_blocked, start.elapsed())
            })
        };

        while !wait.is_blocked() {
            thread::yield_now();
        }
        wait.unblock();
        let (still_blocked, elapsed) = consumer.join().unwrap();
        assert!(!still_blocked);
        assert!(elapsed < Duration::from_secs(5));
    }
}
