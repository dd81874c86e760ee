//! Lets a producer wait until the backend has processed one specific entry.
//!
//! This path takes a mutex and wakes every waiter on each notification, so it
//! is only for callers that explicitly ask for synchronous delivery.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

/// Completion flag for one queued entry. Pending until the backend touches it.
#[derive(Debug, Default)]
pub struct SyncPoint {
    touched: AtomicBool,
}

impl SyncPoint {
    pub const fn new() -> Self {
        Self {
            touched: AtomicBool::new(false),
        }
    }

    pub fn is_touched(&self) -> bool {
        self.touched.load(Ordering::Acquire)
    }
}

/// Rendezvous between synchronous producers and the backend.
///
/// A producer attaches a [`SyncPoint`] to its entry and calls
/// [`AsyncToSync::wait`]; the backend calls [`AsyncToSync::notify`] once the
/// entry is written. [`AsyncToSync::cancel_all`] releases every waiter when
/// the backend stops, and keeps later waits from blocking at all.
///
/// # Thread Safety
/// All methods take `&self` and may be called from any thread. Every waiter
/// shares one condition variable, so a notification wakes all of them and
/// each re-checks its own point.
///
/// # Examples
///
/// ```
/// use async_binary_logger::{AsyncToSync, SyncPoint};
/// use std::sync::Arc;
/// use std::thread;
///
/// let sync = Arc::new(AsyncToSync::new());
/// let point = Arc::new(SyncPoint::new());
///
/// let backend = {
///     let (sync, point) = (sync.clone(), point.clone());
///     thread::spawn(move || sync.notify(&point))
/// };
/// assert!(sync.wait(&point));
/// backend.join().unwrap();
/// ```
#[derive(Debug, Default)]
pub struct AsyncToSync {
    // guards the condvar; the value is the cancellation flag
    cancelled: Mutex<bool>,
    cond: Condvar,
}

impl AsyncToSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until `point` is touched or the rendezvous is cancelled.
    ///
    /// # Returns
    /// * `true` once `point` is touched, at once if it already is
    /// * `false` if [`AsyncToSync::cancel_all`] ran before that
    pub fn wait(&self, point: &SyncPoint) -> bool {
        let mut cancelled = self.cancelled.lock();
        loop {
            if point.is_touched() {
                return true;
            }
            if *cancelled {
                return false;
            }
            self.cond.wait(&mut cancelled);
        }
    }

    /// Marks `point` as delivered and wakes its waiter.
    pub fn notify(&self, point: &SyncPoint) {
        let _guard = self.cancelled.lock();
        point.touched.store(true, Ordering::Release);
        self.cond.notify_all();
    }

    /// Fails every current and future wait on a pending point.
    pub fn cancel_all(&self) {
        let mut cancelled = self.cancelled.lock();
        *cancelled = true;
        self.cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_notify_before_wait_returns_immediately() {
        let sync = AsyncToSync::new();
        let point = SyncPoint::new();
        sync.notify(&point);
        assert!(sync.wait(&point));
        // Delivery wins over a later cancellation.
        sync.cancel_all();
        assert!(sync.wait(&point));
    }

    #[test]
    fn test_cancel_wakes_waiters_with_false() {
        let sync = Arc::new(AsyncToSync::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let sync = sync.clone();
                thread::spawn(move || {
                    let point = SyncPoint::new();
                    sync.wait(&point)
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        sync.cancel_all();
        for waiter in waiters {
            assert!(!waiter.join().unwrap());
        }
        assert!(!sync.wait(&SyncPoint::new()));
    }

    #[test]
    fn test_notify_from_other_thread() {
        let sync = Arc::new(AsyncToSync::new());
        let point = Arc::new(SyncPoint::new());

        let notifier = {
            let sync = sync.clone();
            let point = point.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                sync.notify(&point);
            })
        };
        assert!(sync.wait(&point));
        notifier.join().unwrap();
    }
}
