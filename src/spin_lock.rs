use std::sync::atomic::{AtomicBool, Ordering};
use util;

/// User mode SpinLock
///
/// Waiters spin with `pause` for a short while and then yield, so a lock held
/// across a preempted owner does not burn a whole core.
pub struct SpinLock {
    atomic: AtomicBool,
}

impl Default for SpinLock {
    fn default() -> Self {
        SpinLock {
            atomic: AtomicBool::new(false),
        }
    }
}

impl SpinLock {
    /// Keep trying to lock until success.
    pub fn lock(&self) {
        let mut round = 0;
        while self.is_locked()
            || self
                .atomic
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
        {
            util::backoff(&mut round);
        }
    }

    /// Keep trying to lock until success, then return SpinLockGuard.
    #[inline]
    pub fn lock_guard(&self) -> SpinLockGuard {
        self.lock();
        SpinLockGuard::new(self)
    }

    /// Unlock if is locked, else panic.
    ///
    /// The caller must be the current owner; the lock does not track owners.
    #[inline]
    pub fn unlock(&self) {
        assert!(
            self.atomic
                .compare_exchange(true, false, Ordering::Release, Ordering::Relaxed)
                .is_ok()
        );
    }

    /// Return true if locked.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.atomic.load(Ordering::Relaxed)
    }
}

/// Guard of SpinLock, unlock it when dropped.
pub struct SpinLockGuard<'a> {
    spin_lock: &'a SpinLock,
}

impl<'a> SpinLockGuard<'a> {
    fn new(spin_lock: &'a SpinLock) -> Self {
        SpinLockGuard { spin_lock }
    }
}

impl<'a> Drop for SpinLockGuard<'a> {
    fn drop(&mut self) {
        self.spin_lock.unlock();
    }
}
