//! Test-and-set spin lock with capped backoff
//!
//! Used for short, allocation-proportional critical sections such as the
//! first-fit heap. Never hold a guard across a suspension point (a Portal
//! wait, a park, a blocking transport call) and never enter an object's
//! monitor while holding one.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Default upper bound for the pause loop between two lock attempts
pub const DEFAULT_BACKOFF_CAP: u32 = 64;

/// A spin lock protecting `T`
pub struct SpinLock<T> {
    locked: AtomicBool,
    backoff_cap: AtomicU32,
    #[cfg(feature = "debug-assertions")]
    owner: core::sync::atomic::AtomicU64,
    data: UnsafeCell<T>,
}

// Safety: SpinLock provides exclusive access to T
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    #[inline]
    pub const fn new(value: T) -> Self {
        Self::with_backoff(value, DEFAULT_BACKOFF_CAP)
    }

    /// Create a lock whose exponential backoff stops growing at `cap` pauses
    #[inline]
    pub const fn with_backoff(value: T, cap: u32) -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
            backoff_cap: AtomicU32::new(if cap == 0 { 1 } else { cap }),
            #[cfg(feature = "debug-assertions")]
            owner: core::sync::atomic::AtomicU64::new(0),
            data: UnsafeCell::new(value),
        }
    }

    /// Change the backoff cap; takes effect on the next contended acquire
    pub fn set_backoff_cap(&self, cap: u32) {
        self.backoff_cap.store(cap.max(1), Ordering::Relaxed);
    }

    /// Acquire the lock, spinning until it's available
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.check_not_owner();
        let cap = self.backoff_cap.load(Ordering::Relaxed);
        let mut pauses = 1u32;
        loop {
            if self.locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                self.mark_owner();
                return SpinLockGuard { lock: self };
            }

            // Wait on a plain load so the cache line stays shared
            while self.locked.load(Ordering::Relaxed) {
                for _ in 0..pauses {
                    core::hint::spin_loop();
                }
                pauses = pauses.saturating_mul(2).min(cap);
            }
        }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.mark_owner();
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Consume the lock and return the protected value
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    cfg_if::cfg_if! {
        if #[cfg(feature = "debug-assertions")] {
            fn thread_tag() -> u64 {
                use std::hash::{Hash, Hasher};
                let mut h = std::collections::hash_map::DefaultHasher::new();
                std::thread::current().id().hash(&mut h);
                h.finish() | 1
            }

            #[inline]
            fn check_not_owner(&self) {
                assert_ne!(
                    self.owner.load(Ordering::Relaxed),
                    Self::thread_tag(),
                    "SpinLock re-acquired by its holder"
                );
            }

            #[inline]
            fn mark_owner(&self) {
                self.owner.store(Self::thread_tag(), Ordering::Relaxed);
            }

            #[inline]
            fn clear_owner(&self) {
                self.owner.store(0, Ordering::Relaxed);
            }
        } else {
            #[inline(always)]
            fn check_not_owner(&self) {}

            #[inline(always)]
            fn mark_owner(&self) {}

            #[inline(always)]
            fn clear_owner(&self) {}
        }
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        SpinLock::new(T::default())
    }
}

/// Guard that releases the spinlock when dropped
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<'a, T> Deref for SpinLockGuard<'a, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // Safety: We hold the lock
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for SpinLockGuard<'a, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // Safety: We hold the lock
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for SpinLockGuard<'a, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.clear_owner();
        self.lock.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_spinlock_try_lock() {
        let lock = SpinLock::new(0u32);

        let guard = lock.try_lock();
        assert!(guard.is_some());
        assert!(lock.is_locked());
        assert!(lock.try_lock().is_none());

        drop(guard);
        assert!(!lock.is_locked());
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_spinlock_contended_with_small_cap() {
        let lock = Arc::new(SpinLock::with_backoff(Vec::new(), 2));
        let mut handles = vec![];

        for t in 0..4u32 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for i in 0..500 {
                    lock.lock().push(t * 1000 + i);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let v = Arc::try_unwrap(lock).ok().unwrap().into_inner();
        assert_eq!(v.len(), 2000);
    }

    #[test]
    fn test_zero_cap_is_clamped() {
        let lock = SpinLock::with_backoff(1u8, 0);
        lock.set_backoff_cap(0);
        *lock.lock() += 1;
        assert_eq!(*lock.lock(), 2);
    }
}
