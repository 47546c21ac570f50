//! Single-assignment completion cell
//!
//! A `Future` starts `Unset` and receives exactly one terminal [`Error`]
//! per round. Between rounds the owner calls [`Future::reset`]. Waiters
//! either block in [`Future::wait`] or register one continuation with
//! [`Future::then`].

use crate::parking::{Parking, PlatformParking};
use kinv_core::{kerror, Error, SpinLock, SysretHandler};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

/// Runs once with the assigned result
pub type Continuation = Box<dyn FnOnce(Error) + Send + 'static>;

pub struct Future {
    state: AtomicU8,
    waiter: SpinLock<Option<Continuation>>,
    parking: PlatformParking,
}

impl Future {
    pub fn new() -> Self {
        Future {
            state: AtomicU8::new(Error::Unset as u8),
            waiter: SpinLock::new(None),
            parking: PlatformParking::new(),
        }
    }

    /// Start a new round
    ///
    /// Must not race with an assignment of the previous round.
    pub fn reset(&self) {
        let stale = self.waiter.lock().take();
        debug_assert!(stale.is_none(), "future reset with a pending continuation");
        drop(stale);
        self.state.store(Error::Unset as u8, Ordering::Release);
    }

    /// Resolve the future
    ///
    /// The first assignment of a round wins; a later one is logged and
    /// dropped.
    pub fn assign(&self, result: Error) {
        debug_assert_ne!(result, Error::Unset, "assigning Unset");
        if self
            .state
            .compare_exchange(Error::Unset as u8, result as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            kerror!(target: "future", "future assigned twice, dropping {}", result);
            return;
        }
        self.parking.wake_all();
        self.signal();
    }

    /// Register the continuation for this round
    ///
    /// Runs immediately on the calling thread if the result is already in.
    pub fn then(&self, c: Continuation) {
        {
            let mut w = self.waiter.lock();
            debug_assert!(w.is_none(), "future already has a continuation");
            *w = Some(c);
        }
        // Re-check after registering: an assign that ran before the store
        // above found no waiter to signal
        if self.poll() {
            self.signal();
        }
    }

    /// Also run `c` when this round resolves, after any continuation
    /// already registered
    pub fn then_also(&self, c: Continuation) {
        {
            let mut w = self.waiter.lock();
            let chained: Continuation = match w.take() {
                Some(first) => Box::new(move |e| {
                    first(e);
                    c(e);
                }),
                None => c,
            };
            *w = Some(chained);
        }
        if self.poll() {
            self.signal();
        }
    }

    fn signal(&self) {
        let c = self.waiter.lock().take();
        if let Some(c) = c {
            c(self.state());
        }
    }

    /// True once a result is assigned
    #[inline]
    pub fn poll(&self) -> bool {
        self.state.load(Ordering::Acquire) != Error::Unset as u8
    }

    /// The assigned result
    ///
    /// Reading an unresolved future is a bug: debug builds assert, release
    /// builds return `Unset`.
    pub fn state(&self) -> Error {
        let raw = self.state.load(Ordering::Acquire);
        debug_assert_ne!(raw, Error::Unset as u8, "reading an unresolved future");
        Error::from_u8(raw).unwrap_or(Error::GenericError)
    }

    /// Block the calling thread until assigned
    pub fn wait(&self) -> Error {
        loop {
            let seen = self.parking.epoch();
            if self.poll() {
                return self.state();
            }
            self.parking.park(seen, None);
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Error> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let seen = self.parking.epoch();
            if self.poll() {
                return Some(self.state());
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return None;
            }
            self.parking.park(seen, Some(deadline - now));
        }
    }

    /// Wake waiters without assigning; they re-check and sleep again
    pub fn notify(&self) {
        self.parking.wake_all();
    }
}

impl Default for Future {
    fn default() -> Self {
        Self::new()
    }
}

impl SysretHandler for Future {
    fn sysret(&self, result: Error) {
        self.assign(result);
    }

    fn wakeup(&self) {
        self.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_assign_then_read() {
        let f = Future::new();
        assert!(!f.poll());
        f.assign(Error::LostRace);
        assert!(f.poll());
        assert_eq!(f.state(), Error::LostRace);
        assert_eq!(f.wait(), Error::LostRace);

        f.reset();
        assert!(!f.poll());
    }

    #[test]
    fn test_then_after_assign_runs_once() {
        let f = Future::new();
        let hits = Arc::new(AtomicUsize::new(0));
        f.assign(Error::Success);

        let h = Arc::clone(&hits);
        f.then(Box::new(move |e| {
            assert_eq!(e, Error::Success);
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_then_races_assign() {
        for _ in 0..500 {
            let f = Arc::new(Future::new());
            let hits = Arc::new(AtomicUsize::new(0));
            let barrier = Arc::new(Barrier::new(2));

            let assigner = {
                let (f, barrier) = (Arc::clone(&f), Arc::clone(&barrier));
                thread::spawn(move || {
                    barrier.wait();
                    f.assign(Error::Retry);
                })
            };

            let h = Arc::clone(&hits);
            barrier.wait();
            f.then(Box::new(move |e| {
                assert_eq!(e, Error::Retry);
                h.fetch_add(1, Ordering::SeqCst);
            }));
            assigner.join().unwrap();

            assert_eq!(hits.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_wait_blocks_until_assigned() {
        let f = Arc::new(Future::new());
        let waiter = {
            let f = Arc::clone(&f);
            thread::spawn(move || f.wait())
        };
        thread::sleep(Duration::from_millis(20));
        f.sysret(Error::InsufficientResources);
        assert_eq!(waiter.join().unwrap(), Error::InsufficientResources);
    }

    #[test]
    fn test_wait_timeout_expires() {
        let f = Future::new();
        assert_eq!(f.wait_timeout(Duration::from_millis(10)), None);
        f.notify();
        f.assign(Error::Success);
        assert_eq!(f.wait_timeout(Duration::from_millis(10)), Some(Error::Success));
    }

    #[test]
    fn test_second_assign_keeps_first_result() {
        let f = Future::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        f.then(Box::new(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        }));

        f.assign(Error::Success);
        f.sysret(Error::Retry);
        assert_eq!(f.state(), Error::Success);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_then_also_runs_after_registered_continuation() {
        let f = Future::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (a, b) = (Arc::clone(&order), Arc::clone(&order));
        f.then(Box::new(move |_| a.lock().unwrap().push(1)));
        f.then_also(Box::new(move |e| {
            assert_eq!(e, Error::Success);
            b.lock().unwrap().push(2);
        }));
        assert!(order.lock().unwrap().is_empty());

        f.assign(Error::Success);
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);

        // Already resolved: runs at once
        let c = Arc::clone(&order);
        f.then_also(Box::new(move |_| c.lock().unwrap().push(3)));
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "unresolved")]
    fn test_reading_unset_panics_in_debug() {
        Future::new().state();
    }
}
