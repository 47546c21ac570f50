//! Thread parking
//!
//! Parking is epoch based so a wake can never slip between a waiter's
//! condition check and its sleep:
//!
//! ```ignore
//! loop {
//!     let seen = parking.epoch();
//!     if condition_holds() { break; }
//!     parking.park(seen, None);
//! }
//! ```
//!
//! A waker first makes the condition true, then calls `wake_one`/`wake_all`,
//! which advance the epoch. A waiter that read the old epoch returns from
//! `park` at once.

use std::time::Duration;

pub trait Parking: Send + Sync {
    /// Current wake epoch; read it before checking the wait condition
    fn epoch(&self) -> u32;

    /// Sleep while the epoch still equals `seen`
    ///
    /// Returns `false` on timeout. Spurious returns are possible; callers
    /// re-check their condition either way.
    fn park(&self, seen: u32, timeout: Option<Duration>) -> bool;

    fn wake_one(&self);

    fn wake_all(&self);

    /// Number of threads inside `park` (hint, may be stale)
    fn parked_count(&self) -> usize;
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexParking as PlatformParking;
    } else {
        mod fallback;
        pub use fallback::CondvarParking as PlatformParking;
    }
}

pub fn new_parking() -> Box<dyn Parking> {
    Box::new(PlatformParking::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_park_times_out() {
        let parking = new_parking();
        let seen = parking.epoch();
        let start = Instant::now();
        let woken = parking.park(seen, Some(Duration::from_millis(50)));
        assert!(!woken);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_stale_epoch_returns_immediately() {
        let parking = PlatformParking::new();
        let seen = parking.epoch();
        parking.wake_all();
        let start = Instant::now();
        assert!(parking.park(seen, Some(Duration::from_secs(10))));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_wake_releases_waiter() {
        let parking = Arc::new(PlatformParking::new());
        let ready = Arc::new(AtomicBool::new(false));

        let handle = {
            let (parking, ready) = (Arc::clone(&parking), Arc::clone(&ready));
            thread::spawn(move || loop {
                let seen = parking.epoch();
                if ready.load(Ordering::Acquire) {
                    return;
                }
                parking.park(seen, Some(Duration::from_secs(10)));
            })
        };

        thread::sleep(Duration::from_millis(20));
        ready.store(true, Ordering::Release);
        parking.wake_one();

        let start = Instant::now();
        handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(parking.parked_count(), 0);
    }
}
