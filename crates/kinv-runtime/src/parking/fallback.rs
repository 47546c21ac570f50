//! Condvar parking for platforms without futexes

use super::Parking;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub struct CondvarParking {
    epoch: Mutex<u32>,
    condvar: Condvar,
    parked: AtomicUsize,
}

impl CondvarParking {
    pub fn new() -> Self {
        Self {
            epoch: Mutex::new(0),
            condvar: Condvar::new(),
            parked: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, u32> {
        // The guarded value is a plain counter; a poisoned lock is still usable
        self.epoch.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn advance(&self) {
        let mut g = self.lock();
        *g = g.wrapping_add(1);
    }
}

impl Default for CondvarParking {
    fn default() -> Self {
        Self::new()
    }
}

impl Parking for CondvarParking {
    fn epoch(&self) -> u32 {
        *self.lock()
    }

    fn park(&self, seen: u32, timeout: Option<Duration>) -> bool {
        self.parked.fetch_add(1, Ordering::SeqCst);
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = self.lock();
        let mut woken = true;

        while *guard == seen {
            match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        woken = false;
                        break;
                    }
                    guard = match self.condvar.wait_timeout(guard, d - now) {
                        Ok((g, _)) => g,
                        Err(e) => e.into_inner().0,
                    };
                }
                None => {
                    guard = match self.condvar.wait(guard) {
                        Ok(g) => g,
                        Err(e) => e.into_inner(),
                    };
                }
            }
        }

        drop(guard);
        self.parked.fetch_sub(1, Ordering::SeqCst);
        woken
    }

    fn wake_one(&self) {
        self.advance();
        self.condvar.notify_one();
    }

    fn wake_all(&self) {
        self.advance();
        self.condvar.notify_all();
    }

    fn parked_count(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }
}
