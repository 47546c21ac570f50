//! Places: dedicated threads that run jobs handed to them
//!
//! A monitor whose object has a home place drains on that place's thread.
//! Each `WorkerPlace` owns one OS thread, a lock-free run queue and a
//! parking word it sleeps on when the queue is empty.

use crate::parking::{Parking, PlatformParking};
use crossbeam_queue::SegQueue;
use kinv_core::{kdebug, kerror, kinfo};
use kinv_core::{Error, Job, KResult, Place, SpinLock};
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Distinguishes places that share an id across runtimes
static NEXT_TOKEN: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// (token, id) of the place this thread runs, token 0 if none
    static CURRENT_PLACE: Cell<(usize, usize)> = const { Cell::new((0, usize::MAX)) };
}

/// Id of the place running the calling thread, if any
#[inline]
pub fn current_place_id() -> Option<usize> {
    let (token, id) = CURRENT_PLACE.with(|c| c.get());
    if token == 0 { None } else { Some(id) }
}

pub struct WorkerPlace {
    id: usize,
    token: usize,
    queue: SegQueue<Job>,
    parking: PlatformParking,
    shutdown: AtomicBool,
    executed: AtomicUsize,
    handle: SpinLock<Option<JoinHandle<()>>>,
}

impl WorkerPlace {
    /// Start the place's thread
    pub fn spawn(id: usize) -> KResult<Arc<WorkerPlace>> {
        let place = Arc::new(WorkerPlace {
            id,
            token: NEXT_TOKEN.fetch_add(1, Ordering::Relaxed),
            queue: SegQueue::new(),
            parking: PlatformParking::new(),
            shutdown: AtomicBool::new(false),
            executed: AtomicUsize::new(0),
            handle: SpinLock::new(None),
        });

        let worker = Arc::clone(&place);
        let handle = thread::Builder::new()
            .name(format!("kinv-place-{}", id))
            .spawn(move || worker.run())
            .map_err(|_| Error::InsufficientResources)?;
        *place.handle.lock() = Some(handle);

        kdebug!(target: "place", "place {} started", id);
        Ok(place)
    }

    fn run(&self) {
        CURRENT_PLACE.with(|c| c.set((self.token, self.id)));
        loop {
            while let Some(job) = self.queue.pop() {
                // A panicking job must not take the place down with it
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    kerror!(target: "place", "job panicked on place {}", self.id);
                }
                self.executed.fetch_add(1, Ordering::Relaxed);
            }
            let seen = self.parking.epoch();
            if !self.queue.is_empty() {
                continue;
            }
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            self.parking.park(seen, None);
        }
        CURRENT_PLACE.with(|c| c.set((0, usize::MAX)));
    }

    /// Jobs run so far
    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Stop after the queue drains and join the thread
    ///
    /// Called from the place's own thread it only raises the flag.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.parking.wake_all();
        if self.is_current() {
            return;
        }
        let handle = self.handle.lock().take();
        if let Some(h) = handle {
            let _ = h.join();
            kdebug!(target: "place", "place {} stopped after {} jobs", self.id, self.executed());
        }
    }
}

impl Place for WorkerPlace {
    fn id(&self) -> usize {
        self.id
    }

    fn is_current(&self) -> bool {
        CURRENT_PLACE.with(|c| c.get().0) == self.token
    }

    fn push(&self, job: Job) {
        self.queue.push(job);
        self.parking.wake_one();
    }
}

/// The set of places of one runtime, indexed by id
pub struct Places {
    places: Vec<Arc<WorkerPlace>>,
}

impl Places {
    pub fn spawn(count: usize) -> KResult<Places> {
        let mut places = Vec::with_capacity(count);
        for id in 0..count {
            match WorkerPlace::spawn(id) {
                Ok(p) => places.push(p),
                Err(e) => {
                    for p in &places {
                        p.shutdown();
                    }
                    return Err(e);
                }
            }
        }
        kinfo!("spawned {} places", count);
        Ok(Places { places })
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<Arc<dyn Place>> {
        self.places.get(id).map(|p| Arc::clone(p) as Arc<dyn Place>)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<WorkerPlace>> {
        self.places.iter()
    }

    pub fn shutdown(&self) {
        for p in &self.places {
            p.shutdown();
        }
    }
}

impl Drop for Places {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Mutex;

    #[test]
    fn test_jobs_run_on_place_thread_in_order() {
        let place = WorkerPlace::spawn(3).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::channel();

        for i in 0..100 {
            let seen = Arc::clone(&seen);
            let tx = tx.clone();
            place.push(Box::new(move || {
                assert_eq!(current_place_id(), Some(3));
                seen.lock().unwrap().push(i);
                if i == 99 {
                    tx.send(()).unwrap();
                }
            }));
        }
        rx.recv().unwrap();

        assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
        assert!(!place.is_current());
        assert_eq!(current_place_id(), None);
        place.shutdown();
        assert_eq!(place.executed(), 100);
    }

    #[test]
    fn test_is_current_distinguishes_same_id() {
        let a = WorkerPlace::spawn(0).unwrap();
        let b = WorkerPlace::spawn(0).unwrap();
        let (tx, rx) = mpsc::channel();

        let b2 = Arc::clone(&b);
        let a2 = Arc::clone(&a);
        a.push(Box::new(move || {
            tx.send((a2.is_current(), b2.is_current())).unwrap();
        }));
        assert_eq!(rx.recv().unwrap(), (true, false));

        a.shutdown();
        b.shutdown();
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let place = WorkerPlace::spawn(1).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..1000 {
            let c = Arc::clone(&count);
            place.push(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }
        place.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 1000);
    }

    #[test]
    fn test_panicking_job_leaves_place_running() {
        let place = WorkerPlace::spawn(2).unwrap();
        let (tx, rx) = mpsc::channel();
        place.push(Box::new(|| panic!("job failure")));
        place.push(Box::new(move || tx.send(current_place_id()).unwrap()));

        assert_eq!(rx.recv().unwrap(), Some(2));
        place.shutdown();
        assert_eq!(place.executed(), 2);
    }

    #[test]
    fn test_places_lookup() {
        let places = Places::spawn(2).unwrap();
        assert_eq!(places.len(), 2);
        assert_eq!(places.get(1).map(|p| p.id()), Some(1));
        assert!(places.get(2).is_none());
    }
}
