//! Flat capability table
//!
//! One slot per index, slot 0 is never valid. Each slot moves through
//!
//! ```text
//! EMPTY --claim--> CLAIMED --install--> OCCUPIED
//!   ^                 |                    |
//!   +----release------+<-------remove------+
//! ```
//!
//! Lookups only ever see OCCUPIED slots as objects, so a slot being filled
//! by a create is never observed half-built.

use kinv_core::{CapPtr, CapPtrDepth, CapSpace, Error, KResult, SpinLock};
use std::sync::atomic::{AtomicU8, Ordering};

const EMPTY: u8 = 0;
const CLAIMED: u8 = 1;
const OCCUPIED: u8 = 2;

struct Slot<T> {
    state: AtomicU8,
    object: SpinLock<Option<T>>,
}

pub struct CapTable<T> {
    slots: Box<[Slot<T>]>,
}

impl<T: Clone + Send + Sync> CapTable<T> {
    pub fn new(slots: usize) -> Self {
        let slots = (0..slots)
            .map(|_| Slot { state: AtomicU8::new(EMPTY), object: SpinLock::new(None) })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        CapTable { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, ptr: CapPtr, depth: CapPtrDepth) -> KResult<&Slot<T>> {
        match depth.index(ptr) {
            Some(0) | None => Err(Error::InvalidCapability),
            Some(i) => self.slots.get(i).ok_or(Error::InvalidCapability),
        }
    }

    /// Claim and install in one go, for boot-time objects
    pub fn insert(&self, ptr: CapPtr, object: T) -> KResult<()> {
        if !self.claim(ptr, CapPtrDepth::DIRECT)? {
            return Err(Error::CapNonempty);
        }
        self.install(ptr, CapPtrDepth::DIRECT, object)
    }

    /// Take the object out of an occupied slot
    pub fn remove(&self, ptr: CapPtr, depth: CapPtrDepth) -> KResult<T> {
        let object = self.take(ptr, depth)?;
        self.release(ptr, depth);
        Ok(object)
    }

    /// Take the object out but leave the slot claimed
    ///
    /// Lookups fail from here on. Finish with `install` to put an object
    /// back or `release` to empty the slot.
    pub fn take(&self, ptr: CapPtr, depth: CapPtrDepth) -> KResult<T> {
        let slot = self.slot(ptr, depth)?;
        if slot.state.compare_exchange(OCCUPIED, CLAIMED, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(Error::InvalidCapability);
        }
        let object = slot.object.lock().take();
        if object.is_none() {
            slot.state.store(EMPTY, Ordering::Release);
        }
        object.ok_or(Error::InvalidCapability)
    }

    pub fn is_empty_slot(&self, ptr: CapPtr) -> bool {
        self.slot(ptr, CapPtrDepth::DIRECT).map_or(false, |s| s.state.load(Ordering::Acquire) == EMPTY)
    }

    /// Empty every occupied slot, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut n = 0;
        for slot in self.slots.iter() {
            if slot.state.compare_exchange(OCCUPIED, CLAIMED, Ordering::AcqRel, Ordering::Acquire).is_ok() {
                let object = slot.object.lock().take();
                slot.state.store(EMPTY, Ordering::Release);
                drop(object);
                n += 1;
            }
        }
        n
    }

    /// Number of occupied slots
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.state.load(Ordering::Acquire) == OCCUPIED).count()
    }
}

impl<T: Clone + Send + Sync> CapSpace for CapTable<T> {
    type Object = T;

    fn lookup(&self, ptr: CapPtr, depth: CapPtrDepth) -> KResult<T> {
        let slot = self.slot(ptr, depth)?;
        match slot.state.load(Ordering::Acquire) {
            OCCUPIED => slot.object.lock().clone().ok_or(Error::NoLookup),
            // Reserved by a create in flight, not usable yet
            CLAIMED => Err(Error::NoLookup),
            _ => Err(Error::InvalidCapability),
        }
    }

    fn claim(&self, ptr: CapPtr, depth: CapPtrDepth) -> KResult<bool> {
        let slot = self.slot(ptr, depth)?;
        Ok(slot.state.compare_exchange(EMPTY, CLAIMED, Ordering::AcqRel, Ordering::Acquire).is_ok())
    }

    fn install(&self, ptr: CapPtr, depth: CapPtrDepth, object: T) -> KResult<()> {
        let slot = self.slot(ptr, depth)?;
        if slot.state.load(Ordering::Acquire) != CLAIMED {
            return Err(Error::RequestDenied);
        }
        *slot.object.lock() = Some(object);
        slot.state.store(OCCUPIED, Ordering::Release);
        Ok(())
    }

    fn release(&self, ptr: CapPtr, depth: CapPtrDepth) {
        if let Ok(slot) = self.slot(ptr, depth) {
            let _ = slot.state.compare_exchange(CLAIMED, EMPTY, Ordering::AcqRel, Ordering::Acquire);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_slot_lifecycle() {
        let t: CapTable<u32> = CapTable::new(8);
        let p = CapPtr(3);
        assert_eq!(t.lookup(p, CapPtrDepth::DIRECT), Err(Error::InvalidCapability));

        assert_eq!(t.claim(p, CapPtrDepth::DIRECT), Ok(true));
        assert_eq!(t.claim(p, CapPtrDepth::DIRECT), Ok(false));
        assert_eq!(t.lookup(p, CapPtrDepth::DIRECT), Err(Error::NoLookup));

        t.install(p, CapPtrDepth::DIRECT, 42).unwrap();
        assert_eq!(t.lookup(p, CapPtrDepth::DIRECT), Ok(42));
        assert_eq!(t.claim(p, CapPtrDepth::DIRECT), Ok(false));
        assert_eq!(t.occupied(), 1);

        assert_eq!(t.remove(p, CapPtrDepth::DIRECT), Ok(42));
        assert!(t.is_empty_slot(p));

        t.insert(CapPtr(1), 1).unwrap();
        t.insert(CapPtr(2), 2).unwrap();
        assert_eq!(t.clear(), 2);
        assert_eq!(t.occupied(), 0);
    }

    #[test]
    fn test_take_holds_slot_until_released() {
        let t: CapTable<u32> = CapTable::new(8);
        let p = CapPtr(5);
        t.insert(p, 7).unwrap();

        assert_eq!(t.take(p, CapPtrDepth::DIRECT), Ok(7));
        assert_eq!(t.lookup(p, CapPtrDepth::DIRECT), Err(Error::NoLookup));
        assert_eq!(t.claim(p, CapPtrDepth::DIRECT), Ok(false));
        assert_eq!(t.take(p, CapPtrDepth::DIRECT), Err(Error::InvalidCapability));

        // Put back, then take for good
        t.install(p, CapPtrDepth::DIRECT, 7).unwrap();
        assert_eq!(t.lookup(p, CapPtrDepth::DIRECT), Ok(7));
        assert_eq!(t.take(p, CapPtrDepth::DIRECT), Ok(7));
        t.release(p, CapPtrDepth::DIRECT);
        assert!(t.is_empty_slot(p));
    }

    #[test]
    fn test_release_undoes_claim() {
        let t: CapTable<u32> = CapTable::new(4);
        assert_eq!(t.claim(CapPtr(1), CapPtrDepth::DIRECT), Ok(true));
        t.release(CapPtr(1), CapPtrDepth::DIRECT);
        assert!(t.is_empty_slot(CapPtr(1)));
        assert_eq!(t.install(CapPtr(1), CapPtrDepth::DIRECT, 1), Err(Error::RequestDenied));
    }

    #[test]
    fn test_invalid_indices() {
        let t: CapTable<u32> = CapTable::new(4);
        assert_eq!(t.claim(CapPtr::NULL, CapPtrDepth::DIRECT), Err(Error::InvalidCapability));
        assert_eq!(t.claim(CapPtr(4), CapPtrDepth::DIRECT), Err(Error::InvalidCapability));
        assert_eq!(t.insert(CapPtr(2), 7), Ok(()));
        assert_eq!(t.insert(CapPtr(2), 8), Err(Error::CapNonempty));
    }

    #[test]
    fn test_depth_selects_low_bits() {
        let t: CapTable<u32> = CapTable::new(16);
        // 0x13 at depth 4 is slot 3
        assert_eq!(t.claim(CapPtr(0x13), CapPtrDepth(4)), Ok(true));
        t.install(CapPtr(0x13), CapPtrDepth(4), 9).unwrap();
        assert_eq!(t.lookup(CapPtr(3), CapPtrDepth::DIRECT), Ok(9));
    }

    #[test]
    fn test_claim_has_single_winner() {
        const THREADS: usize = 8;
        let t: Arc<CapTable<u32>> = Arc::new(CapTable::new(4));
        let wins = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let (t, wins, barrier) = (Arc::clone(&t), Arc::clone(&wins), Arc::clone(&barrier));
                thread::spawn(move || {
                    barrier.wait();
                    if t.claim(CapPtr(1), CapPtrDepth::DIRECT).unwrap() {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(wins.load(Ordering::SeqCst), 1);
    }
}
