//! Reference-counted kernel memory object
//!
//! A `MemoryObject` manages one range of kernel memory through a
//! [`FirstFitHeap`]. Each live allocation holds a reference on the object's
//! monitor, so [`MemoryObject::teardown`] waits until every allocation has
//! been returned before handing the object's own memory back to its parent.

use super::{AddrRange, Arena, FirstFitHeap};
use crate::monitor::{Monitor, Step, Tasklet};
use kinv_core::constants::{CACHE_LINE_SIZE, KERNEL_OBJECT_SIZE, PAGE_SIZE};
use kinv_core::{kdebug, kerror, kinfo};
use kinv_core::{Error, Job, KResult, SpinLock};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// One request of a batch allocation; `addr` is filled in on success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryDescriptor {
    pub addr: Option<usize>,
    pub size: usize,
    pub alignment: usize,
}

impl MemoryDescriptor {
    pub const fn new(size: usize, alignment: usize) -> Self {
        MemoryDescriptor { addr: None, size, alignment }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryProperties {
    pub start: usize,
    pub size: usize,
    pub free: usize,
}

pub struct MemoryObject {
    arena: Arc<Arena>,
    heap: SpinLock<FirstFitHeap>,
    spin_backoff: AtomicU32,
    /// Range this object manages, logical addresses
    range: AddrRange,
    kernel_limit: usize,
    umem: SpinLock<Vec<AddrRange>>,
    monitor: Arc<Monitor<()>>,
    parent: Option<Arc<MemoryObject>>,
    /// Descriptor storage carved from the parent
    storage: Option<usize>,
}

impl MemoryObject {
    /// The root object over the whole arena; memory is added with
    /// [`add_range`](Self::add_range)
    pub fn root(arena: Arc<Arena>, kernel_limit: usize, granularity: usize) -> KResult<Arc<MemoryObject>> {
        let heap = FirstFitHeap::with_granularity(Arc::clone(&arena), granularity)?;
        let range = AddrRange::new(0, arena.size().min(kernel_limit));
        Ok(Arc::new(MemoryObject {
            arena,
            heap: SpinLock::new(heap),
            spin_backoff: AtomicU32::new(kinv_core::spinlock::DEFAULT_BACKOFF_CAP),
            range,
            kernel_limit,
            umem: SpinLock::new(Vec::new()),
            monitor: Arc::new(Monitor::new(())),
            parent: None,
            storage: None,
        }))
    }

    /// Carve a child object out of `parent`
    ///
    /// `alignment` must be a multiple of the page size and `size` a
    /// multiple of `alignment`.
    pub fn carve(parent: &Arc<MemoryObject>, size: usize, alignment: usize) -> KResult<Arc<MemoryObject>> {
        if alignment == 0 || alignment % PAGE_SIZE != 0 || size == 0 || size % alignment != 0 {
            return Err(Error::Unaligned);
        }
        let region = parent.alloc(size, alignment)?;
        let storage = match parent.create_object(KERNEL_OBJECT_SIZE) {
            Ok(s) => s,
            Err(e) => {
                parent.free(region, size);
                return Err(e);
            }
        };

        let granularity = parent.heap.lock().granularity();
        let heap = match FirstFitHeap::with_granularity(Arc::clone(&parent.arena), granularity) {
            Ok(h) => h,
            Err(e) => {
                parent.free(storage, KERNEL_OBJECT_SIZE);
                parent.free(region, size);
                return Err(e);
            }
        };

        let child = Arc::new(MemoryObject {
            arena: Arc::clone(&parent.arena),
            heap: SpinLock::with_backoff(heap, parent.spin_backoff()),
            spin_backoff: AtomicU32::new(parent.spin_backoff()),
            range: AddrRange::new(region, size),
            kernel_limit: parent.kernel_limit,
            umem: SpinLock::new(Vec::new()),
            monitor: Arc::new(Monitor::new(())),
            parent: Some(Arc::clone(parent)),
            storage: Some(storage),
        });
        child.add_range(region, size);
        kinfo!(target: "kmem", "carved {:#x}+{:#x} (descriptor at {:#x})", region, size, storage);
        Ok(child)
    }

    /// Cap on the heap lock's backoff; children inherit it
    pub fn set_spin_backoff(&self, cap: u32) {
        self.spin_backoff.store(cap, Ordering::Relaxed);
        self.heap.set_backoff_cap(cap);
    }

    pub fn spin_backoff(&self) -> u32 {
        self.spin_backoff.load(Ordering::Relaxed)
    }

    pub fn alloc(&self, length: usize, alignment: usize) -> KResult<usize> {
        let res = self.heap.lock().alloc(length, alignment);
        match res {
            Ok(addr) => {
                self.monitor.acquire_ref();
                kdebug!(target: "kmem", "alloc {:#x} bytes at {:#x} (align {:#x})", length, addr, alignment);
                Ok(addr)
            }
            Err(e) => {
                kdebug!(target: "kmem", "alloc {:#x} bytes (align {:#x}) failed: {}", length, alignment, e);
                Err(e)
            }
        }
    }

    /// All or nothing: on failure every descriptor filled so far is freed
    pub fn alloc_batch(&self, descs: &mut [MemoryDescriptor]) -> KResult<()> {
        for i in 0..descs.len() {
            debug_assert!(descs[i].addr.is_none());
            match self.alloc(descs[i].size, descs[i].alignment) {
                Ok(addr) => descs[i].addr = Some(addr),
                Err(e) => {
                    self.free_batch(&mut descs[..i]);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// A rejected free is logged and does not count against outstanding
    pub fn free(&self, addr: usize, length: usize) {
        if !self.range.contains(AddrRange::new(addr, length)) {
            kerror!(target: "kmem", "free outside object range: {:#x}+{:#x}", addr, length);
            return;
        }
        let res = self.heap.lock().free(addr, length);
        if let Err(e) = res {
            kerror!(target: "kmem", "free {:#x} bytes at {:#x} rejected: {}", length, addr, e);
            return;
        }
        kdebug!(target: "kmem", "free {:#x} bytes at {:#x}", length, addr);
        // Release last: it may run the teardown
        self.monitor.release_ref();
    }

    pub fn free_batch(&self, descs: &mut [MemoryDescriptor]) {
        for d in descs.iter_mut() {
            if let Some(addr) = d.addr.take() {
                self.free(addr, d.size);
            }
        }
    }

    /// Storage for a kernel object descriptor
    pub fn create_object(&self, size: usize) -> KResult<usize> {
        self.alloc(size, CACHE_LINE_SIZE)
    }

    /// Add memory, splitting it at the kernel limit
    ///
    /// The kernel part that falls inside this object's range feeds the
    /// heap; everything at or above the limit is kept as user memory.
    pub fn add_range(&self, start: usize, length: usize) {
        let added = AddrRange::new(start, length);
        let kmem = added.cut(self.range).cut(AddrRange::new(0, self.kernel_limit));
        if !kmem.is_empty() {
            kdebug!(target: "kmem", "kernel range {:#x}+{:#x}", kmem.start, kmem.size);
            self.heap.lock().add_range(kmem.start, kmem.size);
        }
        let umem = added.cut(AddrRange::new(self.kernel_limit, usize::MAX - self.kernel_limit));
        if !umem.is_empty() {
            kdebug!(target: "kmem", "user range {:#x}+{:#x}", umem.start, umem.size);
            self.umem.lock().push(umem);
        }
    }

    pub fn properties(&self) -> MemoryProperties {
        MemoryProperties {
            start: self.range.start,
            size: self.range.size,
            free: self.heap.lock().free_bytes(),
        }
    }

    pub fn range(&self) -> AddrRange {
        self.range
    }

    pub fn user_ranges(&self) -> Vec<AddrRange> {
        self.umem.lock().clone()
    }

    pub fn free_ranges(&self) -> Vec<(usize, usize)> {
        self.heap.lock().ranges()
    }

    pub fn arena(&self) -> &Arc<Arena> {
        &self.arena
    }

    pub fn monitor(&self) -> &Arc<Monitor<()>> {
        &self.monitor
    }

    /// Live allocations plus requests in flight
    pub fn outstanding(&self) -> usize {
        self.monitor.ref_count()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Free through the object's monitor, then run `done`
    pub fn free_request(self: &Arc<Self>, descs: Vec<MemoryDescriptor>, done: Job) {
        let this = Arc::clone(self);
        self.monitor.request(Tasklet::new(move |_: &mut (), _| {
            let mut descs = descs;
            this.free_batch(&mut descs);
            done();
            Step::Done
        }));
    }

    /// Delete the object once every allocation from it is returned
    ///
    /// The managed range and the descriptor go back to the parent, then
    /// `done` runs. The root object cannot be deleted.
    pub fn teardown(self: &Arc<Self>, done: Job) -> KResult<()> {
        let parent = match &self.parent {
            Some(p) => Arc::clone(p),
            None => return Err(Error::RequestDenied),
        };
        let mut descs = vec![MemoryDescriptor {
            addr: Some(self.range.start),
            size: self.range.size,
            alignment: PAGE_SIZE,
        }];
        if let Some(storage) = self.storage {
            descs.push(MemoryDescriptor { addr: Some(storage), size: KERNEL_OBJECT_SIZE, alignment: CACHE_LINE_SIZE });
        }
        let range = self.range;
        self.monitor.when_released(Box::new(move || {
            kinfo!(target: "kmem", "deleting {:#x}+{:#x}", range.start, range.size);
            parent.free_request(descs, done);
        }));
        Ok(())
    }
}

impl std::fmt::Debug for MemoryObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryObject")
            .field("range", &self.range)
            .field("free", &self.heap.lock().free_bytes())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::memory::DEFAULT_GRANULARITY;
    use std::sync::atomic::AtomicBool;

    const MIB: usize = 1 << 20;

    fn root(size: usize) -> Arc<MemoryObject> {
        let arena = Arc::new(Arena::new(size).unwrap());
        let root = MemoryObject::root(arena, size, DEFAULT_GRANULARITY).unwrap();
        root.add_range(0, size);
        root
    }

    #[test]
    fn test_refcount_tracks_allocations() {
        let m = root(MIB);
        assert_eq!(m.outstanding(), 0);
        let a = m.alloc(100, 64).unwrap();
        let b = m.create_object(KERNEL_OBJECT_SIZE).unwrap();
        assert_eq!(b % CACHE_LINE_SIZE, 0);
        assert_eq!(m.outstanding(), 2);

        assert!(m.alloc(2 * MIB, 64).is_err());
        assert_eq!(m.outstanding(), 2);

        m.free(a, 100);
        m.free(b, KERNEL_OBJECT_SIZE);
        assert_eq!(m.outstanding(), 0);
        assert_eq!(m.properties().free, MIB);
    }

    #[test]
    fn test_double_free_does_not_drop_a_reference() {
        let m = root(MIB);
        let a = m.alloc(128, 64).unwrap();
        let b = m.alloc(128, 64).unwrap();
        m.free(a, 128);
        assert_eq!(m.outstanding(), 1);

        m.free(a, 128);
        m.free(2 * MIB, 64);
        assert_eq!(m.outstanding(), 1);
        assert_eq!(m.properties().free, MIB - 128);

        m.free(b, 128);
        assert_eq!(m.outstanding(), 0);
    }

    #[test]
    fn test_batch_rolls_back() {
        let m = root(MIB);
        let mut descs = [
            MemoryDescriptor::new(4096, 4096),
            MemoryDescriptor::new(4096, 4096),
            MemoryDescriptor::new(2 * MIB, 4096),
        ];
        assert_eq!(m.alloc_batch(&mut descs), Err(Error::InsufficientResources));
        assert!(descs.iter().all(|d| d.addr.is_none()));
        assert_eq!(m.outstanding(), 0);
        assert_eq!(m.free_ranges(), vec![(0, MIB)]);

        let mut ok = [MemoryDescriptor::new(64, 64), MemoryDescriptor::new(4096, 4096)];
        m.alloc_batch(&mut ok).unwrap();
        assert_eq!(m.outstanding(), 2);
        m.free_batch(&mut ok);
        assert_eq!(m.outstanding(), 0);
    }

    #[test]
    fn test_kernel_user_split() {
        let arena = Arc::new(Arena::new(MIB).unwrap());
        let m = MemoryObject::root(arena, MIB, DEFAULT_GRANULARITY).unwrap();
        m.add_range(MIB / 2, MIB);

        assert_eq!(m.free_ranges(), vec![(MIB / 2, MIB / 2)]);
        assert_eq!(m.user_ranges(), vec![AddrRange::new(MIB, MIB / 2)]);

        m.add_range(4 * MIB, 4096);
        assert_eq!(m.user_ranges().len(), 2);
        assert_eq!(m.properties().free, MIB / 2);
    }

    #[test]
    fn test_carve_checks_alignment() {
        let m = root(MIB);
        assert_eq!(MemoryObject::carve(&m, 8192, 100).unwrap_err(), Error::Unaligned);
        assert_eq!(MemoryObject::carve(&m, 6000, 4096).unwrap_err(), Error::Unaligned);
        assert_eq!(MemoryObject::carve(&m, 4 * MIB, 4096).unwrap_err(), Error::InsufficientResources);
        assert_eq!(m.outstanding(), 0);
    }

    #[test]
    fn test_teardown_waits_for_last_free() {
        let root = root(MIB);
        let child = MemoryObject::carve(&root, 64 * 1024, 4096).unwrap();
        assert_eq!(child.range().start % 4096, 0);
        assert_eq!(child.properties().free, 64 * 1024);
        // the region plus the descriptor
        assert_eq!(root.outstanding(), 2);

        let a = child.alloc(1000, 64).unwrap();
        let done = Arc::new(AtomicBool::new(false));
        let d = Arc::clone(&done);
        child.teardown(Box::new(move || d.store(true, Ordering::SeqCst))).unwrap();
        assert!(!done.load(Ordering::SeqCst));
        assert_eq!(root.outstanding(), 2);

        child.free(a, 1000);
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(root.outstanding(), 0);
        assert_eq!(root.free_ranges(), vec![(0, MIB)]);
    }

    #[test]
    fn test_root_cannot_be_torn_down() {
        let m = root(4096);
        assert_eq!(m.teardown(Box::new(|| {})), Err(Error::RequestDenied));
    }
}
