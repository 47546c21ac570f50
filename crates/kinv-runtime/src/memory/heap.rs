//! Intrusive first-fit free list
//!
//! The list lives in the free memory itself: every free range starts with a
//! `RangeNode { length, next }` written at its own start address. Ranges
//! are kept in address order, disjoint, and merged with their neighbours
//! whenever they touch.
//!
//! Not thread safe; `MemoryObject` wraps it in a `SpinLock`.

use super::{round_down, round_up, Arena};
use kinv_core::{kerror, Error, KResult};
use std::ptr;
use std::sync::Arc;

/// Default allocation granularity, one cache line
pub const DEFAULT_GRANULARITY: usize = 64;

/// A range must be able to hold its own node
pub const MIN_GRANULARITY: usize = std::mem::size_of::<RangeNode>();

/// End of list; 0 is a valid logical address
const NIL: usize = usize::MAX;

#[repr(C)]
#[derive(Clone, Copy)]
struct RangeNode {
    length: usize,
    next: usize,
}

pub struct FirstFitHeap {
    arena: Arc<Arena>,
    head: usize,
    granularity: usize,
    free: usize,
}

impl FirstFitHeap {
    pub fn new(arena: Arc<Arena>) -> Self {
        FirstFitHeap { arena, head: NIL, granularity: DEFAULT_GRANULARITY, free: 0 }
    }

    /// Granularity must be a power of two of at least [`MIN_GRANULARITY`]
    pub fn with_granularity(arena: Arc<Arena>, granularity: usize) -> KResult<Self> {
        if !granularity.is_power_of_two() || granularity < MIN_GRANULARITY {
            return Err(Error::InvalidArgument);
        }
        Ok(FirstFitHeap { arena, head: NIL, granularity, free: 0 })
    }

    #[inline]
    pub fn granularity(&self) -> usize {
        self.granularity
    }

    #[inline]
    pub fn free_bytes(&self) -> usize {
        self.free
    }

    pub fn arena(&self) -> &Arc<Arena> {
        &self.arena
    }

    /// Carve `length` bytes aligned to `alignment`
    pub fn alloc(&mut self, length: usize, alignment: usize) -> KResult<usize> {
        if !alignment.is_power_of_two() || length == 0 {
            return Err(Error::InvalidArgument);
        }
        let size = round_up(length, self.granularity).ok_or(Error::InsufficientResources)?;
        let alignment = alignment.max(self.granularity);

        let mut prev = None;
        let mut cur = self.head;
        while cur != NIL {
            let r = self.read(cur);
            let aligned = match round_up(cur, alignment) {
                Some(a) => a,
                None => break,
            };
            let offset = aligned - cur;

            if r.length > offset && r.length - offset >= size {
                let mut range = r;
                if offset != 0 {
                    // Keep the misaligned head, continue with the aligned rest
                    range = RangeNode { length: r.length - offset, next: r.next };
                    self.write(aligned, range);
                    self.write(cur, RangeNode { length: offset, next: aligned });
                    prev = Some(cur);
                }
                let start = aligned;

                if range.length > size {
                    let rest = start + size;
                    self.write(rest, RangeNode { length: range.length - size, next: range.next });
                    self.link(prev, rest);
                } else {
                    self.link(prev, range.next);
                }
                self.free -= size;
                return Ok(start);
            }

            prev = Some(cur);
            cur = r.next;
        }
        Err(Error::InsufficientResources)
    }

    /// Return a range obtained from [`alloc`](Self::alloc)
    ///
    /// A range that is unaligned, outside the arena or overlapping free
    /// memory (a double free) is rejected and the list is left untouched.
    pub fn free(&mut self, start: usize, length: usize) -> KResult<()> {
        let length = round_up(length, self.granularity).ok_or(Error::InvalidArgument)?;
        if length == 0 || start % self.granularity != 0 || !self.arena.contains(start, length) {
            kerror!(target: "heap", "bad free: {:#x}+{:#x}", start, length);
            return Err(Error::InvalidArgument);
        }
        self.insert(start, length)
    }

    /// Hand previously unmanaged memory to the heap
    pub fn add_range(&mut self, start: usize, length: usize) {
        let end = match start.checked_add(length) {
            Some(e) => round_down(e, self.granularity),
            None => return,
        };
        let start = match round_up(start, self.granularity) {
            Some(s) => s,
            None => return,
        };
        if end <= start {
            return;
        }
        if !self.arena.contains(start, end - start) {
            kerror!(target: "heap", "range outside arena: {:#x}..{:#x}", start, end);
            return;
        }
        if self.insert(start, end - start).is_err() {
            kerror!(target: "heap", "range already managed: {:#x}..{:#x}", start, end);
        }
    }

    /// Free ranges in address order as (start, length)
    pub fn ranges(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        let mut cur = self.head;
        while cur != NIL {
            let r = self.read(cur);
            out.push((cur, r.length));
            cur = r.next;
        }
        out
    }

    /// Link `start..start+length` in, merging with touching neighbours
    ///
    /// Fails without writing anything if the range overlaps free memory.
    fn insert(&mut self, start: usize, length: usize) -> KResult<()> {
        let end = start + length;

        let mut prev = None;
        let mut cur = self.head;
        while cur != NIL {
            let mut r = self.read(cur);
            if cur == end {
                // Prepend; the predecessor cannot touch us or it would
                // have matched on the previous step
                self.write(start, RangeNode { length: length + r.length, next: r.next });
                self.link(prev, start);
                break;
            }
            if cur + r.length == start {
                if r.next != NIL && end > r.next {
                    return Err(self.overlap(start, length));
                }
                r.length += length;
                // Now maybe touching the successor as well
                if r.next != NIL && cur + r.length == r.next {
                    let next = self.read(r.next);
                    r.length += next.length;
                    r.next = next.next;
                }
                self.write(cur, r);
                break;
            }
            if start < cur {
                if end > cur {
                    return Err(self.overlap(start, length));
                }
                self.write(start, RangeNode { length, next: cur });
                self.link(prev, start);
                break;
            }
            if cur + r.length > start {
                return Err(self.overlap(start, length));
            }
            prev = Some(cur);
            cur = r.next;
        }
        if cur == NIL {
            self.write(start, RangeNode { length, next: NIL });
            self.link(prev, start);
        }
        self.free += length;
        Ok(())
    }

    #[cold]
    fn overlap(&self, start: usize, length: usize) -> Error {
        kerror!(target: "heap", "double free of {:#x}+{:#x}", start, length);
        Error::InvalidArgument
    }

    fn link(&mut self, prev: Option<usize>, next: usize) {
        match prev {
            None => self.head = next,
            Some(p) => {
                let mut n = self.read(p);
                n.next = next;
                self.write(p, n);
            }
        }
    }

    #[inline]
    fn read(&self, addr: usize) -> RangeNode {
        debug_assert!(self.arena.contains(addr, MIN_GRANULARITY));
        // Safety: free ranges are inside the arena, granularity aligned
        // and owned by the heap
        unsafe { ptr::read(self.arena.ptr(addr) as *const RangeNode) }
    }

    #[inline]
    fn write(&mut self, addr: usize, node: RangeNode) {
        debug_assert!(self.arena.contains(addr, MIN_GRANULARITY));
        // Safety: as in `read`
        unsafe { ptr::write(self.arena.ptr(addr) as *mut RangeNode, node) }
    }
}
