//! Kernel memory: arena, first-fit heap and memory objects
//!
//! Kernel memory is addressed logically, `[0, arena.size())`. The arena is
//! one anonymous mapping, and logical address `a` lives at `base + a`.
//! Addresses at or above the kernel limit are user memory: they are
//! recorded but never dereferenced.

mod heap;
mod object;

pub use heap::{FirstFitHeap, DEFAULT_GRANULARITY, MIN_GRANULARITY};
pub use object::{MemoryDescriptor, MemoryObject, MemoryProperties};

use kinv_core::constants::PAGE_SIZE;
use kinv_core::{Error, KResult};
use std::ptr::NonNull;

/// Half-open address range `[start, start + size)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddrRange {
    pub start: usize,
    pub size: usize,
}

impl AddrRange {
    pub const fn new(start: usize, size: usize) -> Self {
        AddrRange { start, size }
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.start.saturating_add(self.size)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Intersection, empty if disjoint
    pub fn cut(&self, other: AddrRange) -> AddrRange {
        let start = self.start.max(other.start);
        let end = self.end().min(other.end());
        if end > start {
            AddrRange::new(start, end - start)
        } else {
            AddrRange::new(start, 0)
        }
    }

    pub fn contains(&self, other: AddrRange) -> bool {
        other.start >= self.start && other.end() <= self.end()
    }
}

#[inline]
pub(crate) fn round_up(v: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    v.checked_add(align - 1).map(|x| x & !(align - 1))
}

#[inline]
pub(crate) fn round_down(v: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    v & !(align - 1)
}

/// Backing store for kernel logical addresses
pub struct Arena {
    base: NonNull<u8>,
    size: usize,
}

// Safety: the arena is a plain byte region; callers synchronize access to
// the bytes they own (heap nodes under the heap lock, objects by allocation)
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Map `size` bytes, rounded up to whole pages
    pub fn new(size: usize) -> KResult<Arena> {
        if size == 0 {
            return Err(Error::InvalidArgument);
        }
        let size = round_up(size, PAGE_SIZE).ok_or(Error::InsufficientResources)?;

        // Safety: anonymous private mapping, no file descriptor involved
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(Error::InsufficientResources);
        }
        let base = NonNull::new(base as *mut u8).ok_or(Error::InsufficientResources)?;
        Ok(Arena { base, size })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn contains(&self, addr: usize, len: usize) -> bool {
        addr.checked_add(len).map_or(false, |end| end <= self.size)
    }

    /// # Safety
    ///
    /// `addr` must be inside the arena and the caller must own the bytes it
    /// touches through the pointer.
    #[inline]
    pub(crate) unsafe fn ptr(&self, addr: usize) -> *mut u8 {
        debug_assert!(addr < self.size);
        self.base.as_ptr().add(addr)
    }

    /// Copy `bytes` into kernel memory at `addr`
    pub fn write(&self, addr: usize, bytes: &[u8]) -> KResult<()> {
        if !self.contains(addr, bytes.len()) {
            return Err(Error::NotKernelmem);
        }
        // Safety: bounds checked above
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.base.as_ptr().add(addr), bytes.len()) };
        Ok(())
    }

    /// Copy kernel memory at `addr` into `out`
    pub fn read(&self, addr: usize, out: &mut [u8]) -> KResult<()> {
        if !self.contains(addr, out.len()) {
            return Err(Error::NotKernelmem);
        }
        // Safety: bounds checked above
        unsafe { std::ptr::copy_nonoverlapping(self.base.as_ptr().add(addr), out.as_mut_ptr(), out.len()) };
        Ok(())
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // Safety: base/size are exactly what mmap returned
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.size);
        }
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena").field("size", &self.size).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_rounds_to_pages() {
        let a = Arena::new(100).unwrap();
        assert_eq!(a.size(), PAGE_SIZE);
        assert!(a.contains(0, PAGE_SIZE));
        assert!(!a.contains(1, PAGE_SIZE));
        assert!(!a.contains(usize::MAX, 2));
        assert_eq!(Arena::new(0).unwrap_err(), Error::InvalidArgument);
    }

    #[test]
    fn test_arena_read_write() {
        let a = Arena::new(2 * PAGE_SIZE).unwrap();
        a.write(PAGE_SIZE - 2, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        a.read(PAGE_SIZE - 2, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(a.write(2 * PAGE_SIZE - 1, &[0, 0]), Err(Error::NotKernelmem));
    }

    #[test]
    fn test_range_cut() {
        let r = AddrRange::new(100, 100);
        assert_eq!(r.cut(AddrRange::new(150, 100)), AddrRange::new(150, 50));
        assert!(r.cut(AddrRange::new(300, 10)).is_empty());
        assert!(r.contains(AddrRange::new(120, 80)));
        assert!(!r.contains(AddrRange::new(120, 81)));
    }
}
