//! Typed invocation stubs
//!
//! Thin wrappers that pick the message and the reply type for each
//! method. They take the lock by value and hand back the future, so a
//! chain of calls reads as `stub.a(lock).wait()?` then `reuse()`.

use crate::portal::{PortalFuture, PortalLock};
use kinv_core::protocol::example::{MoveHome, Ping, PrintMessage};
use kinv_core::protocol::kernel_memory::{Create, CreateBase, Properties, PropertiesRes};
use kinv_core::protocol::kernel_object::{DebugInfoRes, GetDebugInfo};
use kinv_core::protocol::capmap;
use kinv_core::{CapPtr, Message};

/// Ask any object to describe itself
pub fn get_debug_info(lock: PortalLock<'_>, target: CapPtr) -> PortalFuture<'_, DebugInfoRes> {
    lock.invoke(target, &GetDebugInfo)
}

/// A kernel memory capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelMemoryCap(pub CapPtr);

impl KernelMemoryCap {
    pub fn properties<'a>(&self, lock: PortalLock<'a>) -> PortalFuture<'a, PropertiesRes> {
        lock.invoke(self.0, &Properties)
    }

    /// Carve a child memory object of `size` bytes into `dst`
    pub fn create_kernel_memory<'a>(
        &self,
        lock: PortalLock<'a>,
        factory: CapPtr,
        dst: CapPtr,
        size: u64,
        alignment: u64,
    ) -> PortalFuture<'a, ()> {
        lock.invoke(self.0, &Create::new(dst, factory, size, alignment))
    }

    pub fn create_example<'a>(&self, lock: PortalLock<'a>, factory: CapPtr, dst: CapPtr) -> PortalFuture<'a, ()> {
        lock.invoke(self.0, &CreateBase::new(dst, factory))
    }

    pub fn create_capmap<'a>(
        &self,
        lock: PortalLock<'a>,
        factory: CapPtr,
        dst: CapPtr,
        index_bits: u8,
    ) -> PortalFuture<'a, ()> {
        lock.invoke(self.0, &capmap::Create::new(dst, factory, index_bits))
    }

    /// The new portal has no buffer until the kernel binds one
    pub fn create_portal<'a>(&self, lock: PortalLock<'a>, factory: CapPtr, dst: CapPtr) -> PortalFuture<'a, ()> {
        lock.invoke(self.0, &CreateBase::new(dst, factory))
    }

    /// Send a prepared create message, e.g. one with an indirect destination
    pub fn create<'a, M: Message>(&self, lock: PortalLock<'a>, msg: &M) -> PortalFuture<'a, ()> {
        lock.invoke(self.0, msg)
    }
}

/// An example object capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExampleCap(pub CapPtr);

impl ExampleCap {
    pub fn print_message<'a>(&self, lock: PortalLock<'a>, text: &str) -> PortalFuture<'a, ()> {
        lock.invoke(self.0, &PrintMessage::new(text))
    }

    /// The reply's `place` is where the handler ran
    pub fn ping<'a>(&self, lock: PortalLock<'a>, wait_cycles: u64) -> PortalFuture<'a, Ping> {
        lock.invoke(self.0, &Ping::new(wait_cycles))
    }

    pub fn move_home<'a>(&self, lock: PortalLock<'a>, location: u16) -> PortalFuture<'a, ()> {
        lock.invoke(self.0, &MoveHome { location })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Portal;
    use kinv_core::{CapPtrDepth, Error};
    use kinv_objects::{caps, Kernel};
    use kinv_runtime::RuntimeConfig;
    use std::sync::Arc;

    fn boot() -> (Arc<Kernel>, Portal) {
        let kernel = Kernel::boot(RuntimeConfig::new().num_places(2).kernel_memory_size(4 << 20)).unwrap();
        let portal = Portal::boot(&kernel, CapPtr(8)).unwrap();
        (kernel, portal)
    }

    #[test]
    fn test_example_session() {
        let (_kernel, portal) = boot();
        let root = KernelMemoryCap(caps::ROOT_MEMORY);
        let obj = ExampleCap(CapPtr(10));

        let f = root.create_example(portal.lock(), caps::EXAMPLE_FACTORY, obj.0);
        f.wait().unwrap();
        let f = obj.print_message(f.reuse(), "hello");
        f.wait().unwrap();
        let f = obj.ping(f.reuse(), 100);
        assert_eq!(f.wait().unwrap().place, Ping::CALLER_THREAD);
        let f = obj.move_home(f.reuse(), 1);
        f.wait().unwrap();
        let f = obj.ping(f.reuse(), 100);
        assert_eq!(f.wait().unwrap().place, 1);

        let f = get_debug_info(f.reuse(), obj.0);
        let text = f.wait().unwrap().text();
        assert!(text.starts_with("example: 1 printed, 2 pings, 1 moves"), "{}", text);
        drop(f);
        assert!(!portal.is_locked());
    }

    #[test]
    fn test_abandoned_ping_does_not_corrupt_next_call() {
        let (_kernel, portal) = boot();
        let root = KernelMemoryCap(caps::ROOT_MEMORY);
        let obj = ExampleCap(CapPtr(10));

        let f = root.create_example(portal.lock(), caps::EXAMPLE_FACTORY, obj.0);
        f.wait().unwrap();
        let f = obj.move_home(f.reuse(), 1);
        f.wait().unwrap();

        // Runs on place 1 well past the drop
        drop(obj.ping(f.reuse(), 20_000_000));
        let f = get_debug_info(portal.lock(), obj.0);
        let text = f.wait().unwrap().text();
        assert!(text.starts_with("example: 0 printed, 1 pings, 1 moves"), "{}", text);
        drop(f);
        assert!(!portal.is_locked());
    }

    #[test]
    fn test_memory_session() {
        let (_kernel, portal) = boot();
        let root = KernelMemoryCap(caps::ROOT_MEMORY);
        let child = KernelMemoryCap(CapPtr(11));

        let f = root.create_kernel_memory(portal.lock(), caps::KERNEL_MEMORY_FACTORY, child.0, 1 << 20, 4096);
        f.wait().unwrap();
        let f = child.properties(f.reuse());
        let props = f.wait().unwrap();
        assert_eq!(props.size, 1 << 20);
        assert_eq!(props.free, 1 << 20);

        let f = root.create_kernel_memory(f.reuse(), caps::KERNEL_MEMORY_FACTORY, child.0, 1 << 20, 4096);
        assert_eq!(f.wait(), Err(Error::LostRace));
    }

    #[test]
    fn test_capmap_and_portal_creates() {
        let (kernel, portal) = boot();
        let root = KernelMemoryCap(caps::ROOT_MEMORY);

        let f = root.create_capmap(portal.lock(), caps::CAPMAP_FACTORY, CapPtr(12), 3);
        f.wait().unwrap();
        let msg = CreateBase::new(CapPtr(2), caps::EXAMPLE_FACTORY).set_indirect_dest(CapPtr(12), CapPtrDepth(3));
        let f = root.create(f.reuse(), &msg);
        f.wait().unwrap();
        let f = get_debug_info(f.reuse(), CapPtr(12));
        assert_eq!(f.wait().unwrap().text(), "capmap 3 bits, 1/8 slots used");

        let f = root.create_portal(f.reuse(), caps::PORTAL_FACTORY, CapPtr(13));
        f.wait().unwrap();
        drop(f);

        // Usable once the kernel gives it a buffer
        let buf = kernel.bind_portal(CapPtr(13)).unwrap();
        let second = Portal::new(CapPtr(13), buf, kernel.clone());
        let f = get_debug_info(second.lock(), caps::PORTAL_FACTORY);
        assert_eq!(f.wait().unwrap().text(), "Portal factory");
    }

    #[test]
    fn test_errors_surface_through_wait() {
        let (_kernel, portal) = boot();
        let f = ExampleCap(CapPtr(40)).ping(portal.lock(), 0);
        assert_eq!(f.wait().unwrap_err(), Error::InvalidCapability);
        let f = ExampleCap(caps::ROOT_MEMORY).ping(f.reuse(), 0);
        assert_eq!(f.wait().unwrap_err(), Error::NotImplemented);
        let f = KernelMemoryCap(caps::ROOT_MEMORY).create_example(f.reuse(), caps::ROOT_MEMORY, CapPtr(41));
        assert_eq!(f.wait().unwrap_err(), Error::TypeMismatch);
    }
}
