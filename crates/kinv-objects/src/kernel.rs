//! The in-process kernel
//!
//! Boots the root memory, the places and the root capability space, and
//! implements [`Transport`] so client portals can invoke objects directly
//! from the calling thread.
//!
//! # Root capability space
//!
//! ```text
//! slot 1      root kernel memory
//! slot 2..5   factories: kernel memory, example, capmap, portal
//! slot 8..    free for creates and portals
//! ```

use crate::captable::CapTable;
use crate::factory::FactoryKind;
use crate::kernel_memory::KernelMemory;
use crate::object::{KernelObject, Storage};
use crate::portal::PortalObject;
use kinv_core::constants::KERNEL_OBJECT_SIZE;
use kinv_core::kprint;
use kinv_core::{kerror, kinfo};
use kinv_core::{CapPtr, CapPtrDepth, CapSpace, Error, Job, KResult, SharedBuf, SysretHandler, Transport};
use kinv_runtime::{Arena, MemoryObject, Places, RuntimeConfig};
use std::sync::Arc;

/// Well-known slots of the root capability space
pub mod caps {
    use kinv_core::CapPtr;

    pub const ROOT_MEMORY: CapPtr = CapPtr(1);
    pub const KERNEL_MEMORY_FACTORY: CapPtr = CapPtr(2);
    pub const EXAMPLE_FACTORY: CapPtr = CapPtr(3);
    pub const CAPMAP_FACTORY: CapPtr = CapPtr(4);
    pub const PORTAL_FACTORY: CapPtr = CapPtr(5);

    /// First slot not used at boot
    pub const FIRST_FREE: u32 = 8;
}

pub struct Kernel {
    config: RuntimeConfig,
    places: Arc<Places>,
    root: Arc<MemoryObject>,
    caps: Arc<CapTable<KernelObject>>,
}

impl Kernel {
    pub fn boot(config: RuntimeConfig) -> KResult<Arc<Kernel>> {
        kprint::init();
        if let Err(msg) = config.validate() {
            kerror!("invalid configuration: {}", msg);
            return Err(Error::InvalidArgument);
        }
        if config.cap_table_slots <= caps::FIRST_FREE as usize {
            kerror!("cap_table_slots must exceed {}", caps::FIRST_FREE);
            return Err(Error::InvalidArgument);
        }

        let arena = Arc::new(Arena::new(config.kernel_memory_size)?);
        let root = MemoryObject::root(arena, config.kernel_limit, config.heap_granularity)?;
        root.set_spin_backoff(config.spin_backoff_cap);
        root.add_range(0, config.kernel_memory_size);

        let places = Arc::new(Places::spawn(config.num_places)?);
        let table = Arc::new(CapTable::new(config.cap_table_slots));
        let km = KernelMemory::new(Arc::clone(&root), Arc::clone(&places));
        table.insert(caps::ROOT_MEMORY, KernelObject::KernelMemory(Arc::new(km)))?;
        table.insert(caps::KERNEL_MEMORY_FACTORY, KernelObject::Factory(FactoryKind::KernelMemory))?;
        table.insert(caps::EXAMPLE_FACTORY, KernelObject::Factory(FactoryKind::Example))?;
        table.insert(caps::CAPMAP_FACTORY, KernelObject::Factory(FactoryKind::CapMap))?;
        table.insert(caps::PORTAL_FACTORY, KernelObject::Factory(FactoryKind::Portal))?;

        kinfo!(
            "kernel up: {} places, {:#x} bytes kernel memory, {} capability slots",
            places.len(),
            root.properties().free,
            table.capacity()
        );
        Ok(Arc::new(Kernel { config, places, root, caps: table }))
    }

    /// Create a portal at `ptr` with a fresh buffer, owned by the root space
    pub fn boot_portal(&self, ptr: CapPtr) -> KResult<SharedBuf> {
        if !self.caps.claim(ptr, CapPtrDepth::DIRECT)? {
            return Err(Error::CapNonempty);
        }
        let storage = match Storage::alloc(&self.root, KERNEL_OBJECT_SIZE) {
            Ok(s) => s,
            Err(e) => {
                self.caps.release(ptr, CapPtrDepth::DIRECT);
                return Err(e);
            }
        };
        let portal = PortalObject::new(storage);
        let buf = SharedBuf::new();
        portal.bind_buffer(Some(buf.clone()));
        portal.set_owner(Some(Arc::clone(&self.caps)));
        self.caps.install(ptr, CapPtrDepth::DIRECT, KernelObject::Portal(Arc::new(portal)))?;
        Ok(buf)
    }

    /// Give the portal at `ptr` a fresh buffer
    pub fn bind_portal(&self, ptr: CapPtr) -> KResult<SharedBuf> {
        let obj = self.lookup(ptr)?;
        let portal = obj.as_portal()?;
        let buf = SharedBuf::new();
        portal.bind_buffer(Some(buf.clone()));
        Ok(buf)
    }

    pub fn lookup(&self, ptr: CapPtr) -> KResult<KernelObject> {
        self.caps.lookup(ptr, CapPtrDepth::DIRECT)
    }

    /// Remove the capability and delete its object
    ///
    /// The capability is unreachable before the teardown starts; `done`
    /// runs once the object's memory is back with its parent. An object
    /// that refuses deletion is put back in its slot.
    pub fn delete_cap(&self, ptr: CapPtr, done: Job) -> KResult<()> {
        let obj = self.caps.take(ptr, CapPtrDepth::DIRECT)?;
        match obj.delete(done) {
            Ok(()) => {
                self.caps.release(ptr, CapPtrDepth::DIRECT);
                Ok(())
            }
            Err(e) => {
                self.caps.install(ptr, CapPtrDepth::DIRECT, obj)?;
                Err(e)
            }
        }
    }

    pub fn caps(&self) -> &Arc<CapTable<KernelObject>> {
        &self.caps
    }

    pub fn root_memory(&self) -> &Arc<MemoryObject> {
        &self.root
    }

    pub fn places(&self) -> &Arc<Places> {
        &self.places
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Stop the places; objects homed on them stop draining
    pub fn shutdown(&self) {
        self.places.shutdown();
        kinfo!("kernel down");
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        self.places.shutdown();
        // Portals hold the table they are installed in
        self.caps.clear();
    }
}

impl Transport for Kernel {
    fn invoke(&self, portal: CapPtr, target: CapPtr, ctx: Arc<dyn SysretHandler>) -> KResult<()> {
        let obj = self.lookup(portal)?;
        obj.as_portal()?.send_invocation(target, ctx)
    }

    fn signal(&self, target: CapPtr) -> KResult<()> {
        let obj = self.lookup(target)?;
        obj.as_portal()?.signal();
        Ok(())
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("places", &self.places.len())
            .field("root", &self.root)
            .field("occupied", &self.caps.occupied())
            .finish()
    }
}
