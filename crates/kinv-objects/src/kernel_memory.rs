//! Kernel memory objects and the create pattern
//!
//! Every create is sent to the kernel memory object that pays for the new
//! object. The handler resolves the destination slot, checks the factory,
//! claims the slot, lets the factory carve the object and finally installs
//! it. A failed factory or install releases the claim, so the slot is
//! reusable, and a created object that never got installed is deleted.

use crate::captable::CapTable;
use crate::invocation::Invocation;
use crate::object::{submit, write_debug_info, KernelObject};
use kinv_core::protocol::kernel_memory::{CreateBase, Method, PropertiesRes};
use kinv_core::protocol::{kernel_object, ProtocolId};
use kinv_core::{kdebug, kinfo, kwarn};
use kinv_core::{CapPtr, CapPtrDepth, CapSpace, Error, Job, KResult};
use kinv_runtime::{MemoryObject, Places};
use std::sync::Arc;

pub struct KernelMemory {
    mem: Arc<MemoryObject>,
    places: Arc<Places>,
}

impl KernelMemory {
    pub fn new(mem: Arc<MemoryObject>, places: Arc<Places>) -> Self {
        KernelMemory { mem, places }
    }

    pub fn memory(&self) -> &Arc<MemoryObject> {
        &self.mem
    }

    /// Requests queue on the memory object's own monitor, behind frees
    pub fn invoke(self: &Arc<Self>, inv: Invocation) {
        let this = Arc::clone(self);
        submit(self.mem.monitor(), inv, move |_: &mut (), _, inv| this.dispatch_request(inv));
    }

    fn dispatch_request(&self, inv: &Invocation) -> Error {
        match ProtocolId::from_u8(inv.protocol()) {
            Some(ProtocolId::KernelObject) => match kernel_object::Method::from_u8(inv.method()) {
                Some(kernel_object::Method::GetDebugInfo) => {
                    let p = self.mem.properties();
                    let text = format!(
                        "kernel memory {:#x}+{:#x}, {:#x} free, {} outstanding",
                        p.start,
                        p.size,
                        p.free,
                        self.mem.outstanding()
                    );
                    write_debug_info(inv, &text)
                }
                _ => Error::NotImplemented,
            },
            Some(ProtocolId::KernelMemory) => match Method::from_u8(inv.method()) {
                Some(Method::Properties) => {
                    let p = self.mem.properties();
                    inv.write(&PropertiesRes { start: p.start as u64, size: p.size as u64, free: p.free as u64 });
                    Error::Success
                }
                Some(Method::Create) => self.create(inv).into(),
                _ => Error::NotImplemented,
            },
            _ => Error::NotImplemented,
        }
    }

    fn create(&self, inv: &Invocation) -> KResult<()> {
        let data: CreateBase = inv.read()?;

        let (space, depth): (Arc<CapTable<KernelObject>>, CapPtrDepth) = if data.is_indirect() {
            let map = inv.lookup(data.dst_space)?;
            (Arc::clone(map.as_capmap()?.table()), CapPtrDepth(data.dst_depth))
        } else {
            (Arc::clone(inv.caps()), CapPtrDepth::DIRECT)
        };

        let factory = match inv.lookup(data.factory)? {
            KernelObject::Factory(f) => f,
            _ => return Err(Error::TypeMismatch),
        };
        kdebug!(target: "create", "{:?} into {:?} at depth {}", factory, data.dst, depth.bits());

        if !space.claim(data.dst, depth)? {
            return Err(Error::LostRace);
        }
        let object = match factory.create(&self.mem, &self.places, inv) {
            Ok(o) => o,
            Err(e) => {
                space.release(data.dst, depth);
                return Err(e);
            }
        };
        install_created(&*space, data.dst, depth, object)
    }

    /// Tear down once every allocation from this memory is returned
    ///
    /// The root memory cannot be deleted.
    pub fn delete(&self, done: Job) -> KResult<()> {
        self.mem.teardown(done)
    }
}

impl std::fmt::Debug for KernelMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("KernelMemory").field(&self.mem).finish()
    }
}

/// Install a new object into the slot claimed for it
///
/// On failure the claim is released and the object deleted, so its
/// storage goes back to the memory that paid for it.
fn install_created<C>(space: &C, dst: CapPtr, depth: CapPtrDepth, object: KernelObject) -> KResult<()>
where
    C: CapSpace<Object = KernelObject> + ?Sized,
{
    let kind = object.kind();
    if let Err(e) = space.install(dst, depth, object.clone()) {
        space.release(dst, depth);
        if let Err(d) = object.delete(Box::new(|| {})) {
            kwarn!(target: "create", "uninstalled {} not deleted: {}", kind, d);
        }
        return Err(e);
    }
    kinfo!(target: "create", "{} installed at {:?}", kind, dst);
    Ok(())
}
