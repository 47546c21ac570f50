//! Factories: what a create builds out of a memory object
//!
//! A factory capability names the kind of object a create produces. The
//! factory carves the object's storage from the kernel memory the create
//! was sent to and returns the object ready to be installed.

use crate::capmap::CapMap;
use crate::example::ExampleObject;
use crate::invocation::Invocation;
use crate::kernel_memory::KernelMemory;
use crate::object::{write_debug_info, KernelObject, Storage};
use crate::portal::PortalObject;
use kinv_core::constants::KERNEL_OBJECT_SIZE;
use kinv_core::protocol::kernel_object::GetDebugInfo;
use kinv_core::protocol::{capmap, kernel_memory};
use kinv_core::{Error, KResult, Message};
use kinv_runtime::{MemoryObject, Places};
use std::sync::Arc;

/// Largest capability map a create may ask for
pub const MAX_INDEX_BITS: u8 = 20;

/// Bytes of storage per capability map slot
pub const CAP_ENTRY_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactoryKind {
    KernelMemory,
    Example,
    CapMap,
    Portal,
}

impl FactoryKind {
    /// Build the object for the create in `inv`, carving from `mem`
    ///
    /// Nothing stays allocated on failure.
    pub fn create(self, mem: &Arc<MemoryObject>, places: &Arc<Places>, inv: &Invocation) -> KResult<KernelObject> {
        match self {
            FactoryKind::KernelMemory => {
                let msg: kernel_memory::Create = inv.read()?;
                let size = usize::try_from(msg.size).map_err(|_| Error::InvalidArgument)?;
                let alignment = usize::try_from(msg.alignment).map_err(|_| Error::InvalidArgument)?;
                let child = MemoryObject::carve(mem, size, alignment)?;
                Ok(KernelObject::KernelMemory(Arc::new(KernelMemory::new(child, Arc::clone(places)))))
            }
            FactoryKind::Example => {
                let storage = Storage::alloc(mem, KERNEL_OBJECT_SIZE)?;
                Ok(KernelObject::Example(Arc::new(ExampleObject::new(storage, Arc::clone(places)))))
            }
            FactoryKind::CapMap => {
                let msg: capmap::Create = inv.read()?;
                if msg.index_bits == 0 || msg.index_bits > MAX_INDEX_BITS {
                    return Err(Error::InvalidArgument);
                }
                let storage = Storage::alloc(mem, CAP_ENTRY_SIZE << msg.index_bits)?;
                Ok(KernelObject::CapMap(Arc::new(CapMap::new(storage, msg.index_bits))))
            }
            FactoryKind::Portal => {
                let storage = Storage::alloc(mem, KERNEL_OBJECT_SIZE)?;
                let portal = PortalObject::new(storage);
                // Resolves its invocations where it was created
                portal.set_owner(Some(Arc::clone(inv.caps())));
                Ok(KernelObject::Portal(Arc::new(portal)))
            }
        }
    }

    /// Factories are stateless and answer without a monitor
    pub fn invoke(self, inv: Invocation) {
        let result = if inv.tag().label() == GetDebugInfo::LABEL {
            write_debug_info(&inv, &format!("{:?} factory", self))
        } else {
            Error::NotImplemented
        };
        inv.reply_response(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use kinv_core::protocol::kernel_object::DebugInfoRes;
    use kinv_core::CapPtr;

    #[test]
    fn test_capmap_index_bits_are_bounded() {
        let fx = Fixture::new();
        let before = fx.mem.outstanding();
        for bits in [0u8, MAX_INDEX_BITS + 1] {
            let (inv, _f) = fx.invocation(&capmap::Create::new(CapPtr(9), CapPtr(4), bits));
            assert_eq!(FactoryKind::CapMap.create(&fx.mem, &fx.places, &inv).err(), Some(Error::InvalidArgument));
            inv.reply_response(Error::InvalidArgument);
        }
        assert_eq!(fx.mem.outstanding(), before);

        let (inv, _f) = fx.invocation(&capmap::Create::new(CapPtr(9), CapPtr(4), 4));
        let obj = FactoryKind::CapMap.create(&fx.mem, &fx.places, &inv).unwrap();
        assert_eq!(obj.as_capmap().unwrap().table().capacity(), 16);
        assert_eq!(fx.mem.outstanding(), before + 1);
        inv.reply_response(Error::Success);
    }

    #[test]
    fn test_kernel_memory_requires_page_alignment() {
        let fx = Fixture::new();
        let (inv, _f) = fx.invocation(&kernel_memory::Create::new(CapPtr(9), CapPtr(2), 8192, 64));
        assert_eq!(FactoryKind::KernelMemory.create(&fx.mem, &fx.places, &inv).err(), Some(Error::Unaligned));
        inv.reply_response(Error::Unaligned);
    }

    #[test]
    fn test_portal_is_owned_by_creator() {
        let fx = Fixture::new();
        let (inv, _f) = fx.invocation(&kernel_memory::CreateBase::new(CapPtr(9), CapPtr(5)));
        let obj = FactoryKind::Portal.create(&fx.mem, &fx.places, &inv).unwrap();
        let portal = obj.as_portal().unwrap();
        assert!(portal.buffer().is_none());
        inv.reply_response(Error::Success);
    }

    #[test]
    fn test_factory_answers_debug_info() {
        let fx = Fixture::new();
        let (inv, f) = fx.invocation(&GetDebugInfo);
        FactoryKind::Example.invoke(inv);
        assert_eq!(f.state(), Error::Success);
        assert_eq!(fx.buf.read::<DebugInfoRes>().unwrap().text(), "Example factory");
    }
}
