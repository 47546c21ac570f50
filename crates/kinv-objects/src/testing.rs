//! Shared setup for unit tests

use crate::captable::CapTable;
use crate::invocation::Invocation;
use crate::object::{KernelObject, Storage};
use crate::portal::PortalObject;
use kinv_core::constants::KERNEL_OBJECT_SIZE;
use kinv_core::{CapPtr, Message, SharedBuf, Tag};
use kinv_runtime::memory::DEFAULT_GRANULARITY;
use kinv_runtime::{Arena, Future, MemoryObject, Places};
use std::sync::Arc;

const MIB: usize = 1 << 20;

pub(crate) struct Fixture {
    pub mem: Arc<MemoryObject>,
    pub places: Arc<Places>,
    pub caps: Arc<CapTable<KernelObject>>,
    /// Bound to `buf` and owned by `caps`
    pub portal: Arc<PortalObject>,
    pub buf: SharedBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let arena = Arc::new(Arena::new(4 * MIB).unwrap());
        let mem = MemoryObject::root(arena, 4 * MIB, DEFAULT_GRANULARITY).unwrap();
        mem.add_range(0, 4 * MIB);
        let places = Arc::new(Places::spawn(2).unwrap());
        let caps = Arc::new(CapTable::new(64));

        let portal = Arc::new(PortalObject::new(Storage::alloc(&mem, KERNEL_OBJECT_SIZE).unwrap()));
        let buf = SharedBuf::new();
        portal.bind_buffer(Some(buf.clone()));
        portal.set_owner(Some(Arc::clone(&caps)));

        Fixture { mem, places, caps, portal, buf }
    }

    /// A portal with neither buffer nor owner
    pub fn new_portal(&self) -> Arc<PortalObject> {
        Arc::new(PortalObject::new(Storage::alloc(&self.mem, KERNEL_OBJECT_SIZE).unwrap()))
    }

    /// Put `msg` in the buffer and open an invocation on the portal
    pub fn invocation<M: Message>(&self, msg: &M) -> (Invocation, Arc<Future>) {
        self.buf.write(msg);
        self.open()
    }

    /// Like [`invocation`](Self::invocation) with a bare tag and no payload
    pub fn raw_invocation(&self, tag: Tag) -> (Invocation, Arc<Future>) {
        self.buf.with_mut(|b| {
            *b = kinv_core::InvocationBuf::new();
            b.set_tag(tag);
        });
        self.open()
    }

    fn open(&self) -> (Invocation, Arc<Future>) {
        let future = Arc::new(Future::new());
        self.portal.begin(future.clone()).unwrap();
        let inv = Invocation::new(Arc::clone(&self.portal), self.buf.clone(), Arc::clone(&self.caps), CapPtr(1));
        (inv, future)
    }
}
