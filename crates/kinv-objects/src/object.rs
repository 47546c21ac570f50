//! The kernel object enum and the shared dispatch wrapper
//!
//! Capabilities point at a [`KernelObject`]. Each variant owns a monitor
//! and a dispatch table (a `match` on protocol and method); [`submit`]
//! wraps a table into a tasklet that reports the handler's result through
//! the invocation and then completes the monitor.

use crate::capmap::CapMap;
use crate::example::ExampleObject;
use crate::factory::FactoryKind;
use crate::invocation::Invocation;
use crate::kernel_memory::KernelMemory;
use crate::portal::PortalObject;
use kinv_core::constants::CACHE_LINE_SIZE;
use kinv_core::kwarn;
use kinv_core::protocol::kernel_object::DebugInfoRes;
use kinv_core::{Error, Job, KResult};
use kinv_runtime::{MemoryDescriptor, MemoryObject, Monitor, MonitorCtx, Step, Tasklet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    KernelMemory,
    Example,
    CapMap,
    Portal,
    Factory,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::KernelMemory => "kernel-memory",
            ObjectKind::Example => "example",
            ObjectKind::CapMap => "capmap",
            ObjectKind::Portal => "portal",
            ObjectKind::Factory => "factory",
        };
        f.write_str(name)
    }
}

/// What a capability slot holds
#[derive(Clone)]
pub enum KernelObject {
    KernelMemory(Arc<KernelMemory>),
    Example(Arc<ExampleObject>),
    CapMap(Arc<CapMap>),
    Portal(Arc<PortalObject>),
    Factory(FactoryKind),
}

impl KernelObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            KernelObject::KernelMemory(_) => ObjectKind::KernelMemory,
            KernelObject::Example(_) => ObjectKind::Example,
            KernelObject::CapMap(_) => ObjectKind::CapMap,
            KernelObject::Portal(_) => ObjectKind::Portal,
            KernelObject::Factory(_) => ObjectKind::Factory,
        }
    }

    /// Hand the invocation to the object's monitor
    pub fn invoke(&self, inv: Invocation) {
        match self {
            KernelObject::KernelMemory(o) => o.invoke(inv),
            KernelObject::Example(o) => o.invoke(inv),
            KernelObject::CapMap(o) => o.invoke(inv),
            KernelObject::Portal(o) => o.invoke(inv),
            KernelObject::Factory(f) => f.invoke(inv),
        }
    }

    /// Delete the object once nothing is in flight on it
    ///
    /// `done` runs after its storage went back to the memory object it
    /// was carved from. Factories cannot be deleted.
    pub fn delete(&self, done: Job) -> KResult<()> {
        match self {
            KernelObject::KernelMemory(o) => o.delete(done),
            KernelObject::Example(o) => {
                o.delete(done);
                Ok(())
            }
            KernelObject::CapMap(o) => {
                o.delete(done);
                Ok(())
            }
            KernelObject::Portal(o) => {
                o.delete(done);
                Ok(())
            }
            KernelObject::Factory(_) => Err(Error::RequestDenied),
        }
    }

    pub fn as_portal(&self) -> KResult<&Arc<PortalObject>> {
        match self {
            KernelObject::Portal(p) => Ok(p),
            _ => Err(Error::TypeMismatch),
        }
    }

    pub fn as_capmap(&self) -> KResult<&Arc<CapMap>> {
        match self {
            KernelObject::CapMap(m) => Ok(m),
            _ => Err(Error::TypeMismatch),
        }
    }
}

impl fmt::Debug for KernelObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KernelObject({})", self.kind())
    }
}

/// Backing memory of one kernel object
pub struct Storage {
    mem: Arc<MemoryObject>,
    addr: usize,
    size: usize,
    released: AtomicBool,
}

impl Storage {
    pub fn alloc(mem: &Arc<MemoryObject>, size: usize) -> KResult<Storage> {
        let addr = mem.create_object(size)?;
        Ok(Storage { mem: Arc::clone(mem), addr, size, released: AtomicBool::new(false) })
    }

    pub fn addr(&self) -> usize {
        self.addr
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn memory(&self) -> &Arc<MemoryObject> {
        &self.mem
    }

    /// Return the memory through the owner's monitor, then run `done`
    pub fn release(&self, done: Job) {
        if self.released.swap(true, Ordering::AcqRel) {
            kwarn!(target: "kmem", "object storage at {:#x} released twice", self.addr);
            done();
            return;
        }
        let desc = MemoryDescriptor { addr: Some(self.addr), size: self.size, alignment: CACHE_LINE_SIZE };
        self.mem.free_request(vec![desc], done);
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Storage({:#x}+{:#x})", self.addr, self.size)
    }
}

/// Run `handler` on `monitor` and answer the invocation with its result
///
/// A handler returning [`Error::Inhibit`] must have taken a deferral; it
/// then calls `reply_response` and completes the deferral itself.
pub(crate) fn submit<S, F>(monitor: &Arc<Monitor<S>>, inv: Invocation, handler: F)
where
    S: Send + 'static,
    F: FnOnce(&mut S, &MonitorCtx<'_, S>, &Invocation) -> Error + Send + 'static,
{
    monitor.request(Tasklet::new(move |state: &mut S, ctx: &MonitorCtx<'_, S>| {
        let result = handler(state, ctx, &inv);
        if result == Error::Inhibit {
            return Step::Inhibit;
        }
        if !result.is_success() {
            kwarn!(target: "dispatch", "{:#06x} on {:?} failed: {}", inv.tag().label(), inv.target(), result);
        }
        inv.reply_response(result);
        Step::Done
    }));
}

/// Answer `KERNEL_OBJECT/GET_DEBUG_INFO`
pub(crate) fn write_debug_info(inv: &Invocation, text: &str) -> Error {
    inv.write(&DebugInfoRes::new(text));
    Error::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use kinv_core::protocol::example::PrintMessage;
    use kinv_runtime::Deferral;
    use std::sync::Mutex;

    #[test]
    fn test_storage_release_returns_memory() {
        let fx = Fixture::new();
        let before = fx.mem.outstanding();
        let s = Storage::alloc(&fx.mem, 64).unwrap();
        assert_eq!(s.addr() % CACHE_LINE_SIZE, 0);
        assert_eq!(fx.mem.outstanding(), before + 1);

        let done = Arc::new(AtomicBool::new(false));
        let d = Arc::clone(&done);
        s.release(Box::new(move || d.store(true, Ordering::SeqCst)));
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(fx.mem.outstanding(), before);

        // A second release only runs the job
        let again = Arc::new(AtomicBool::new(false));
        let a = Arc::clone(&again);
        s.release(Box::new(move || a.store(true, Ordering::SeqCst)));
        assert!(again.load(Ordering::SeqCst));
        assert_eq!(fx.mem.outstanding(), before);
    }

    #[test]
    fn test_submit_replies_with_handler_result() {
        let fx = Fixture::new();
        let (inv, future) = fx.invocation(&PrintMessage::new("x"));
        let monitor = Arc::new(Monitor::new(0u32));

        submit(&monitor, inv, |n: &mut u32, _ctx, _inv| {
            *n += 1;
            Error::InvalidArgument
        });
        assert!(future.poll());
        assert_eq!(future.state(), Error::InvalidArgument);
        assert!(monitor.is_idle());
    }

    #[test]
    fn test_inhibit_defers_reply_and_completion() {
        let fx = Fixture::new();
        let (inv, future) = fx.invocation(&PrintMessage::new("later"));
        let monitor = Arc::new(Monitor::new(0u32));
        let parked: Arc<Mutex<Option<(Deferral<u32>, Invocation)>>> = Arc::new(Mutex::new(None));

        let p = Arc::clone(&parked);
        submit(&monitor, inv, move |_n: &mut u32, ctx, inv| {
            *p.lock().unwrap() = Some((ctx.defer(), inv.clone()));
            Error::Inhibit
        });
        assert!(!future.poll());
        assert!(!monitor.is_idle());

        let (deferral, inv) = parked.lock().unwrap().take().unwrap();
        inv.reply_response(Error::Success);
        deferral.complete();
        assert_eq!(future.state(), Error::Success);
        assert!(monitor.is_idle());
    }

    #[test]
    fn test_factories_cannot_be_deleted() {
        let obj = KernelObject::Factory(FactoryKind::Example);
        assert_eq!(obj.kind(), ObjectKind::Factory);
        assert_eq!(obj.delete(Box::new(|| {})), Err(Error::RequestDenied));
        assert_eq!(obj.as_portal().err(), Some(Error::TypeMismatch));
    }
}
