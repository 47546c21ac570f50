//! Kernel side of a portal
//!
//! A portal carries at most one invocation at a time:
//!
//! ```text
//! OPEN --send_invocation--> INVOKING --reply_response--> REPLYING --> OPEN
//! ```
//!
//! The reply moves through REPLYING before the caller is notified, so a
//! caller woken by the reply always finds the portal open again.

use crate::captable::CapTable;
use crate::invocation::Invocation;
use crate::object::{submit, write_debug_info, KernelObject, Storage};
use kinv_core::protocol::kernel_object::GetDebugInfo;
use kinv_core::{kdebug, ktrace, kwarn};
use kinv_core::{CapPtr, CapPtrDepth, CapSpace, Error, Job, KResult, Message, SharedBuf, SpinLock, SysretHandler};
use kinv_runtime::Monitor;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

const OPEN: u8 = 0;
const INVOKING: u8 = 1;
const REPLYING: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalState {
    Open,
    Invoking,
    Replying,
}

pub struct PortalObject {
    state: AtomicU8,
    buf: SpinLock<Option<SharedBuf>>,
    /// Capability space the portal's invocations are resolved in
    owner: SpinLock<Option<Arc<CapTable<KernelObject>>>>,
    /// Completion context of the invocation in flight
    ctx: SpinLock<Option<Arc<dyn SysretHandler>>>,
    monitor: Arc<Monitor<()>>,
    storage: Storage,
    sent: AtomicU64,
    signals: AtomicU64,
}

impl PortalObject {
    pub fn new(storage: Storage) -> Self {
        PortalObject {
            state: AtomicU8::new(OPEN),
            buf: SpinLock::new(None),
            owner: SpinLock::new(None),
            ctx: SpinLock::new(None),
            monitor: Arc::new(Monitor::new(())),
            storage,
            sent: AtomicU64::new(0),
            signals: AtomicU64::new(0),
        }
    }

    pub fn bind_buffer(&self, buf: Option<SharedBuf>) {
        kdebug!(target: "portal", "{} invocation buffer", if buf.is_some() { "bind" } else { "unbind" });
        *self.buf.lock() = buf;
    }

    pub fn set_owner(&self, owner: Option<Arc<CapTable<KernelObject>>>) {
        *self.owner.lock() = owner;
    }

    pub fn buffer(&self) -> Option<SharedBuf> {
        self.buf.lock().clone()
    }

    pub fn state(&self) -> PortalState {
        match self.state.load(Ordering::Acquire) {
            OPEN => PortalState::Open,
            INVOKING => PortalState::Invoking,
            _ => PortalState::Replying,
        }
    }

    /// Invocations accepted so far
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn signals(&self) -> u64 {
        self.signals.load(Ordering::Relaxed)
    }

    /// Send the buffer's message to `target` in the owner's space
    ///
    /// On `Ok`, `ctx` receives exactly one `sysret`. On `Err` the portal
    /// is unchanged and `ctx` is dropped unused.
    pub fn send_invocation(self: &Arc<Self>, target: CapPtr, ctx: Arc<dyn SysretHandler>) -> KResult<()> {
        let owner = self.owner.lock().clone().ok_or(Error::PortalNoEndpoint)?;
        let buf = self.buf.lock().clone().ok_or(Error::PortalNoBuffer)?;
        let dest = owner.lookup(target, CapPtrDepth::DIRECT)?;

        self.begin(ctx)?;
        ktrace!(target: "portal", "open -> invoking, {:?} label {:#06x}", target, buf.tag().label());
        let inv = Invocation::new(Arc::clone(self), buf, owner, target);
        dest.invoke(inv);
        Ok(())
    }

    /// OPEN -> INVOKING, remembering who to notify
    pub(crate) fn begin(&self, ctx: Arc<dyn SysretHandler>) -> KResult<()> {
        if self.state.compare_exchange(OPEN, INVOKING, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(Error::PortalNotOpen);
        }
        *self.ctx.lock() = Some(ctx);
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Finish the invocation in flight and notify its caller
    pub fn reply_response(&self, result: Error) {
        if self.state.compare_exchange(INVOKING, REPLYING, Ordering::AcqRel, Ordering::Acquire).is_err() {
            kwarn!(target: "portal", "reply ({}) on a portal that is not invoked", result);
            return;
        }
        ktrace!(target: "portal", "invoking -> replying ({})", result);
        let ctx = self.ctx.lock().take();
        self.state.store(OPEN, Ordering::Release);
        ktrace!(target: "portal", "replying -> open");
        if let Some(ctx) = ctx {
            ctx.sysret(result);
        }
    }

    /// Out-of-band wakeup of whoever waits on the invocation in flight
    pub fn signal(&self) {
        self.signals.fetch_add(1, Ordering::Relaxed);
        let ctx = self.ctx.lock().clone();
        if let Some(ctx) = ctx {
            ctx.wakeup();
        }
    }

    pub fn invoke(self: &Arc<Self>, inv: Invocation) {
        let this = Arc::clone(self);
        submit(&self.monitor, inv, move |_: &mut (), _, inv| {
            if inv.tag().label() == GetDebugInfo::LABEL {
                let text = format!("portal {:?}, {} sent, {} signals", this.state(), this.sent(), this.signals());
                write_debug_info(inv, &text)
            } else {
                Error::NotImplemented
            }
        });
    }

    pub fn delete(self: &Arc<Self>, done: Job) {
        self.bind_buffer(None);
        self.set_owner(None);
        let this = Arc::clone(self);
        self.monitor.when_released(Box::new(move || this.storage.release(done)));
    }
}

impl std::fmt::Debug for PortalObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalObject")
            .field("state", &self.state())
            .field("storage", &self.storage)
            .field("sent", &self.sent())
            .finish()
    }
}
