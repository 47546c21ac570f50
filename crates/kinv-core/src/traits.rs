//! Seams to the collaborators this core does not own
//!
//! The capability tree, the scheduler's notion of places and the
//! syscall transport live outside the invocation core. Each is consumed
//! through one narrow trait here so tests and demos can plug in minimal
//! implementations.

use crate::cap::{CapPtr, CapPtrDepth};
use crate::error::{Error, KResult};
use std::sync::Arc;

/// A deferred unit of work handed to a place
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Capability space: maps slots to objects
///
/// # Implementors
///
/// - `CapTable` (kinv-objects): flat fixed-size table, one slot per index.
///   Serves both as a process's root space and as a CapMap object.
///
/// **Contract:**
/// - `lookup()` of an empty, claimed or out-of-range slot returns an error,
///   never panics.
/// - `claim()` is a single-winner CAS on an empty slot. Exactly one of any
///   number of concurrent claimers sees `Ok(true)`.
/// - `install()` publishes the object and the capability in one step, and
///   only on a slot the caller claimed.
/// - `release()` returns a claimed-but-never-installed slot to empty.
pub trait CapSpace: Send + Sync {
    type Object: Clone + Send + Sync;

    fn lookup(&self, ptr: CapPtr, depth: CapPtrDepth) -> KResult<Self::Object>;

    /// Claim an empty slot for writing
    ///
    /// `Ok(false)` means another writer got there first or the slot is
    /// occupied. `Err` means the slot does not exist.
    fn claim(&self, ptr: CapPtr, depth: CapPtrDepth) -> KResult<bool>;

    fn install(&self, ptr: CapPtr, depth: CapPtrDepth, object: Self::Object) -> KResult<()>;

    fn release(&self, ptr: CapPtr, depth: CapPtrDepth);
}

/// An execution context that can run jobs, typically one hardware thread
///
/// # Implementors
///
/// - `WorkerPlace` (kinv-runtime): a dedicated OS thread draining a
///   lock-free run queue, parking on a futex when idle.
///
/// **Contract:**
/// - `push()` never blocks and never runs the job inline.
/// - Jobs pushed to one place run one at a time, in push order.
/// - `is_current()` is true only on the thread(s) that run this place's jobs.
pub trait Place: Send + Sync {
    fn id(&self) -> usize;

    fn is_current(&self) -> bool;

    fn push(&self, job: Job);
}

/// Receives the result of an invocation
///
/// This is the user context passed through [`Transport::invoke`]. The
/// client portal's future implements it.
pub trait SysretHandler: Send + Sync {
    /// Called exactly once per accepted invocation
    fn sysret(&self, result: Error);

    /// Out-of-band wakeup without a result; waiters re-check and sleep on
    fn wakeup(&self) {}
}

/// The syscall layer between a client portal and the kernel
///
/// # Implementors
///
/// - `Kernel` (kinv-objects): in-process kernel; resolves the target and
///   submits the request to the object's monitor on the calling thread.
///
/// **Contract:**
/// - `invoke()` returns once the request is admitted or queued, it does
///   not wait for the handler.
/// - If `invoke()` returns `Err`, `ctx` is never called. Otherwise `ctx`
///   receives exactly one `sysret`, possibly before `invoke()` returns.
/// - `signal()` is an out-of-band wakeup with no payload.
pub trait Transport: Send + Sync {
    fn invoke(&self, portal: CapPtr, target: CapPtr, ctx: Arc<dyn SysretHandler>) -> KResult<()>;

    fn signal(&self, target: CapPtr) -> KResult<()>;
}
