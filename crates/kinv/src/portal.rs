//! Client portals
//!
//! A [`Portal`] is one exclusive request/response channel to the kernel:
//! a capability naming the kernel-side portal object, the invocation
//! buffer bound to it and a [`Future`] the kernel completes.
//!
//! ```text
//! Portal ──lock()──▶ PortalLock ──invoke()──▶ PortalFuture<T>
//!    ▲                   ▲                         │
//!    │                   └─────────reuse()─────────┤
//!    └──────────────drop / close()─────────────────┘
//! ```
//!
//! The response is decoded from the same buffer the request was written
//! to, so it stays valid only until the lock issues the next invoke.
//!
//! A `PortalFuture` dropped before its reply leaves the portal locked until
//! the reply lands. The buffer and the future belong to that call until
//! then.

use kinv_core::protocol::example::Ping;
use kinv_core::protocol::kernel_memory::PropertiesRes;
use kinv_core::protocol::kernel_object::DebugInfoRes;
use kinv_core::{kdebug, CapPtr, Error, KResult, Message, SharedBuf, Transport};
use kinv_objects::Kernel;
use kinv_runtime::{Continuation, Future};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A decoded reply
///
/// **Contract:** `decode` only reads the buffer; it runs after the future
/// resolved to `Success`.
pub trait Response: Sized {
    fn decode(buf: &SharedBuf) -> KResult<Self>;
}

impl Response for () {
    fn decode(_: &SharedBuf) -> KResult<()> {
        Ok(())
    }
}

macro_rules! message_response {
    ($($ty:ty),* $(,)?) => {
        $(impl Response for $ty {
            fn decode(buf: &SharedBuf) -> KResult<Self> {
                buf.read::<$ty>()
            }
        })*
    };
}

message_response!(Ping, PropertiesRes, DebugInfoRes);

pub struct Portal {
    cap: CapPtr,
    buf: SharedBuf,
    transport: Arc<dyn Transport>,
    future: Arc<Future>,
    locked: Arc<AtomicBool>,
}

impl Portal {
    /// Wrap a kernel portal at `cap` whose buffer is `buf`
    pub fn new(cap: CapPtr, buf: SharedBuf, transport: Arc<dyn Transport>) -> Self {
        Portal { cap, buf, transport, future: Arc::new(Future::new()), locked: Arc::new(AtomicBool::new(false)) }
    }

    /// Create a kernel portal at `cap` in the root space and connect to it
    pub fn boot(kernel: &Arc<Kernel>, cap: CapPtr) -> KResult<Self> {
        let buf = kernel.boot_portal(cap)?;
        Ok(Portal::new(cap, buf, Arc::clone(kernel) as Arc<dyn Transport>))
    }

    pub fn cap(&self) -> CapPtr {
        self.cap
    }

    pub fn buffer(&self) -> &SharedBuf {
        &self.buf
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Spin until the portal is ours
    pub fn lock(&self) -> PortalLock<'_> {
        let mut spins = 0u32;
        loop {
            if let Some(l) = self.try_lock() {
                return l;
            }
            if spins < 64 {
                std::hint::spin_loop();
                spins += 1;
            } else {
                std::thread::yield_now();
            }
        }
    }

    pub fn try_lock(&self) -> Option<PortalLock<'_>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| PortalLock { portal: Some(self) })
    }

    /// Wake a thread blocked on the portal at `target`
    pub fn signal(&self, target: CapPtr) -> KResult<()> {
        self.transport.signal(target)
    }

    fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Hand the lock to the pending reply instead of releasing it now
    fn unlock_on_reply(&self) {
        kdebug!(target: "portal", "call on {:?} abandoned, locked until it replies", self.cap);
        let locked = Arc::clone(&self.locked);
        self.future.then_also(Box::new(move |_| locked.store(false, Ordering::Release)));
    }
}

impl std::fmt::Debug for Portal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Portal").field("cap", &self.cap).field("locked", &self.is_locked()).finish()
    }
}

/// Exclusive use of a [`Portal`]; released on drop or [`close`](Self::close)
pub struct PortalLock<'a> {
    portal: Option<&'a Portal>,
}

impl<'a> PortalLock<'a> {
    pub fn is_held(&self) -> bool {
        self.portal.is_some()
    }

    /// Release early; later invokes through this handle fail with `PortalNotOpen`
    pub fn close(&mut self) {
        if let Some(p) = self.portal.take() {
            p.unlock();
        }
    }

    /// Write `msg` into the buffer and send it to `target`
    ///
    /// A transport that rejects the call outright resolves the future with
    /// its error, so callers only ever look at the future.
    pub fn invoke<M: Message, T: Response>(self, target: CapPtr, msg: &M) -> PortalFuture<'a, T> {
        if let Some(p) = self.portal {
            p.buf.write(msg);
            p.future.reset();
            if let Err(e) = p.transport.invoke(p.cap, target, p.future.clone()) {
                p.future.assign(e);
            }
        }
        PortalFuture { lock: self, _marker: PhantomData }
    }
}

impl Drop for PortalLock<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for PortalLock<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalLock").field("cap", &self.portal.map(|p| p.cap)).finish()
    }
}

/// An invocation in flight, typed by its reply
#[must_use = "the reply is lost unless waited for or polled"]
pub struct PortalFuture<'a, T> {
    lock: PortalLock<'a>,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T: Response> PortalFuture<'a, T> {
    /// True once the kernel replied
    pub fn poll(&self) -> bool {
        self.lock.portal.map_or(false, |p| p.future.poll())
    }

    /// Result code of a resolved invocation
    pub fn state(&self) -> Error {
        match self.lock.portal {
            Some(p) => p.future.state(),
            None => Error::PortalNotOpen,
        }
    }

    /// Block until the reply arrives and decode it
    pub fn wait(&self) -> KResult<T> {
        let p = self.lock.portal.ok_or(Error::PortalNotOpen)?;
        match p.future.wait() {
            Error::Success => T::decode(&p.buf),
            e => Err(e),
        }
    }

    /// Like [`wait`](Self::wait); `None` if nothing arrived in time
    pub fn wait_timeout(&self, timeout: Duration) -> Option<KResult<T>> {
        let p = match self.lock.portal {
            Some(p) => p,
            None => return Some(Err(Error::PortalNotOpen)),
        };
        p.future.wait_timeout(timeout).map(|res| match res {
            Error::Success => T::decode(&p.buf),
            e => Err(e),
        })
    }

    /// Run `c` with the result code once resolved
    ///
    /// Runs on the calling thread if the reply is already in.
    pub fn then(&self, c: Continuation) {
        match self.lock.portal {
            Some(p) => p.future.then(c),
            None => c(Error::PortalNotOpen),
        }
    }

    /// Take the lock back for the next call without releasing it
    ///
    /// Blocks until the pending reply, if any, has landed.
    pub fn reuse(mut self) -> PortalLock<'a> {
        let portal = self.lock.portal.take();
        if let Some(p) = portal {
            p.future.wait();
        }
        PortalLock { portal }
    }
}

impl<T> Drop for PortalFuture<'_, T> {
    fn drop(&mut self) {
        if let Some(p) = self.lock.portal {
            if !p.future.poll() {
                self.lock.portal = None;
                p.unlock_on_reply();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinv_core::SysretHandler;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::thread;

    /// Answers synchronously; target 0 is rejected, target 7 is held back
    #[derive(Default)]
    struct Loopback {
        held: Mutex<Option<Arc<dyn SysretHandler>>>,
        signals: AtomicUsize,
    }

    impl Transport for Loopback {
        fn invoke(&self, _portal: CapPtr, target: CapPtr, ctx: Arc<dyn SysretHandler>) -> KResult<()> {
            match target.0 {
                0 => Err(Error::InvalidCapability),
                7 => {
                    *self.held.lock().unwrap() = Some(ctx);
                    Ok(())
                }
                _ => {
                    ctx.sysret(Error::Success);
                    Ok(())
                }
            }
        }

        fn signal(&self, _target: CapPtr) -> KResult<()> {
            self.signals.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn portal() -> (Portal, Arc<Loopback>) {
        let t = Arc::new(Loopback::default());
        (Portal::new(CapPtr(8), SharedBuf::new(), t.clone()), t)
    }

    #[test]
    fn test_try_lock_rejects_second_holder() {
        let (p, _) = portal();
        let l = p.try_lock().unwrap();
        assert!(p.try_lock().is_none());
        drop(l);
        let mut l = p.try_lock().unwrap();
        l.close();
        assert!(!l.is_held());
        assert!(p.try_lock().is_some());
    }

    #[test]
    fn test_lock_waits_for_release() {
        let (p, _) = portal();
        let held = p.lock();
        thread::scope(|s| {
            let h = s.spawn(|| {
                let l = p.lock();
                l.is_held()
            });
            thread::sleep(Duration::from_millis(10));
            drop(held);
            assert!(h.join().unwrap());
        });
        assert!(!p.is_locked());
    }

    #[test]
    fn test_reply_decoded_from_buffer() {
        let (p, _) = portal();
        let f = p.lock().invoke::<_, Ping>(CapPtr(3), &Ping::new(5));
        assert!(f.poll());
        assert_eq!(f.state(), Error::Success);
        assert_eq!(f.wait().unwrap().wait_cycles, 5);
    }

    #[test]
    fn test_rejected_invoke_resolves_future() {
        let (p, _) = portal();
        let f = p.lock().invoke::<_, ()>(CapPtr(0), &Ping::new(0));
        assert_eq!(f.wait(), Err(Error::InvalidCapability));

        // The lock survives the failure
        let f = f.reuse().invoke::<_, ()>(CapPtr(3), &Ping::new(0));
        assert_eq!(f.wait(), Ok(()));
    }

    #[test]
    fn test_closed_lock_is_not_open() {
        let (p, _) = portal();
        let mut l = p.lock();
        l.close();
        let f = l.invoke::<_, Ping>(CapPtr(3), &Ping::new(0));
        assert!(!f.poll());
        assert_eq!(f.wait().unwrap_err(), Error::PortalNotOpen);
        assert_eq!(f.state(), Error::PortalNotOpen);
        assert!(!p.is_locked());
    }

    #[test]
    fn test_then_after_completion_fires_once() {
        let (p, _) = portal();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = p.lock().invoke::<_, ()>(CapPtr(3), &Ping::new(0));
        let c = Arc::clone(&fired);
        f.then(Box::new(move |e| {
            assert_eq!(e, Error::Success);
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(f.wait(), Ok(()));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_then_before_completion() {
        let (p, t) = portal();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = p.lock().invoke::<_, ()>(CapPtr(7), &Ping::new(0));
        assert!(!f.poll());
        assert_eq!(f.wait_timeout(Duration::from_millis(1)), None);

        let c = Arc::clone(&fired);
        f.then(Box::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        let ctx = t.held.lock().unwrap().take().unwrap();
        thread::spawn(move || ctx.sysret(Error::Retry)).join().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(f.wait(), Err(Error::Retry));
    }

    #[test]
    fn test_dropped_call_keeps_portal_until_reply() {
        let (p, t) = portal();
        let f = p.lock().invoke::<_, ()>(CapPtr(7), &Ping::new(1));
        drop(f);
        assert!(p.is_locked());
        assert!(p.try_lock().is_none());

        let ctx = t.held.lock().unwrap().take().unwrap();
        thread::spawn(move || ctx.sysret(Error::Success)).join().unwrap();
        assert!(!p.is_locked());

        let f = p.lock().invoke::<_, Ping>(CapPtr(3), &Ping::new(9));
        assert_eq!(f.wait().unwrap().wait_cycles, 9);
    }

    #[test]
    fn test_dropped_call_keeps_then_continuation() {
        let (p, t) = portal();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = p.lock().invoke::<_, ()>(CapPtr(7), &Ping::new(0));
        let c = Arc::clone(&fired);
        f.then(Box::new(move |e| {
            assert_eq!(e, Error::Retry);
            c.fetch_add(1, Ordering::SeqCst);
        }));
        drop(f);

        let ctx = t.held.lock().unwrap().take().unwrap();
        ctx.sysret(Error::Retry);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!p.is_locked());
    }

    #[test]
    fn test_reuse_waits_for_pending_reply() {
        let (p, t) = portal();
        let f = p.lock().invoke::<_, ()>(CapPtr(7), &Ping::new(0));
        let ctx = t.held.lock().unwrap().take().unwrap();
        let replier = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            ctx.sysret(Error::Retry);
        });

        let l = f.reuse();
        assert!(l.is_held());
        replier.join().unwrap();
        let f = l.invoke::<_, ()>(CapPtr(3), &Ping::new(0));
        assert_eq!(f.wait(), Ok(()));
        drop(f);
        assert!(!p.is_locked());
    }

    #[test]
    fn test_signal_goes_to_transport() {
        let (p, t) = portal();
        p.signal(CapPtr(9)).unwrap();
        assert_eq!(t.signals.load(Ordering::SeqCst), 1);
    }
}
