//! Per-object monitor: lock-free admission and serialized execution
//!
//! Every kernel object owns one `Monitor`. Requests arrive from any thread
//! as [`Tasklet`]s. The thread whose push finds the monitor idle becomes
//! its owner and drains the queue; every other submitter returns at once.
//! At most one tasklet runs per monitor at any instant, and that tasklet is
//! the only code that can reach the object's state.
//!
//! # Queue
//!
//! Submitters CAS their node onto `tail`, an intrusive stack:
//!
//! ```text
//! tail == FREE    idle, the next push wins ownership
//! tail == LOCKED  owned, nothing pending
//! tail == node    owned (or being won), node -> older -> ... -> null
//! ```
//!
//! The owner detaches the whole stack with one swap to `LOCKED`, reverses
//! it onto its private `head` list and runs it oldest first. Tasklets thus
//! run in the order their pushes succeeded (FIFO). Releasing is a CAS from
//! `LOCKED` to `FREE`; it fails if anything was pushed meanwhile, and the
//! owner goes on draining.
//!
//! # Deferral handshake
//!
//! A tasklet that returns [`Step::Inhibit`] hands the drain to its
//! [`Deferral`]. The completion may land on another thread before the
//! tasklet has returned, so each run carries a generation and a phase in
//! one word. Whichever side arrives second continues the drain:
//!
//! ```text
//! ACTIVE --complete--> EARLY    owner continues after the tasklet returns
//! ACTIVE --Inhibit---> PARKED   the completing thread continues
//! ```

use crate::sync::{AtomicPtr, AtomicUsize, Lock, Ordering};
use kinv_core::{kerror, ktrace, kwarn};
use kinv_core::{Job, Place};
use std::cell::UnsafeCell;
use std::ptr;
use std::sync::Arc;

/// Outcome of running one tasklet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Work finished; the monitor moves on to the next tasklet
    Done,
    /// The handler kept a [`Deferral`] and will complete later
    Inhibit,
}

type TaskFn<S> = Box<dyn FnOnce(&mut S, &MonitorCtx<'_, S>) -> Step + Send>;

struct Node<S> {
    next: *mut Node<S>,
    run: TaskFn<S>,
}

/// A pending request against one object
///
/// Boxed once on creation; the box itself is the queue node, so admission
/// does not allocate.
pub struct Tasklet<S> {
    node: Box<Node<S>>,
}

// Safety: `next` is only followed by the monitor's current owner
unsafe impl<S> Send for Tasklet<S> {}

impl<S> Tasklet<S> {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(&mut S, &MonitorCtx<'_, S>) -> Step + Send + 'static,
    {
        Tasklet { node: Box::new(Node { next: ptr::null_mut(), run: Box::new(f) }) }
    }

    fn into_raw(self) -> *mut Node<S> {
        Box::into_raw(self.node)
    }

    /// # Safety
    ///
    /// `p` came from `into_raw` and is no longer linked anywhere.
    unsafe fn from_raw(p: *mut Node<S>) -> Self {
        Tasklet { node: Box::from_raw(p) }
    }
}

/// What a running tasklet may do to its monitor besides touching state
pub struct MonitorCtx<'a, S> {
    monitor: &'a Arc<Monitor<S>>,
    run: usize,
}

impl<'a, S: Send + 'static> MonitorCtx<'a, S> {
    /// Take responsibility for completing this request later
    ///
    /// The tasklet must then return [`Step::Inhibit`].
    pub fn defer(&self) -> Deferral<S> {
        Deferral { monitor: Some(Arc::clone(self.monitor)), run: self.run }
    }

    /// Bind the object to `place`; later admissions drain there
    pub fn set_home(&self, place: Option<Arc<dyn Place>>) {
        *self.monitor.home.lock() = place;
    }

    pub fn home_id(&self) -> Option<usize> {
        self.monitor.home_id()
    }

    pub fn monitor(&self) -> &Arc<Monitor<S>> {
        self.monitor
    }
}

/// Handle for finishing an inhibited request
///
/// Completing hands the object to the next queued tasklet, which may run
/// on the completing thread. Completing before the tasklet has returned
/// leaves the drain with the owner. Dropping an unfinished deferral
/// completes it, so a lost handle cannot wedge the object.
#[must_use = "a deferral must be completed"]
pub struct Deferral<S: Send + 'static> {
    monitor: Option<Arc<Monitor<S>>>,
    run: usize,
}

impl<S: Send + 'static> Deferral<S> {
    pub fn complete(mut self) {
        if let Some(m) = self.monitor.take() {
            m.finish_deferred(self.run);
        }
    }
}

impl<S: Send + 'static> Drop for Deferral<S> {
    fn drop(&mut self) {
        if let Some(m) = self.monitor.take() {
            kwarn!(target: "monitor", "deferral dropped without completion");
            m.finish_deferred(self.run);
        }
    }
}

// Low two bits of `Monitor::phase`; the rest is the run generation
const IDLE: usize = 0;
const ACTIVE: usize = 1;
const EARLY: usize = 2;
const PARKED: usize = 3;

#[inline]
fn phase_word(run: usize, phase: usize) -> usize {
    (run << 2) | phase
}

/// Serializes all access to an object's state `S`
pub struct Monitor<S> {
    tail: AtomicPtr<Node<S>>,
    /// Owner-private list, oldest first
    head: AtomicPtr<Node<S>>,
    refs: AtomicUsize,
    /// Generation and phase of the current tasklet run
    phase: AtomicUsize,
    home: Lock<Option<Arc<dyn Place>>>,
    on_release: Lock<Option<Job>>,
    state: UnsafeCell<S>,
}

// Safety: the state is only reached by the single queue owner
unsafe impl<S: Send> Send for Monitor<S> {}
unsafe impl<S: Send> Sync for Monitor<S> {}

impl<S> Monitor<S> {
    #[inline]
    fn free() -> *mut Node<S> {
        ptr::null_mut()
    }

    /// Never a node address: nodes are at least pointer aligned
    #[inline]
    fn locked() -> *mut Node<S> {
        1usize as *mut Node<S>
    }
}

impl<S: Send + 'static> Monitor<S> {
    pub fn new(state: S) -> Self {
        Monitor {
            tail: AtomicPtr::new(Self::free()),
            head: AtomicPtr::new(ptr::null_mut()),
            refs: AtomicUsize::new(0),
            phase: AtomicUsize::new(IDLE),
            home: Lock::new(None),
            on_release: Lock::new(None),
            state: UnsafeCell::new(state),
        }
    }

    pub fn with_home(state: S, home: Arc<dyn Place>) -> Self {
        let m = Self::new(state);
        *m.home.lock() = Some(home);
        m
    }

    /// Submit a request
    ///
    /// Returns without running anything if another thread owns the
    /// monitor. Otherwise this call becomes the owner and drains the queue,
    /// inline or on the object's home place.
    pub fn request(self: &Arc<Self>, task: Tasklet<S>) {
        if !self.push(task.into_raw()) {
            return;
        }
        self.refs.fetch_add(1, Ordering::AcqRel);
        match self.pop() {
            Some(first) => self.run_chain(first),
            None => kerror!(target: "monitor", "won admission on an empty queue"),
        }
    }

    /// Finish the current request and run whatever is queued behind it
    ///
    /// Only for completing a request whose tasklet returned
    /// [`Step::Inhibit`] and was parked; [`Deferral::complete`] calls this.
    pub fn request_done(self: &Arc<Self>) {
        if let Some(next) = self.next_or_release() {
            self.run_chain(next);
        }
    }

    fn finish_deferred(self: &Arc<Self>, run: usize) {
        // Still inside the tasklet: the owner sees EARLY and keeps draining
        if self
            .phase
            .compare_exchange(phase_word(run, ACTIVE), phase_word(run, EARLY), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return;
        }
        if self
            .phase
            .compare_exchange(phase_word(run, PARKED), phase_word(run, IDLE), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.request_done();
            return;
        }
        kerror!(target: "monitor", "stale deferral ignored (tasklet did not return Inhibit)");
    }

    pub fn acquire_ref(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop a reference; the last one runs the pending release job
    pub fn release_ref(&self) {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "monitor reference count underflow");
        if prev == 1 {
            let job = self.on_release.lock().take();
            if let Some(job) = job {
                job();
            }
        }
    }

    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Run `job` exactly once, as soon as no request is in flight and no
    /// reference is held
    pub fn when_released(&self, job: Job) {
        self.acquire_ref();
        *self.on_release.lock() = Some(job);
        self.release_ref();
    }

    /// True when no request is running or queued
    pub fn is_idle(&self) -> bool {
        self.tail.load(Ordering::Acquire) == Self::free()
    }

    pub fn home_id(&self) -> Option<usize> {
        self.home.lock().as_ref().map(|p| p.id())
    }

    pub fn set_home(&self, place: Option<Arc<dyn Place>>) {
        *self.home.lock() = place;
    }

    /// Returns true if the monitor was idle and the caller now owns it
    fn push(&self, node: *mut Node<S>) -> bool {
        let mut cur = self.tail.load(Ordering::Relaxed);
        loop {
            let next = if cur == Self::locked() { ptr::null_mut() } else { cur };
            // Safety: the node is ours until the CAS publishes it
            unsafe { (*node).next = next };
            match self.tail.compare_exchange_weak(cur, node, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return cur == Self::free(),
                Err(actual) => cur = actual,
            }
        }
    }

    /// Owner only
    fn pop(&self) -> Option<Tasklet<S>> {
        let head = self.head.load(Ordering::Relaxed);
        if !head.is_null() {
            // Safety: private list, only the owner walks it
            unsafe {
                self.head.store((*head).next, Ordering::Relaxed);
                return Some(Tasklet::from_raw(head));
            }
        }

        let chain = self.tail.swap(Self::locked(), Ordering::AcqRel);
        if chain == Self::locked() || chain == Self::free() {
            return None;
        }

        // Newest first on the stack; flip to oldest first
        let mut prev: *mut Node<S> = ptr::null_mut();
        let mut cur = chain;
        while !cur.is_null() {
            // Safety: the swap detached this chain, nobody else can reach it
            unsafe {
                let next = (*cur).next;
                (*cur).next = prev;
                prev = cur;
                cur = next;
            }
        }
        // Safety: prev is the oldest detached node
        unsafe {
            self.head.store((*prev).next, Ordering::Relaxed);
            Some(Tasklet::from_raw(prev))
        }
    }

    /// Owner only. Fails if a request was pushed since the last pop.
    fn try_release(&self) -> bool {
        if !self.head.load(Ordering::Relaxed).is_null() {
            return false;
        }
        self.tail
            .compare_exchange(Self::locked(), Self::free(), Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    fn next_or_release(&self) -> Option<Tasklet<S>> {
        loop {
            if let Some(t) = self.pop() {
                return Some(t);
            }
            if self.try_release() {
                self.release_ref();
                return None;
            }
            // A request slipped in between pop and release; it is ours
        }
    }

    /// The home place, if the calling thread is not already on it
    fn foreign_home(&self) -> Option<Arc<dyn Place>> {
        self.home.lock().as_ref().filter(|p| !p.is_current()).cloned()
    }

    /// Drain iteratively so a long queue never deepens the stack
    ///
    /// The home is checked before every tasklet, so a tasklet that moves
    /// the object sends the rest of the drain to the new place.
    fn run_chain(self: &Arc<Self>, mut task: Tasklet<S>) {
        loop {
            if let Some(place) = self.foreign_home() {
                ktrace!(target: "monitor", "hand off to place {}", place.id());
                let this = Arc::clone(self);
                place.push(Box::new(move || this.run_chain(task)));
                return;
            }
            if !self.run(task) {
                return;
            }
            match self.next_or_release() {
                Some(next) => task = next,
                None => return,
            }
        }
    }

    /// Run one tasklet; false if its deferral now owns the drain
    fn run(self: &Arc<Self>, task: Tasklet<S>) -> bool {
        let Node { run: f, .. } = *task.node;
        let run = (self.phase.load(Ordering::Acquire) >> 2).wrapping_add(1);
        self.phase.store(phase_word(run, ACTIVE), Ordering::Release);

        let ctx = MonitorCtx { monitor: self, run };
        // Safety: only the queue owner gets here, so this is the sole
        // reference to the state until `f` returns
        let state = unsafe { &mut *self.state.get() };
        let step = f(state, &ctx);

        if step == Step::Inhibit
            && self
                .phase
                .compare_exchange(phase_word(run, ACTIVE), phase_word(run, PARKED), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            return false;
        }
        // Done, or the deferral completed before we got here
        self.phase.store(phase_word(run, IDLE), Ordering::Release);
        true
    }
}

impl<S> Drop for Monitor<S> {
    fn drop(&mut self) {
        // Nothing can be pushed any more; free whatever is still linked
        let mut lists = [self.head.load(Ordering::Relaxed), self.tail.load(Ordering::Relaxed)];
        for p in lists.iter_mut() {
            while !p.is_null() && *p != Self::locked() {
                // Safety: exclusive access in drop
                let node = unsafe { Box::from_raw(*p) };
                *p = node.next;
            }
        }
    }
}
