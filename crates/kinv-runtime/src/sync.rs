//! Primitives used by the lock-free monitor queue
//!
//! With the `loom` feature these come from loom so the admission and
//! release paths can be model checked. Loom cannot preempt a thread that
//! spins on std atomics, so the monitor's side locks become loom mutexes
//! in that build.

cfg_if::cfg_if! {
    if #[cfg(feature = "loom")] {
        pub(crate) use loom::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

        pub(crate) struct Lock<T>(loom::sync::Mutex<T>);

        impl<T> Lock<T> {
            pub(crate) fn new(value: T) -> Self {
                Lock(loom::sync::Mutex::new(value))
            }

            pub(crate) fn lock(&self) -> loom::sync::MutexGuard<'_, T> {
                match self.0.lock() {
                    Ok(g) => g,
                    Err(poisoned) => poisoned.into_inner(),
                }
            }
        }
    } else {
        pub(crate) use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
        pub(crate) use kinv_core::SpinLock as Lock;
    }
}
