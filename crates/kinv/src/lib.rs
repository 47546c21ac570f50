//! # kinv - capability invocation core
//!
//! Client side of the kinv invocation path, plus re-exports of the
//! kernel so a single dependency is enough to boot and talk to it.
//!
//! ## Quick Start
//!
//! ```ignore
//! use kinv::stubs::{ExampleCap, KernelMemoryCap};
//! use kinv::{caps, CapPtr, Kernel, Portal, RuntimeConfig};
//!
//! let kernel = Kernel::boot(RuntimeConfig::from_env())?;
//! let portal = Portal::boot(&kernel, CapPtr(8))?;
//!
//! let root = KernelMemoryCap(caps::ROOT_MEMORY);
//! let obj = ExampleCap(CapPtr(10));
//!
//! let f = root.create_example(portal.lock(), caps::EXAMPLE_FACTORY, obj.0);
//! f.wait()?;
//! let f = obj.ping(f.reuse(), 1000);
//! println!("ran on {}", f.wait()?.place);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Portal / PortalLock / PortalFuture       (kinv)          │
//! │  write message → Transport::invoke → wait on Future       │
//! └────────────────────────────┬─────────────────────────────┘
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │  Kernel, PortalObject, dispatch, create  (kinv-objects)   │
//! └────────────────────────────┬─────────────────────────────┘
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │  Monitor, Future, places, first-fit heap (kinv-runtime)   │
//! └────────────────────────────┬─────────────────────────────┘
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │  wire format, errors, seam traits        (kinv-core)      │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod portal;
pub mod stubs;

pub use portal::{Portal, PortalFuture, PortalLock, Response};

pub use kinv_core::protocol;
pub use kinv_core::{CapPtr, CapPtrDepth, Error, KResult, Message, SharedBuf, Transport};
pub use kinv_objects::{caps, Kernel};
pub use kinv_runtime::{Future, RuntimeConfig};
