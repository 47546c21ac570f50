//! # kinv-objects
//!
//! The kernel side of the kinv invocation core.
//!
//! - [`KernelObject`]: what a capability names, with one dispatch table
//!   per variant
//! - [`CapTable`]: flat capability space with single-winner slot claims
//! - [`KernelMemory`]: memory objects and the create pattern
//! - [`ExampleObject`], [`CapMap`], [`PortalObject`]: the other objects
//! - [`Kernel`]: boots everything and implements `Transport`
//!
//! ```rust,ignore
//! use kinv_objects::{caps, Kernel};
//! use kinv_runtime::RuntimeConfig;
//!
//! let kernel = Kernel::boot(RuntimeConfig::new().num_places(2))?;
//! let buf = kernel.boot_portal(CapPtr(8))?;
//! ```

pub mod capmap;
pub mod captable;
pub mod example;
pub mod factory;
pub mod invocation;
pub mod kernel;
pub mod kernel_memory;
pub mod object;
pub mod portal;

#[cfg(test)]
mod testing;

pub use capmap::CapMap;
pub use captable::CapTable;
pub use example::{ExampleObject, ExampleState};
pub use factory::FactoryKind;
pub use invocation::Invocation;
pub use kernel::{caps, Kernel};
pub use kernel_memory::KernelMemory;
pub use object::{KernelObject, ObjectKind, Storage};
pub use portal::{PortalObject, PortalState};
