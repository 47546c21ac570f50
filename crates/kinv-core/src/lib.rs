//! # kinv-core
//!
//! Platform-agnostic types for the kinv capability invocation core.
//!
//! Nothing in here spawns threads or touches the OS. The concurrency
//! machinery lives in `kinv-runtime`, the kernel objects in `kinv-objects`.
//!
//! ## Modules
//!
//! - `error` - Result codes shared by kernel and user side
//! - `cap` - Capability pointers and lookup depth
//! - `message` - The 512-byte invocation buffer and message codec
//! - `protocol` - Method ids and message structs per protocol
//! - `traits` - Capability space, place and transport seams
//! - `spinlock` - Bounded-backoff spin lock
//! - `kprint` - Leveled logging macros
//! - `env` - Environment variable helpers

pub mod error;
pub mod env;
pub mod cap;
pub mod message;
pub mod protocol;
pub mod traits;
pub mod spinlock;
pub mod kprint;

pub use error::{Error, KResult};
pub use cap::{CapPtr, CapPtrDepth};
pub use message::{InvocationBuf, Message, SharedBuf, Tag};
pub use spinlock::SpinLock;
pub use traits::{CapSpace, Job, Place, SysretHandler, Transport};

pub mod constants {
    /// Page granularity for kernel memory objects
    pub const PAGE_SIZE: usize = 4096;

    /// Alignment of kernel object storage
    pub const CACHE_LINE_SIZE: usize = 64;

    /// Storage reserved for one kernel object descriptor
    pub const KERNEL_OBJECT_SIZE: usize = 64;
}
