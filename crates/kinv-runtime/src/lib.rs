//! # kinv-runtime
//!
//! Concurrency machinery for the kinv invocation core.
//!
//! This crate provides:
//! - Per-object monitors with lock-free admission and iterative draining
//! - Single-assignment futures with futex/condvar parking
//! - Worker places that run handed-off monitor drains
//! - The intrusive first-fit heap and reference-counted memory objects
//! - Runtime configuration from the environment

pub mod config;
pub mod future;
pub mod memory;
pub mod monitor;
pub mod parking;
pub mod place;

mod sync;


pub use config::RuntimeConfig;
pub use future::{Continuation, Future};
pub use memory::{AddrRange, Arena, FirstFitHeap, MemoryDescriptor, MemoryObject, MemoryProperties};
pub use monitor::{Deferral, Monitor, MonitorCtx, Step, Tasklet};
pub use parking::{new_parking, Parking, PlatformParking};
pub use place::{current_place_id, Places, WorkerPlace};
