//! Capability maps: tables addressed by the low bits of a pointer
//!
//! Creates reach a slot in a map through `set_indirect_dest(map, depth)`.

use crate::captable::CapTable;
use crate::invocation::Invocation;
use crate::object::{submit, write_debug_info, KernelObject, Storage};
use kinv_core::protocol::kernel_object::GetDebugInfo;
use kinv_core::{Error, Job, Message};
use kinv_runtime::Monitor;
use std::sync::Arc;

pub struct CapMap {
    table: Arc<CapTable<KernelObject>>,
    index_bits: u8,
    monitor: Arc<Monitor<()>>,
    storage: Storage,
}

impl CapMap {
    pub fn new(storage: Storage, index_bits: u8) -> Self {
        CapMap {
            table: Arc::new(CapTable::new(1usize << index_bits)),
            index_bits,
            monitor: Arc::new(Monitor::new(())),
            storage,
        }
    }

    pub fn table(&self) -> &Arc<CapTable<KernelObject>> {
        &self.table
    }

    pub fn index_bits(&self) -> u8 {
        self.index_bits
    }

    pub fn invoke(self: &Arc<Self>, inv: Invocation) {
        let this = Arc::clone(self);
        submit(&self.monitor, inv, move |_: &mut (), _, inv| {
            if inv.tag().label() == GetDebugInfo::LABEL {
                let text = format!(
                    "capmap {} bits, {}/{} slots used",
                    this.index_bits,
                    this.table.occupied(),
                    this.table.capacity()
                );
                write_debug_info(inv, &text)
            } else {
                Error::NotImplemented
            }
        });
    }

    /// Objects still in the map stay alive through their own references
    pub fn delete(self: &Arc<Self>, done: Job) {
        let this = Arc::clone(self);
        self.monitor.when_released(Box::new(move || this.storage.release(done)));
    }
}

impl std::fmt::Debug for CapMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapMap")
            .field("index_bits", &self.index_bits)
            .field("occupied", &self.table.occupied())
            .finish()
    }
}
