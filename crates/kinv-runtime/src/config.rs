//! Runtime configuration
//!
//! Library defaults with environment overrides:
//!
//! ```rust,ignore
//! use kinv_runtime::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env()
//!     .num_places(4)
//!     .kernel_memory_size(16 << 20);
//! config.validate()?;
//! ```

use crate::memory::MIN_GRANULARITY;
use kinv_core::constants::PAGE_SIZE;
use kinv_core::env::{env_get, env_get_size};

pub mod defaults {
    pub const KERNEL_MEMORY_SIZE: usize = 16 << 20;
    pub const HEAP_GRANULARITY: usize = 64;
    pub const CAP_TABLE_SLOTS: usize = 256;
    pub const SPIN_BACKOFF_CAP: u32 = 64;
    pub const MAX_PLACES: usize = 256;

    pub fn num_places() -> usize {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4).min(MAX_PLACES)
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Worker places to spawn
    pub num_places: usize,
    /// Size of the kernel memory arena
    pub kernel_memory_size: usize,
    /// First user address; ranges above it are recorded, not managed
    pub kernel_limit: usize,
    /// First-fit heap granularity
    pub heap_granularity: usize,
    /// Slots in the root capability table
    pub cap_table_slots: usize,
    /// Maximum pause iterations between spin lock attempts
    pub spin_backoff_cap: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeConfig {
    /// Library defaults, no environment
    pub fn new() -> Self {
        Self {
            num_places: defaults::num_places(),
            kernel_memory_size: defaults::KERNEL_MEMORY_SIZE,
            kernel_limit: defaults::KERNEL_MEMORY_SIZE,
            heap_granularity: defaults::HEAP_GRANULARITY,
            cap_table_slots: defaults::CAP_TABLE_SLOTS,
            spin_backoff_cap: defaults::SPIN_BACKOFF_CAP,
        }
    }

    /// Defaults overridden by the environment
    ///
    /// - `KINV_NUM_PLACES`
    /// - `KINV_KERNEL_MEMORY` - arena size, accepts K/M/G suffixes
    /// - `KINV_KERNEL_LIMIT` - defaults to the arena size
    /// - `KINV_HEAP_GRANULARITY`
    /// - `KINV_CAP_TABLE_SLOTS`
    /// - `KINV_SPIN_BACKOFF_CAP`
    pub fn from_env() -> Self {
        let kernel_memory_size = env_get_size("KINV_KERNEL_MEMORY", defaults::KERNEL_MEMORY_SIZE);
        Self {
            num_places: env_get("KINV_NUM_PLACES", defaults::num_places()),
            kernel_memory_size,
            kernel_limit: env_get_size("KINV_KERNEL_LIMIT", kernel_memory_size),
            heap_granularity: env_get("KINV_HEAP_GRANULARITY", defaults::HEAP_GRANULARITY),
            cap_table_slots: env_get("KINV_CAP_TABLE_SLOTS", defaults::CAP_TABLE_SLOTS),
            spin_backoff_cap: env_get("KINV_SPIN_BACKOFF_CAP", defaults::SPIN_BACKOFF_CAP),
        }
    }

    pub fn num_places(mut self, n: usize) -> Self {
        self.num_places = n;
        self
    }

    /// Also moves the kernel limit if it was tracking the old size
    pub fn kernel_memory_size(mut self, size: usize) -> Self {
        if self.kernel_limit == self.kernel_memory_size {
            self.kernel_limit = size;
        }
        self.kernel_memory_size = size;
        self
    }

    pub fn kernel_limit(mut self, limit: usize) -> Self {
        self.kernel_limit = limit;
        self
    }

    pub fn heap_granularity(mut self, g: usize) -> Self {
        self.heap_granularity = g;
        self
    }

    pub fn cap_table_slots(mut self, n: usize) -> Self {
        self.cap_table_slots = n;
        self
    }

    pub fn spin_backoff_cap(mut self, cap: u32) -> Self {
        self.spin_backoff_cap = cap;
        self
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.num_places == 0 {
            return Err("num_places must be at least 1");
        }
        if self.num_places > defaults::MAX_PLACES {
            return Err("num_places exceeds maximum");
        }
        if self.kernel_memory_size < PAGE_SIZE {
            return Err("kernel_memory_size must be at least one page");
        }
        if self.kernel_limit > self.kernel_memory_size {
            return Err("kernel_limit must not exceed kernel_memory_size");
        }
        if !self.heap_granularity.is_power_of_two() || self.heap_granularity < MIN_GRANULARITY {
            return Err("heap_granularity must be a power of two of at least 16");
        }
        if self.cap_table_slots < 2 {
            return Err("cap_table_slots must be at least 2");
        }
        if self.spin_backoff_cap == 0 {
            return Err("spin_backoff_cap must be at least 1");
        }
        Ok(())
    }

    pub fn print(&self) {
        eprintln!("kinv configuration:");
        eprintln!("  num_places:         {}", self.num_places);
        eprintln!("  kernel_memory_size: {:#x}", self.kernel_memory_size);
        eprintln!("  kernel_limit:       {:#x}", self.kernel_limit);
        eprintln!("  heap_granularity:   {}", self.heap_granularity);
        eprintln!("  cap_table_slots:    {}", self.cap_table_slots);
        eprintln!("  spin_backoff_cap:   {}", self.spin_backoff_cap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = RuntimeConfig::new();
        assert!(config.num_places >= 1);
        assert_eq!(config.kernel_limit, config.kernel_memory_size);
        assert!(config.validate().is_ok());
        assert!(RuntimeConfig::from_env().validate().is_ok());
    }

    #[test]
    fn test_builder_moves_tracking_limit() {
        let config = RuntimeConfig::new().num_places(2).kernel_memory_size(1 << 20);
        assert_eq!(config.num_places, 2);
        assert_eq!(config.kernel_limit, 1 << 20);

        let config = RuntimeConfig::new().kernel_limit(4096).kernel_memory_size(1 << 20);
        assert_eq!(config.kernel_limit, 4096);
    }

    #[test]
    fn test_validation() {
        assert!(RuntimeConfig::new().num_places(0).validate().is_err());
        assert!(RuntimeConfig::new().heap_granularity(48).validate().is_err());
        assert!(RuntimeConfig::new().heap_granularity(8).validate().is_err());
        assert!(RuntimeConfig::new().kernel_limit(usize::MAX).validate().is_err());
        assert!(RuntimeConfig::new().cap_table_slots(1).validate().is_err());
    }
}
