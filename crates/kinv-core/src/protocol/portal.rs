//! Portals

use super::ProtocolId;

pub use super::kernel_memory::CreateBase as Create;

pub const PROTO: u8 = ProtocolId::Portal as u8;
