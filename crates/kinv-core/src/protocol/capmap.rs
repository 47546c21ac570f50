//! Capability maps

use super::kernel_memory::CreateBase;
use super::ProtocolId;
use crate::cap::CapPtr;
use crate::error::KResult;
use crate::message::{Decoder, Encoder, Message};

pub const PROTO: u8 = ProtocolId::CapMap as u8;

/// Create a capability map with `2^index_bits` slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Create {
    pub base: CreateBase,
    pub index_bits: u8,
}

impl Create {
    pub fn new(dst: CapPtr, factory: CapPtr, index_bits: u8) -> Self {
        Create { base: CreateBase::new(dst, factory), index_bits }
    }
}

impl Message for Create {
    const LABEL: u16 = CreateBase::LABEL;

    fn encode(&self, enc: &mut Encoder<'_>) {
        self.base.encode_base(enc);
        enc.u8(self.index_bits);
    }

    fn decode(dec: &mut Decoder<'_>) -> KResult<Self> {
        Ok(Create { base: CreateBase::decode_base(dec)?, index_bits: dec.u8()? })
    }
}
