//! Protocol definitions
//!
//! One submodule per protocol. Each defines its method ids and the message
//! structs carried for them. The label of a message is
//! `(protocol << 8) | method`.

pub mod kernel_object;
pub mod kernel_memory;
pub mod example;
pub mod capmap;
pub mod portal;

use crate::error::{Error, KResult};
use crate::message::{Decoder, Encoder, MAX_PAYLOAD};

/// Protocol identifiers
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolId {
    Result = 1,
    KernelObject = 2,
    KernelMemory = 3,
    Frame = 4,
    PageMap = 5,
    CapMap = 6,
    ExecutionContext = 7,
    Portal = 8,
    Example = 9,
}

impl ProtocolId {
    pub fn from_u8(v: u8) -> Option<Self> {
        use ProtocolId::*;
        Some(match v {
            1 => Result,
            2 => KernelObject,
            3 => KernelMemory,
            4 => Frame,
            5 => PageMap,
            6 => CapMap,
            7 => ExecutionContext,
            8 => Portal,
            9 => Example,
            _ => return None,
        })
    }
}

/// Longest text carried by a `bytes: u16` + `message` payload
pub const MAX_TEXT: usize = MAX_PAYLOAD - 2;

/// Text payloads are truncated to [`MAX_TEXT`] bytes
pub(crate) fn clip_text(text: &[u8]) -> Vec<u8> {
    text[..text.len().min(MAX_TEXT)].to_vec()
}

pub(crate) fn encode_text(enc: &mut Encoder<'_>, text: &[u8]) {
    enc.u16(text.len() as u16);
    enc.bytes(text);
}

pub(crate) fn decode_text(dec: &mut Decoder<'_>) -> KResult<Vec<u8>> {
    let n = dec.u16()? as usize;
    if n > MAX_TEXT {
        return Err(Error::InvalidRequest);
    }
    Ok(dec.bytes(n)?.to_vec())
}
