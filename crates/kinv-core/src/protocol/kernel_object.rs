//! Methods every kernel object answers

use super::{clip_text, decode_text, encode_text, ProtocolId};
use crate::error::KResult;
use crate::message::{label, Decoder, Encoder, Message};

pub const PROTO: u8 = ProtocolId::KernelObject as u8;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    GetDebugInfo = 0,
    DebugInfoRes = 1,
}

impl Method {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Method::GetDebugInfo),
            1 => Some(Method::DebugInfoRes),
            _ => None,
        }
    }
}

/// Ask an object to describe itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GetDebugInfo;

impl Message for GetDebugInfo {
    const LABEL: u16 = label(PROTO, Method::GetDebugInfo as u8);

    fn encode(&self, _enc: &mut Encoder<'_>) {}

    fn decode(_dec: &mut Decoder<'_>) -> KResult<Self> {
        Ok(GetDebugInfo)
    }
}

/// Response to [`GetDebugInfo`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DebugInfoRes {
    pub message: Vec<u8>,
}

impl DebugInfoRes {
    pub fn new(text: &str) -> Self {
        DebugInfoRes { message: clip_text(text.as_bytes()) }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.message).into_owned()
    }
}

impl Message for DebugInfoRes {
    const LABEL: u16 = label(PROTO, Method::DebugInfoRes as u8);

    fn encode(&self, enc: &mut Encoder<'_>) {
        encode_text(enc, &self.message);
    }

    fn decode(dec: &mut Decoder<'_>) -> KResult<Self> {
        Ok(DebugInfoRes { message: decode_text(dec)? })
    }
}
