//! Kernel memory: carving new objects out of a memory capability
//!
//! Every factory-style create travels with the `CREATE` label to the memory
//! object that provides the storage. The factory capability in slot 0
//! decides what gets built; concrete factories extend [`CreateBase`] with
//! their own parameters.

use super::ProtocolId;
use crate::cap::{CapPtr, CapPtrDepth};
use crate::error::{Error, KResult};
use crate::message::{label, Decoder, Encoder, Message};

pub const PROTO: u8 = ProtocolId::KernelMemory as u8;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Properties = 0,
    Create = 1,
    PropertiesRes = 2,
}

impl Method {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Method::Properties),
            1 => Some(Method::Create),
            2 => Some(Method::PropertiesRes),
            _ => None,
        }
    }
}

/// Common prefix of every create message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateBase {
    /// Destination slot
    pub dst: CapPtr,
    /// Factory capability
    pub factory: CapPtr,
    /// Capability map for indirect addressing, null for a direct slot
    pub dst_space: CapPtr,
    pub dst_depth: u8,
}

impl CreateBase {
    pub fn new(dst: CapPtr, factory: CapPtr) -> Self {
        CreateBase { dst, factory, dst_space: CapPtr::NULL, dst_depth: 0 }
    }

    /// Resolve `dst` inside the capability map `space` using `depth` bits
    pub fn set_indirect_dest(mut self, space: CapPtr, depth: CapPtrDepth) -> Self {
        self.dst_space = space;
        self.dst_depth = depth.bits();
        self
    }

    pub fn is_indirect(&self) -> bool {
        !self.dst_space.is_null()
    }

    pub(crate) fn encode_base(&self, enc: &mut Encoder<'_>) {
        enc.dst(self.dst);
        enc.cap(self.factory);
        enc.cap(self.dst_space);
        enc.u8(self.dst_depth);
    }

    pub(crate) fn decode_base(dec: &mut Decoder<'_>) -> KResult<Self> {
        if dec.extra_caps() < 2 {
            return Err(Error::InvalidRequest);
        }
        Ok(CreateBase {
            dst: dec.dst(),
            factory: dec.cap(0),
            dst_space: dec.cap(1),
            dst_depth: dec.u8()?,
        })
    }
}

impl Message for CreateBase {
    const LABEL: u16 = label(PROTO, Method::Create as u8);

    fn encode(&self, enc: &mut Encoder<'_>) {
        self.encode_base(enc);
    }

    fn decode(dec: &mut Decoder<'_>) -> KResult<Self> {
        Self::decode_base(dec)
    }
}

/// Create a child kernel memory object of `size` bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Create {
    pub base: CreateBase,
    pub size: u64,
    pub alignment: u64,
}

impl Create {
    pub fn new(dst: CapPtr, factory: CapPtr, size: u64, alignment: u64) -> Self {
        Create { base: CreateBase::new(dst, factory), size, alignment }
    }
}

impl Message for Create {
    const LABEL: u16 = CreateBase::LABEL;

    fn encode(&self, enc: &mut Encoder<'_>) {
        self.base.encode_base(enc);
        enc.u64(self.size);
        enc.u64(self.alignment);
    }

    fn decode(dec: &mut Decoder<'_>) -> KResult<Self> {
        Ok(Create {
            base: CreateBase::decode_base(dec)?,
            size: dec.u64()?,
            alignment: dec.u64()?,
        })
    }
}

/// Query the memory object's range and free space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Properties;

impl Message for Properties {
    const LABEL: u16 = label(PROTO, Method::Properties as u8);

    fn encode(&self, _enc: &mut Encoder<'_>) {}

    fn decode(_dec: &mut Decoder<'_>) -> KResult<Self> {
        Ok(Properties)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PropertiesRes {
    pub start: u64,
    pub size: u64,
    pub free: u64,
}

impl Message for PropertiesRes {
    const LABEL: u16 = label(PROTO, Method::PropertiesRes as u8);

    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.u64(self.start);
        enc.u64(self.size);
        enc.u64(self.free);
    }

    fn decode(dec: &mut Decoder<'_>) -> KResult<Self> {
        Ok(PropertiesRes { start: dec.u64()?, size: dec.u64()?, free: dec.u64()? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{InvocationBuf, HEADER_SIZE};

    #[test]
    fn test_create_matches_c_layout() {
        let msg = Create::new(CapPtr(5), CapPtr(6), 0x20_0000, 0x1000);
        let mut buf = InvocationBuf::new();
        buf.write(&msg);

        let tag = buf.tag();
        assert_eq!(tag.label(), label(PROTO, 1));
        assert_eq!(tag.length(), 6);
        assert_eq!(tag.extra_caps(), 2);
        assert_eq!(buf.dst(), CapPtr(5));
        assert_eq!(buf.cap(0), CapPtr(6));
        assert_eq!(buf.cap(1), CapPtr::NULL);
        let p = &buf.as_bytes()[HEADER_SIZE..];
        assert_eq!(p[0], 0);
        assert_eq!(&p[8..16], &0x20_0000u64.to_le_bytes());
        assert_eq!(&p[16..24], &0x1000u64.to_le_bytes());

        assert_eq!(buf.read::<Create>().unwrap(), msg);
    }

    #[test]
    fn test_indirect_dest() {
        let base = CreateBase::new(CapPtr(3), CapPtr(4)).set_indirect_dest(CapPtr(9), CapPtrDepth(8));
        assert!(base.is_indirect());

        let mut buf = InvocationBuf::new();
        buf.write(&base);
        assert_eq!(buf.tag().length(), 1);
        let back = buf.read::<CreateBase>().unwrap();
        assert_eq!(back.dst_space, CapPtr(9));
        assert_eq!(back.dst_depth, 8);
    }

    #[test]
    fn test_base_prefix_of_create() {
        let mut buf = InvocationBuf::new();
        buf.write(&Create::new(CapPtr(1), CapPtr(2), 4096, 4096));
        let base = buf.read::<CreateBase>().unwrap();
        assert_eq!(base, CreateBase::new(CapPtr(1), CapPtr(2)));
    }

    #[test]
    fn test_create_without_caps_is_invalid() {
        let mut buf = InvocationBuf::new();
        buf.write(&Properties);
        assert_eq!(buf.read::<CreateBase>(), Err(Error::InvalidRequest));
    }
}
