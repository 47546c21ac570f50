//! The example object protocol

use super::{clip_text, decode_text, encode_text, ProtocolId};
use crate::error::KResult;
use crate::message::{label, Decoder, Encoder, Message};

pub use super::kernel_memory::CreateBase as Create;

pub const PROTO: u8 = ProtocolId::Example as u8;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    PrintMessage = 0,
    Ping = 1,
    MoveHome = 2,
}

impl Method {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Method::PrintMessage),
            1 => Some(Method::Ping),
            2 => Some(Method::MoveHome),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintMessage {
    pub message: Vec<u8>,
}

impl PrintMessage {
    pub fn new(text: &str) -> Self {
        PrintMessage { message: clip_text(text.as_bytes()) }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.message).into_owned()
    }
}

impl Message for PrintMessage {
    const LABEL: u16 = label(PROTO, Method::PrintMessage as u8);

    fn encode(&self, enc: &mut Encoder<'_>) {
        encode_text(enc, &self.message);
    }

    fn decode(dec: &mut Decoder<'_>) -> KResult<Self> {
        Ok(PrintMessage { message: decode_text(dec)? })
    }
}

/// Spin for `wait_cycles`, then report the place that ran the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub wait_cycles: u64,
    pub place: u64,
}

impl Ping {
    /// Placeholder written by the client; the handler overwrites it
    pub const NO_PLACE: u64 = 1_234_567;

    /// Reported when the handler ran on the invoking thread, not a place
    pub const CALLER_THREAD: u64 = u64::MAX;

    pub fn new(wait_cycles: u64) -> Self {
        Ping { wait_cycles, place: Self::NO_PLACE }
    }
}

impl Message for Ping {
    const LABEL: u16 = label(PROTO, Method::Ping as u8);

    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.u64(self.wait_cycles);
        enc.u64(self.place);
    }

    fn decode(dec: &mut Decoder<'_>) -> KResult<Self> {
        Ok(Ping { wait_cycles: dec.u64()?, place: dec.u64()? })
    }
}

/// Move the object's home to place `location`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveHome {
    pub location: u16,
}

impl Message for MoveHome {
    const LABEL: u16 = label(PROTO, Method::MoveHome as u8);

    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.u16(self.location);
    }

    fn decode(dec: &mut Decoder<'_>) -> KResult<Self> {
        Ok(MoveHome { location: dec.u16()? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::InvocationBuf;

    #[test]
    fn test_ping_layout() {
        let mut buf = InvocationBuf::new();
        buf.write(&Ping::new(1000));
        assert_eq!(buf.tag().label(), 0x0901);
        assert_eq!(buf.tag().length(), 4);
        assert_eq!(buf.read::<Ping>().unwrap(), Ping { wait_cycles: 1000, place: Ping::NO_PLACE });
    }

    #[test]
    fn test_print_message_roundtrip() {
        let mut buf = InvocationBuf::new();
        buf.write(&PrintMessage::new("hello kernel"));
        assert_eq!(buf.tag().method(), Method::PrintMessage as u8);
        assert_eq!(buf.read::<PrintMessage>().unwrap().text(), "hello kernel");
    }

    #[test]
    fn test_truncated_text_is_invalid() {
        let mut buf = InvocationBuf::new();
        buf.write(&PrintMessage::new("0123456789"));
        let mut tag = buf.tag();
        tag.set_length(1);
        buf.set_tag(tag);
        assert!(buf.read::<PrintMessage>().is_err());
    }

    #[test]
    fn test_method_ids() {
        assert_eq!(Method::from_u8(2), Some(Method::MoveHome));
        assert_eq!(Method::from_u8(3), None);
    }
}
