//! Invocation buffer wire format
//!
//! A fixed 512-byte buffer shared between a client portal and the kernel:
//!
//! ```text
//! offset  size  field
//!      0     4  tag   (label:16 | length:7 | extra_caps:3 | unwrapped_mask:6)
//!      4     4  destination capability
//!      8    24  capability slots [6]
//!     32   480  method payload
//! ```
//!
//! All multi-byte fields are little-endian. Payload fields are placed at
//! their natural alignment, so the byte image matches a `repr(C)` struct
//! that extends the 32-byte header.
//!
//! Messages never alias the raw bytes. Each message type implements
//! [`Message`] with an explicit encode/decode step, and decoding checks the
//! tag's length field before touching the payload.

use crate::cap::CapPtr;
use crate::error::{Error, KResult};
use crate::spinlock::SpinLock;
use std::fmt;
use std::sync::Arc;

/// Total buffer size
pub const BUF_SIZE: usize = 512;

/// Tag, destination and capability slots
pub const HEADER_SIZE: usize = 32;

/// Bytes available for the method payload
pub const MAX_PAYLOAD: usize = BUF_SIZE - HEADER_SIZE;

/// Payload size in 4-byte words
pub const MAX_LENGTH: usize = MAX_PAYLOAD / 4;

/// Number of capability slots in the header
pub const MAX_EXTRA_CAPS: usize = 6;

const TAG_OFFSET: usize = 0;
const DST_OFFSET: usize = 4;
const CAPS_OFFSET: usize = 8;

/// Build a label from protocol and method ids
#[inline]
pub const fn label(proto: u8, method: u8) -> u16 {
    ((proto as u16) << 8) | method as u16
}

/// Message tag bitfield
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
#[repr(transparent)]
pub struct Tag(u32);

impl Tag {
    const LABEL_BITS: u32 = 16;
    const LENGTH_SHIFT: u32 = 16;
    const LENGTH_BITS: u32 = 7;
    const CAPS_SHIFT: u32 = 23;
    const CAPS_BITS: u32 = 3;
    const MASK_SHIFT: u32 = 26;
    const MASK_BITS: u32 = 6;

    #[inline]
    pub const fn new(label: u16, length: u8) -> Self {
        Tag(label as u32 | ((length as u32 & ((1 << Self::LENGTH_BITS) - 1)) << Self::LENGTH_SHIFT))
    }

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Tag(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    const fn get(self, shift: u32, bits: u32) -> u32 {
        (self.0 >> shift) & ((1 << bits) - 1)
    }

    #[inline]
    fn set(&mut self, shift: u32, bits: u32, v: u32) {
        let mask = ((1u32 << bits) - 1) << shift;
        self.0 = (self.0 & !mask) | ((v << shift) & mask);
    }

    #[inline]
    pub const fn label(self) -> u16 {
        self.get(0, Self::LABEL_BITS) as u16
    }

    #[inline]
    pub fn set_label(&mut self, label: u16) {
        self.set(0, Self::LABEL_BITS, label as u32);
    }

    #[inline]
    pub const fn protocol(self) -> u8 {
        (self.label() >> 8) as u8
    }

    #[inline]
    pub const fn method(self) -> u8 {
        self.label() as u8
    }

    /// Payload length in 4-byte words
    #[inline]
    pub const fn length(self) -> u8 {
        self.get(Self::LENGTH_SHIFT, Self::LENGTH_BITS) as u8
    }

    #[inline]
    pub fn set_length(&mut self, words: u8) {
        debug_assert!(words as usize <= MAX_LENGTH);
        self.set(Self::LENGTH_SHIFT, Self::LENGTH_BITS, words as u32);
    }

    #[inline]
    pub const fn extra_caps(self) -> u8 {
        self.get(Self::CAPS_SHIFT, Self::CAPS_BITS) as u8
    }

    #[inline]
    pub fn set_extra_caps(&mut self, n: u8) {
        debug_assert!(n as usize <= MAX_EXTRA_CAPS);
        self.set(Self::CAPS_SHIFT, Self::CAPS_BITS, n as u32);
    }

    #[inline]
    pub const fn unwrapped_mask(self) -> u8 {
        self.get(Self::MASK_SHIFT, Self::MASK_BITS) as u8
    }

    #[inline]
    pub fn set_unwrapped_mask(&mut self, mask: u8) {
        self.set(Self::MASK_SHIFT, Self::MASK_BITS, mask as u32);
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tag")
            .field("proto", &self.protocol())
            .field("method", &self.method())
            .field("length", &self.length())
            .field("extra_caps", &self.extra_caps())
            .field("unwrapped_mask", &self.unwrapped_mask())
            .finish()
    }
}

/// The 512-byte invocation buffer
#[derive(Clone)]
#[repr(C, align(64))]
pub struct InvocationBuf {
    bytes: [u8; BUF_SIZE],
}

const _: () = assert!(std::mem::size_of::<InvocationBuf>() == BUF_SIZE);

impl InvocationBuf {
    pub const fn new() -> Self {
        InvocationBuf { bytes: [0; BUF_SIZE] }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; BUF_SIZE] {
        &self.bytes
    }

    #[inline]
    fn word(&self, off: usize) -> u32 {
        let mut w = [0u8; 4];
        w.copy_from_slice(&self.bytes[off..off + 4]);
        u32::from_le_bytes(w)
    }

    #[inline]
    fn set_word(&mut self, off: usize, v: u32) {
        self.bytes[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    #[inline]
    pub fn tag(&self) -> Tag {
        Tag(self.word(TAG_OFFSET))
    }

    #[inline]
    pub fn set_tag(&mut self, tag: Tag) {
        self.set_word(TAG_OFFSET, tag.0);
    }

    #[inline]
    pub fn dst(&self) -> CapPtr {
        CapPtr(self.word(DST_OFFSET))
    }

    #[inline]
    pub fn set_dst(&mut self, cap: CapPtr) {
        self.set_word(DST_OFFSET, cap.0);
    }

    /// Capability slot `i` (0..6)
    #[inline]
    pub fn cap(&self, i: usize) -> CapPtr {
        debug_assert!(i < MAX_EXTRA_CAPS);
        CapPtr(self.word(CAPS_OFFSET + 4 * i))
    }

    #[inline]
    pub fn set_cap(&mut self, i: usize, cap: CapPtr) {
        debug_assert!(i < MAX_EXTRA_CAPS);
        self.set_word(CAPS_OFFSET + 4 * i, cap.0);
    }

    /// Append a capability reference after the ones already present
    ///
    /// More than six extra caps is a programming error.
    pub fn add_extra_cap(&mut self, cap: CapPtr) {
        let mut tag = self.tag();
        let n = tag.extra_caps() as usize;
        debug_assert!(n < MAX_EXTRA_CAPS, "too many extra capabilities");
        if n >= MAX_EXTRA_CAPS {
            return;
        }
        self.set_cap(n, cap);
        tag.set_extra_caps(n as u8 + 1);
        self.set_tag(tag);
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_SIZE..]
    }

    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[HEADER_SIZE..]
    }

    /// Replace the buffer contents with `msg`
    ///
    /// The header is reset (null destination, no caps) before encoding, so
    /// nothing from a previous call leaks into this one.
    pub fn write<M: Message>(&mut self, msg: &M) {
        self.bytes[..HEADER_SIZE].fill(0);
        self.set_tag(Tag::new(M::LABEL, 0));
        let mut enc = Encoder { buf: self, pos: 0 };
        msg.encode(&mut enc);
        let words = enc.pos.div_ceil(4);
        let mut tag = self.tag();
        tag.set_length(words as u8);
        self.set_tag(tag);
    }

    /// Decode the current contents as `M`
    ///
    /// The label is not checked; callers dispatch on it first. Fails with
    /// `InvalidRequest` when the tag's length does not cover `M`.
    pub fn read<M: Message>(&self) -> KResult<M> {
        let limit = (self.tag().length() as usize * 4).min(MAX_PAYLOAD);
        let mut dec = Decoder { buf: self, pos: 0, limit };
        M::decode(&mut dec)
    }
}

impl Default for InvocationBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InvocationBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.tag();
        let caps: Vec<CapPtr> = (0..tag.extra_caps() as usize).map(|i| self.cap(i)).collect();
        f.debug_struct("InvocationBuf")
            .field("tag", &tag)
            .field("dst", &self.dst())
            .field("caps", &caps)
            .finish()
    }
}

/// A method struct carried in the invocation buffer
pub trait Message: Sized {
    /// `(protocol << 8) | method`
    const LABEL: u16;

    fn encode(&self, enc: &mut Encoder<'_>);

    fn decode(dec: &mut Decoder<'_>) -> KResult<Self>;
}

/// Sequential payload writer used by [`Message::encode`]
pub struct Encoder<'a> {
    buf: &'a mut InvocationBuf,
    pos: usize,
}

impl<'a> Encoder<'a> {
    #[inline]
    fn align(&mut self, a: usize) {
        let aligned = (self.pos + a - 1) & !(a - 1);
        // Padding is zero because write() cleared it or it was never written
        self.buf.payload_mut()[self.pos..aligned].fill(0);
        self.pos = aligned;
    }

    fn put(&mut self, align: usize, bytes: &[u8]) {
        self.align(align);
        let end = self.pos + bytes.len();
        assert!(end <= MAX_PAYLOAD, "message exceeds {} payload bytes", MAX_PAYLOAD);
        self.buf.payload_mut()[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
    }

    pub fn u8(&mut self, v: u8) {
        self.put(1, &[v]);
    }

    pub fn u16(&mut self, v: u16) {
        self.put(2, &v.to_le_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.put(4, &v.to_le_bytes());
    }

    pub fn u64(&mut self, v: u64) {
        self.put(8, &v.to_le_bytes());
    }

    /// Raw bytes, byte aligned
    pub fn bytes(&mut self, v: &[u8]) {
        self.put(1, v);
    }

    /// Destination capability in the header
    pub fn dst(&mut self, cap: CapPtr) {
        self.buf.set_dst(cap);
    }

    /// Next capability slot in the header
    pub fn cap(&mut self, cap: CapPtr) {
        self.buf.add_extra_cap(cap);
    }
}

/// Sequential, bounds-checked payload reader used by [`Message::decode`]
pub struct Decoder<'a> {
    buf: &'a InvocationBuf,
    pos: usize,
    limit: usize,
}

impl<'a> Decoder<'a> {
    fn take(&mut self, align: usize, n: usize) -> KResult<&'a [u8]> {
        let start = (self.pos + align - 1) & !(align - 1);
        let end = start + n;
        if end > self.limit {
            return Err(Error::InvalidRequest);
        }
        self.pos = end;
        let buf: &'a InvocationBuf = self.buf;
        Ok(&buf.payload()[start..end])
    }

    pub fn u8(&mut self) -> KResult<u8> {
        Ok(self.take(1, 1)?[0])
    }

    pub fn u16(&mut self) -> KResult<u16> {
        let b = self.take(2, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> KResult<u32> {
        let b = self.take(4, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> KResult<u64> {
        let mut w = [0u8; 8];
        w.copy_from_slice(self.take(8, 8)?);
        Ok(u64::from_le_bytes(w))
    }

    pub fn bytes(&mut self, n: usize) -> KResult<&'a [u8]> {
        self.take(1, n)
    }

    pub fn dst(&self) -> CapPtr {
        self.buf.dst()
    }

    pub fn cap(&self, i: usize) -> CapPtr {
        self.buf.cap(i)
    }

    /// Number of capability slots the sender filled
    pub fn extra_caps(&self) -> usize {
        self.buf.tag().extra_caps() as usize
    }
}

/// An invocation buffer shared between a portal and the kernel
///
/// Client and kernel take turns: the client writes before invoking, the
/// kernel reads and replies before completing, the client reads after its
/// future resolves. The lock only makes those turns memory-safe; it is
/// never held across a call into a monitor or a wait.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<SpinLock<InvocationBuf>>);

impl SharedBuf {
    pub fn new() -> Self {
        SharedBuf(Arc::new(SpinLock::new(InvocationBuf::new())))
    }

    pub fn write<M: Message>(&self, msg: &M) {
        self.0.lock().write(msg);
    }

    pub fn read<M: Message>(&self) -> KResult<M> {
        self.0.lock().read()
    }

    pub fn tag(&self) -> Tag {
        self.0.lock().tag()
    }

    /// Run `f` with shared access to the raw buffer
    pub fn with<R>(&self, f: impl FnOnce(&InvocationBuf) -> R) -> R {
        f(&self.0.lock())
    }

    /// Run `f` with exclusive access to the raw buffer
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut InvocationBuf) -> R) -> R {
        f(&mut self.0.lock())
    }

    pub fn ptr_eq(&self, other: &SharedBuf) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SharedBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with(|b| fmt::Debug::fmt(b, f))
    }
}
