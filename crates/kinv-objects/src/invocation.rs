//! The kernel's view of one invocation in flight
//!
//! An `Invocation` travels inside the tasklet submitted to the target's
//! monitor. It gives the handler the message, the caller's capability
//! space for further lookups, and the portal to answer through.

use crate::captable::CapTable;
use crate::object::KernelObject;
use crate::portal::PortalObject;
use kinv_core::{CapPtr, CapPtrDepth, CapSpace, Error, KResult, Message, SharedBuf, Tag};
use std::sync::Arc;

#[derive(Clone)]
pub struct Invocation {
    portal: Arc<PortalObject>,
    buf: SharedBuf,
    caps: Arc<CapTable<KernelObject>>,
    tag: Tag,
    target: CapPtr,
}

impl Invocation {
    pub(crate) fn new(
        portal: Arc<PortalObject>,
        buf: SharedBuf,
        caps: Arc<CapTable<KernelObject>>,
        target: CapPtr,
    ) -> Self {
        let tag = buf.tag();
        Invocation { portal, buf, caps, tag, target }
    }

    /// Tag as it was when the invocation was sent
    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn protocol(&self) -> u8 {
        self.tag.protocol()
    }

    pub fn method(&self) -> u8 {
        self.tag.method()
    }

    pub fn target(&self) -> CapPtr {
        self.target
    }

    pub fn read<M: Message>(&self) -> KResult<M> {
        self.buf.read()
    }

    /// Write a response payload into the caller's buffer
    pub fn write<M: Message>(&self, msg: &M) {
        self.buf.write(msg);
    }

    /// Caller's capability space
    pub fn caps(&self) -> &Arc<CapTable<KernelObject>> {
        &self.caps
    }

    /// Direct lookup in the caller's space
    pub fn lookup(&self, ptr: CapPtr) -> KResult<KernelObject> {
        self.caps.lookup(ptr, CapPtrDepth::DIRECT)
    }

    pub fn portal(&self) -> &Arc<PortalObject> {
        &self.portal
    }

    /// Report the result; the portal reopens and the caller wakes up
    pub fn reply_response(&self, result: Error) {
        self.portal.reply_response(result);
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("tag", &self.tag)
            .field("target", &self.target)
            .finish()
    }
}
