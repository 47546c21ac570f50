//! Error types for the invocation core
//!
//! `Error` is the closed set of result codes shared by kernel and user
//! side. The discriminants are part of the wire format: they travel back
//! to the client as a single byte, so never renumber them.

use std::fmt;

/// Result type for kinv operations
pub type KResult<T> = Result<T, Error>;

/// Invocation result codes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Error {
    /// Operation completed
    Success = 0,

    /// Future has not been assigned yet
    Unset = 1,

    /// Handler completes asynchronously and signals completion itself
    Inhibit = 2,

    /// Unspecified failure
    GenericError = 3,

    /// Capability slot is empty, revoked or out of range
    InvalidCapability = 4,

    /// Argument outside the accepted domain
    InvalidArgument = 5,

    /// Address is not canonical
    NonCanonicalAddress = 6,

    /// Size or address violates the required alignment
    Unaligned = 7,

    /// Allocator or table exhausted
    InsufficientResources = 8,

    /// A CAS-guarded claim was won by someone else
    LostRace = 9,

    /// Caller should resubmit
    Retry = 10,

    /// No message pending
    NoMessage = 11,

    /// Capability refers to an object of the wrong type
    TypeMismatch = 12,

    /// No handler for this (protocol, method) pair
    NotImplemented = 13,

    /// Destination slot is not empty
    CapNonempty = 14,

    /// Memory is not kernel-resident
    NotKernelmem = 15,

    /// Operation would create a dependency cycle
    CyclicDependency = 16,

    /// Portal is busy with another invocation
    PortalNotOpen = 17,

    /// Portal has no invocation in flight
    PortalNotInvoked = 18,

    /// Portal has no invocation buffer bound
    PortalNoBuffer = 19,

    /// Portal has no owner to notify
    PortalNoEndpoint = 20,

    /// Capability lookup failed
    NoLookup = 21,

    /// Malformed message
    InvalidRequest = 22,

    /// Request refused in the current state
    RequestDenied = 23,

    /// Page map missing
    PagemapMissing = 24,

    /// Page map not configured
    PagemapNoconf = 25,
}

impl Error {
    /// Highest valid discriminant
    pub const MAX: u8 = Error::PagemapNoconf as u8;

    /// Decode a wire byte
    pub fn from_u8(v: u8) -> Option<Error> {
        use Error::*;
        Some(match v {
            0 => Success,
            1 => Unset,
            2 => Inhibit,
            3 => GenericError,
            4 => InvalidCapability,
            5 => InvalidArgument,
            6 => NonCanonicalAddress,
            7 => Unaligned,
            8 => InsufficientResources,
            9 => LostRace,
            10 => Retry,
            11 => NoMessage,
            12 => TypeMismatch,
            13 => NotImplemented,
            14 => CapNonempty,
            15 => NotKernelmem,
            16 => CyclicDependency,
            17 => PortalNotOpen,
            18 => PortalNotInvoked,
            19 => PortalNoBuffer,
            20 => PortalNoEndpoint,
            21 => NoLookup,
            22 => InvalidRequest,
            23 => RequestDenied,
            24 => PagemapMissing,
            25 => PagemapNoconf,
            _ => return None,
        })
    }

    #[inline]
    pub fn is_success(self) -> bool {
        self == Error::Success
    }

    /// Collapse into a `KResult`, treating `Success` as `Ok`
    #[inline]
    pub fn into_result(self) -> KResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl From<Error> for u8 {
    fn from(e: Error) -> u8 {
        e as u8
    }
}

impl<T> From<KResult<T>> for Error {
    fn from(r: KResult<T>) -> Error {
        match r {
            Ok(_) => Error::Success,
            Err(e) => e,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::Success => "success",
            Error::Unset => "result not yet assigned",
            Error::Inhibit => "completion deferred by handler",
            Error::GenericError => "generic error",
            Error::InvalidCapability => "invalid capability",
            Error::InvalidArgument => "invalid argument",
            Error::NonCanonicalAddress => "non-canonical address",
            Error::Unaligned => "unaligned size or address",
            Error::InsufficientResources => "insufficient resources",
            Error::LostRace => "lost race for slot",
            Error::Retry => "retry",
            Error::NoMessage => "no message",
            Error::TypeMismatch => "capability type mismatch",
            Error::NotImplemented => "method not implemented",
            Error::CapNonempty => "capability slot not empty",
            Error::NotKernelmem => "not kernel memory",
            Error::CyclicDependency => "cyclic dependency",
            Error::PortalNotOpen => "portal not open",
            Error::PortalNotInvoked => "portal not invoked",
            Error::PortalNoBuffer => "portal has no invocation buffer",
            Error::PortalNoEndpoint => "portal has no endpoint",
            Error::NoLookup => "capability lookup failed",
            Error::InvalidRequest => "invalid request",
            Error::RequestDenied => "request denied",
            Error::PagemapMissing => "page map missing",
            Error::PagemapNoconf => "page map not configured",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Error {}
