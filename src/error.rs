//! Error types for wire decoding.
//!
//! Decoding failures fall into two categories with different recovery
//! semantics: [`DecodeError::IncompleteRead`] means the buffer is shorter
//! than the declared structure (a stream transport should wait for more
//! bytes; a datagram transport must drop the datagram), while
//! [`ParseError`] means the bytes present are structurally invalid and the
//! current PDU must be dropped regardless of transport kind.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("need at least {needed} bytes, have {available}")]
    IncompleteRead { needed: usize, available: usize },

    #[error(transparent)]
    ParseError(#[from] ParseError),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unknown SD entry type {0:#x}")]
    UnknownEntryType(u8),

    #[error("unknown SOME/IP message type {0:#x}")]
    UnknownMessageType(u8),

    #[error("unknown SOME/IP return code {0:#x}")]
    UnknownReturnCode(u8),

    #[error("option index out of range: index {index} count {count} table len {len}")]
    OptionIndexOutOfRange { index: u16, count: u16, len: usize },

    #[error("non-zero reserved bits in subscribe minver_or_counter: {0:#x}")]
    ReservedBitsSet(u32),

    #[error("someip length field {declared} inconsistent with buffer size {actual}")]
    LengthMismatch { declared: u32, actual: usize },

    #[error("invalid SD envelope: {0}")]
    InvalidEnvelope(&'static str),

    #[error("unsupported L4 protocol byte {0:#x}")]
    UnknownL4Proto(u8),
}

impl DecodeError {
    pub fn incomplete(needed: usize, available: usize) -> Self {
        DecodeError::IncompleteRead { needed, available }
    }
}

/// Raised by a [`crate::sd::ServerServiceListener::client_subscribed`]
/// implementation to refuse a subscription. Not a [`DecodeError`] or
/// [`ParseError`]: it is a control-flow signal caught exactly once, at
/// the point `Announce::handle_subscribe` calls `TimedStore::refresh`,
/// and turned into a NACK entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NakSubscription;

impl std::fmt::Display for NakSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "subscription refused")
    }
}

impl std::error::Error for NakSubscription {}
