//! Wire formats and pairing state machines for the Companion protocol

pub mod crypto;
pub mod frame;
pub mod opack;
pub mod plist;
pub mod tlv;

use thiserror::Error;

/// Errors produced by the wire-format codecs (OPACK, TLV8, bplist)
///
/// Inputs from the wire are never trusted; decoding fails closed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before a declared length was satisfied
    #[error("truncated input")]
    Truncated,

    /// A tag byte outside the format's table
    #[error("unknown tag: 0x{0:02x}")]
    UnknownTag(u8),

    /// A back-reference pointed past the reference list
    #[error("back-reference out of range: {0}")]
    BadBackref(u64),

    /// A string value was not valid UTF-8
    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    /// Structurally invalid input for the named reason
    #[error("malformed input: {0}")]
    Malformed(&'static str),
}
