//! HAP pair-setup and pair-verify
//!
//! The state machines in [`setup`] and [`verify`] are carrier
//! independent: they consume and produce TLV8 payloads. Two carriers
//! wrap them: HTTP against the AirPlay port ([`airplay`]) and the
//! framed Companion transport ([`companion`]).

pub mod airplay;
pub mod companion;
mod credentials;
mod http;
pub mod setup;
pub mod verify;

pub use airplay::AirPlayPairing;
pub use companion::CompanionPairing;
pub use credentials::HapCredentials;
pub use setup::PairSetup;
pub use verify::PairVerify;

use thiserror::Error;

use crate::protocol::crypto::CryptoError;
use crate::protocol::tlv::Tag;
use crate::protocol::CodecError;

/// Error kinds a peer reports through TLV tag 0x07
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerErrorCode {
    /// Code 1 or anything unrecognized
    Unknown,
    /// Code 2; with pair-setup this almost always means a wrong PIN
    AuthenticationFailed,
    /// Code 3; the device wants the client to wait before retrying
    Backoff,
    /// Code 4
    UnknownPeer,
    /// Code 5
    MaxPeers,
    /// Code 6
    MaxAuthAttempts,
}

impl PeerErrorCode {
    /// Map a wire byte to an error kind
    #[must_use]
    pub fn from_byte(code: u8) -> Self {
        match code {
            2 => Self::AuthenticationFailed,
            3 => Self::Backoff,
            4 => Self::UnknownPeer,
            5 => Self::MaxPeers,
            6 => Self::MaxAuthAttempts,
            _ => Self::Unknown,
        }
    }

    fn message(self) -> &'static str {
        match self {
            Self::Unknown => "unknown error",
            Self::AuthenticationFailed => "authentication failed (likely wrong PIN)",
            Self::Backoff => "device asked for backoff",
            Self::UnknownPeer => "device does not know this pairing",
            Self::MaxPeers => "device has no room for another pairing",
            Self::MaxAuthAttempts => "too many failed attempts",
        }
    }
}

/// Pairing errors
#[derive(Debug, Error)]
pub enum PairingError {
    /// The peer aborted the handshake with an error TLV
    #[error("peer reported: {}{}", .code.message(), retry_suffix(.retry_delay))]
    Peer {
        /// Decoded error kind
        code: PeerErrorCode,
        /// Seconds to wait, when the peer sent a retry delay
        retry_delay: Option<u32>,
    },

    /// A reply carried the wrong sequence number
    #[error("unexpected sequence number: expected {expected}, got {actual}")]
    UnexpectedSeqNo {
        /// Sequence number the state machine was waiting for
        expected: u8,
        /// Sequence number actually received
        actual: u8,
    },

    /// A required TLV tag was absent
    #[error("missing TLV tag {0:?}")]
    MissingTag(Tag),

    /// Verify step 2 named a different accessory than the credentials
    #[error("peer identifier mismatch")]
    IdentifierMismatch,

    /// A handshake method was driven out of sequence
    #[error("pairing step out of order: {0}")]
    OutOfOrder(&'static str),

    /// The HTTP carrier got a non-success status
    #[error("pairing endpoint returned status {0}")]
    HttpStatus(u16),

    /// Crypto failure during the handshake
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Malformed TLV or OPACK payload
    #[error(transparent)]
    Codec(#[from] CodecError),
}

fn retry_suffix(delay: &Option<u32>) -> String {
    match delay {
        Some(seconds) => format!(" (retry in {seconds}s)"),
        None => String::new(),
    }
}

impl PairingError {
    /// Build the peer-reported variant from an error TLV
    #[must_use]
    pub fn from_peer(code: u8, retry_delay: Option<u32>) -> Self {
        Self::Peer {
            code: PeerErrorCode::from_byte(code),
            retry_delay,
        }
    }
}

/// Common validation for a handshake reply: peer errors short-circuit,
/// then the sequence number must match.
pub(crate) fn check_reply(
    reader: &crate::protocol::tlv::TlvReader,
    expected_seq: u8,
) -> Result<(), PairingError> {
    if let Some(code) = reader.error_code() {
        return Err(PairingError::from_peer(code, reader.retry_delay()));
    }
    let actual = reader.seq_no().ok_or(PairingError::MissingTag(Tag::SeqNo))?;
    if actual != expected_seq {
        return Err(PairingError::UnexpectedSeqNo {
            expected: expected_seq,
            actual,
        });
    }
    Ok(())
}
