use thiserror::Error;

use crate::pairing::PairingError;
use crate::protocol::crypto::CryptoError;
use crate::protocol::CodecError;
use crate::transport::TransportError;

/// Errors that can occur while talking to a Companion device
#[derive(Debug, Error)]
pub enum CompanionError {
    /// Malformed OPACK/TLV8/bplist input
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// ECDH/signature/AEAD failure; pairing aborts
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Pairing failed, locally or as reported by the peer
    #[error("pairing error: {0}")]
    Pairing(#[from] PairingError),

    /// Socket-level failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Deadline expired awaiting a reply
    #[error("timed out waiting for {operation}")]
    Timeout {
        /// What was being awaited (command identifier or pairing frame)
        operation: String,
    },

    /// The connection closed while an operation was pending
    #[error("connection lost")]
    ConnectionLost,

    /// Unexpected reply shape (missing field, wrong message type, ...)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Credential string was not four colon-separated hex tokens
    #[error("invalid credential string: {0}")]
    InvalidCredentials(String),
}

impl CompanionError {
    /// Check if this error indicates the connection is gone
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost
                | Self::Transport(TransportError::Closed | TransportError::NotConnected)
        )
    }

    /// Check if this error is worth retrying on a fresh connection
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::ConnectionLost | Self::Transport(TransportError::Io(_))
        )
    }
}

/// Result type alias for Companion operations
pub type Result<T> = std::result::Result<T, CompanionError>;
