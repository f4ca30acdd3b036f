use thiserror::Error;

/// Cryptographic operation errors
///
/// These are terminal for the handshake that hit them.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A key or nonce had the wrong length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected byte count
        expected: usize,
        /// Actual byte count
        actual: usize,
    },

    /// A signature failed to parse or verify
    #[error("invalid signature")]
    InvalidSignature,

    /// A public key failed to parse
    #[error("invalid public key")]
    InvalidPublicKey,

    /// AEAD sealing failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD opening failed (bad key, nonce, or tampered data)
    #[error("decryption failed")]
    DecryptionFailed,

    /// HKDF expansion failed
    #[error("key derivation failed")]
    KeyDerivationFailed,

    /// SRP processing failed
    #[error("SRP error: {0}")]
    SrpError(String),
}
