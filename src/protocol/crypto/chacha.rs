use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305 as ChaChaImpl, Nonce as ChaChaNonce,
};

use super::{lengths, CryptoError};

/// 12-byte nonce for ChaCha20-Poly1305
#[derive(Clone, Copy)]
pub struct Nonce([u8; 12]);

impl Nonce {
    /// Nonce from a 64-bit counter
    ///
    /// The counter occupies the low 8 bytes little-endian; the high 4
    /// bytes stay zero. Counter 5 yields `05 00 00 00 00 00 00 00 00 00
    /// 00 00`.
    #[must_use]
    pub fn from_counter(counter: u64) -> Self {
        let mut arr = [0u8; 12];
        arr[..8].copy_from_slice(&counter.to_le_bytes());
        Self(arr)
    }

    /// Nonce from an explicit label such as `PS-Msg05`
    ///
    /// Labels shorter than 12 bytes are left-padded with zeroes (pad on
    /// the high side): `PV-Msg02` yields `00 00 00 00 50 56 2D 4D 73 67
    /// 30 32`.
    ///
    /// # Errors
    ///
    /// Returns an error if the label exceeds 12 bytes.
    pub fn from_label(label: &[u8]) -> Result<Self, CryptoError> {
        if label.len() > lengths::CHACHA_NONCE {
            return Err(CryptoError::InvalidKeyLength {
                expected: lengths::CHACHA_NONCE,
                actual: label.len(),
            });
        }
        let mut arr = [0u8; 12];
        arr[12 - label.len()..].copy_from_slice(label);
        Ok(Self(arr))
    }

    /// Get as bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

/// ChaCha20-Poly1305 AEAD cipher
pub struct ChaCha20Poly1305Cipher {
    cipher: ChaChaImpl,
}

impl ChaCha20Poly1305Cipher {
    /// Create a cipher from a 32-byte key
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let cipher =
            ChaChaImpl::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
                expected: lengths::CHACHA_KEY,
                actual: key.len(),
            })?;
        Ok(Self { cipher })
    }

    /// Seal plaintext; the 16-byte tag is appended to the ciphertext
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::EncryptionFailed` if sealing fails.
    pub fn seal(&self, nonce: &Nonce, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .encrypt(
                ChaChaNonce::from_slice(&nonce.0),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Open ciphertext-with-tag and verify its authentication tag
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::DecryptionFailed` on tag mismatch.
    pub fn open(&self, nonce: &Nonce, aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .decrypt(
                ChaChaNonce::from_slice(&nonce.0),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}
