use hkdf::Hkdf;
use sha2::Sha512;

use super::CryptoError;

/// HKDF-SHA512 for key derivation
pub struct HkdfSha512 {
    hkdf: Hkdf<Sha512>,
}

impl HkdfSha512 {
    /// Create an HKDF instance from input key material
    #[must_use]
    pub fn new(salt: Option<&[u8]>, ikm: &[u8]) -> Self {
        Self {
            hkdf: Hkdf::<Sha512>::new(salt, ikm),
        }
    }

    /// Expand into a fixed-size key
    ///
    /// # Errors
    ///
    /// Returns an error if the requested length is invalid for HKDF.
    pub fn expand_fixed<const N: usize>(&self, info: &[u8]) -> Result<[u8; N], CryptoError> {
        let mut okm = [0u8; N];
        self.hkdf
            .expand(info, &mut okm)
            .map_err(|_| CryptoError::KeyDerivationFailed)?;
        Ok(okm)
    }
}

/// Channel keys derived after pair-verify
///
/// Lifetime equals the TCP connection; these are never persisted.
#[derive(Clone)]
pub struct SessionKeys {
    /// Key for frames we send
    pub output_key: [u8; 32],
    /// Key for frames the device sends
    pub input_key: [u8; 32],
}

impl SessionKeys {
    /// Derive both channel keys from the pair-verify shared secret
    ///
    /// # Errors
    ///
    /// Returns an error if HKDF expansion fails.
    pub fn derive(shared_secret: &[u8]) -> Result<Self, CryptoError> {
        let hkdf = HkdfSha512::new(None, shared_secret);
        Ok(Self {
            output_key: hkdf.expand_fixed::<32>(b"ClientEncrypt-main")?,
            input_key: hkdf.expand_fixed::<32>(b"ServerEncrypt-main")?,
        })
    }

    /// The same derivation seen from the device's side of the socket
    ///
    /// What the client sends with its output key, a peer must open with
    /// its input key; test doubles use this to mirror the channel.
    #[must_use]
    pub fn flipped(&self) -> Self {
        Self {
            output_key: self.input_key,
            input_key: self.output_key,
        }
    }
}
