//! Ed25519 identity keys and X25519 session key agreement

use ed25519_dalek::{Signer, Verifier};
use zeroize::Zeroize;

use super::{lengths, CryptoError};

/// Ed25519 key pair used as the long-term pairing identity
pub struct Ed25519KeyPair {
    signing_key: ed25519_dalek::SigningKey,
}

impl Ed25519KeyPair {
    /// Generate a fresh key pair
    #[must_use]
    pub fn generate() -> Self {
        use rand::rngs::OsRng;
        Self {
            signing_key: ed25519_dalek::SigningKey::generate(&mut OsRng),
        }
    }

    /// Rebuild a key pair from a stored 32-byte seed
    ///
    /// # Errors
    ///
    /// Returns an error if `seed` is not 32 bytes.
    pub fn from_seed(seed: &[u8]) -> Result<Self, CryptoError> {
        let seed: [u8; 32] = seed.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: lengths::ED25519_SEED,
            actual: seed.len(),
        })?;
        Ok(Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(&seed),
        })
    }

    /// The 32-byte seed, for credential storage
    #[must_use]
    pub fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// The public half
    #[must_use]
    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    /// Sign a message
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

/// Ed25519 public key for signature verification
#[derive(Clone)]
pub struct Ed25519PublicKey {
    verifying_key: ed25519_dalek::VerifyingKey,
}

impl Ed25519PublicKey {
    /// Parse from 32 bytes
    ///
    /// # Errors
    ///
    /// Returns an error on wrong length or an off-curve point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: lengths::ED25519_PUBLIC_KEY,
            actual: bytes.len(),
        })?;
        let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { verifying_key })
    }

    /// Public key bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.verifying_key.as_bytes()
    }

    /// Verify a 64-byte signature over `message`
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidSignature` on any mismatch.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let signature = ed25519_dalek::Signature::from_slice(signature)
            .map_err(|_| CryptoError::InvalidSignature)?;
        self.verifying_key
            .verify(message, &signature)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

/// Ephemeral X25519 key pair for pair-verify
pub struct X25519KeyPair {
    secret: x25519_dalek::StaticSecret,
    public: x25519_dalek::PublicKey,
}

impl X25519KeyPair {
    /// Generate a fresh ephemeral key pair
    #[must_use]
    pub fn generate() -> Self {
        use rand::rngs::OsRng;
        let secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
        let public = x25519_dalek::PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Our public key bytes
    #[must_use]
    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Agree on a shared secret with the peer's public key bytes
    ///
    /// # Errors
    ///
    /// Returns an error if `peer_public` is not 32 bytes.
    pub fn diffie_hellman(&self, peer_public: &[u8]) -> Result<SharedSecret, CryptoError> {
        let peer: [u8; 32] =
            peer_public
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: lengths::X25519_PUBLIC_KEY,
                    actual: peer_public.len(),
                })?;
        let shared = self.secret.diffie_hellman(&x25519_dalek::PublicKey::from(peer));
        Ok(SharedSecret {
            bytes: shared.to_bytes(),
        })
    }
}

/// X25519 shared secret; zeroized on drop
pub struct SharedSecret {
    bytes: [u8; 32],
}

impl SharedSecret {
    /// Shared secret bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}
