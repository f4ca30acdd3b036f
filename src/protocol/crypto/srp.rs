//! SRP-6a client over the RFC 5054 3072-bit group with SHA-512
//!
//! The private exponent is supplied by the caller rather than sampled
//! here: pair-setup deliberately reuses the freshly generated Ed25519
//! seed as `a`, and the peer expects exactly that.

use sha2::Sha512;
use zeroize::Zeroize;

use super::CryptoError;

/// SRP client holding the private ephemeral until the proof stage
pub struct SrpClient {
    inner: srp::client::SrpClient<'static, Sha512>,
    private_key: Vec<u8>,
    public_key: Vec<u8>,
}

impl Drop for SrpClient {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

impl SrpClient {
    /// Create a client with a caller-supplied private exponent
    #[must_use]
    pub fn with_private_key(private_key: &[u8]) -> Self {
        let inner = srp::client::SrpClient::<Sha512>::new(&srp::groups::G_3072);
        let public_key = inner.compute_public_ephemeral(private_key);
        Self {
            inner,
            private_key: private_key.to_vec(),
            public_key,
        }
    }

    /// Our public ephemeral `A`
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Process the server's salt and public ephemeral `B`
    ///
    /// # Errors
    ///
    /// Returns an error if `B` is invalid (e.g. `B mod N == 0`).
    pub fn process_challenge(
        &self,
        username: &[u8],
        password: &[u8],
        salt: &[u8],
        server_public: &[u8],
    ) -> Result<SrpVerifier, CryptoError> {
        let verifier = self
            .inner
            .process_reply(&self.private_key, username, password, salt, server_public)
            .map_err(|e| CryptoError::SrpError(e.to_string()))?;
        Ok(SrpVerifier { inner: verifier })
    }
}

/// Holds the proof and session key after the challenge is processed
pub struct SrpVerifier {
    inner: srp::client::SrpClientVerifier<Sha512>,
}

impl SrpVerifier {
    /// Our proof `M1`
    #[must_use]
    pub fn proof(&self) -> &[u8] {
        self.inner.proof()
    }

    /// Check the server's proof `M2`
    ///
    /// # Errors
    ///
    /// Returns an error if the proof does not match; with a wrong PIN
    /// the peer never gets this far and reports its own failure first.
    pub fn verify_server(&self, server_proof: &[u8]) -> Result<(), CryptoError> {
        self.inner
            .verify_server(server_proof)
            .map_err(|e| CryptoError::SrpError(e.to_string()))
    }

    /// The shared session key `K`
    #[must_use]
    pub fn session_key(&self) -> &[u8] {
        self.inner.key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use srp::server::SrpServer;

    #[test]
    fn test_full_exchange_against_server() {
        let username = b"Pair-Setup";
        let password = b"1234";
        let salt = [0x5Au8; 16];

        let client = SrpClient::with_private_key(&[0x11u8; 32]);
        let verifier_v = srp::client::SrpClient::<Sha512>::new(&srp::groups::G_3072)
            .compute_verifier(username, password, &salt);

        let server = SrpServer::<Sha512>::new(&srp::groups::G_3072);
        let b = [0x22u8; 32];
        let b_pub = server.compute_public_ephemeral(&b, &verifier_v);

        let client_verifier = client
            .process_challenge(username, password, &salt, &b_pub)
            .unwrap();

        let server_verifier = server
            .process_reply(&b, &verifier_v, client.public_key())
            .unwrap();
        server_verifier.verify_client(client_verifier.proof()).unwrap();
        client_verifier.verify_server(server_verifier.proof()).unwrap();

        assert_eq!(client_verifier.session_key(), server_verifier.key());
    }

    #[test]
    fn test_wrong_pin_rejected_by_server() {
        let username = b"Pair-Setup";
        let salt = [0x5Au8; 16];

        let client = SrpClient::with_private_key(&[0x11u8; 32]);
        let verifier_v = srp::client::SrpClient::<Sha512>::new(&srp::groups::G_3072)
            .compute_verifier(username, b"1234", &salt);

        let server = SrpServer::<Sha512>::new(&srp::groups::G_3072);
        let b = [0x22u8; 32];
        let b_pub = server.compute_public_ephemeral(&b, &verifier_v);

        let client_verifier = client
            .process_challenge(username, b"9999", &salt, &b_pub)
            .unwrap();
        let server_verifier = server
            .process_reply(&b, &verifier_v, client.public_key())
            .unwrap();
        assert!(server_verifier.verify_client(client_verifier.proof()).is_err());
    }

    #[test]
    fn test_deterministic_public_key() {
        let a = SrpClient::with_private_key(&[7u8; 32]);
        let b = SrpClient::with_private_key(&[7u8; 32]);
        assert_eq!(a.public_key(), b.public_key());
    }
}
