//! Pair-verify: per-connection authentication with stored credentials
//!
//! Ephemeral X25519 exchange, mutual Ed25519 signatures over the
//! ephemeral keys and identifiers, then HKDF of the channel keys.

use tracing::debug;

use super::{check_reply, HapCredentials, PairingError};
use crate::protocol::crypto::{
    ChaCha20Poly1305Cipher, Ed25519KeyPair, Ed25519PublicKey, HkdfSha512, Nonce, SessionKeys,
    X25519KeyPair,
};
use crate::protocol::tlv::{Tag, TlvReader, TlvWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Init,
    AwaitingChallenge,
    AwaitingConfirm,
    Complete,
}

/// Pair-verify session
pub struct PairVerify {
    stage: Stage,
    credentials: HapCredentials,
    ephemeral: X25519KeyPair,
    shared_secret: Vec<u8>,
}

impl PairVerify {
    /// Create a session from stored credentials
    #[must_use]
    pub fn new(credentials: HapCredentials) -> Self {
        Self {
            stage: Stage::Init,
            credentials,
            ephemeral: X25519KeyPair::generate(),
            shared_secret: Vec::new(),
        }
    }

    /// First message: our ephemeral public key
    ///
    /// # Errors
    ///
    /// Returns an error if called out of order.
    pub fn start_message(&mut self) -> Result<Vec<u8>, PairingError> {
        if self.stage != Stage::Init {
            return Err(PairingError::OutOfOrder("start_message"));
        }
        self.stage = Stage::AwaitingChallenge;
        Ok(TlvWriter::new()
            .add_u8(Tag::SeqNo, 1)
            .add(Tag::PublicKey, &self.ephemeral.public_bytes())
            .build())
    }

    /// Process the SeqNo 2 challenge and produce SeqNo 3
    ///
    /// Checks that the accessory is the one we paired with and that its
    /// signature covers both ephemeral keys, then answers with our own
    /// signed identity.
    ///
    /// # Errors
    ///
    /// Returns `IdentifierMismatch` for a different accessory, or a
    /// crypto error for a bad signature.
    pub fn handle_challenge(&mut self, reply: &[u8]) -> Result<Vec<u8>, PairingError> {
        if self.stage != Stage::AwaitingChallenge {
            return Err(PairingError::OutOfOrder("handle_challenge"));
        }
        let tlv = TlvReader::parse(reply)?;
        check_reply(&tlv, 2)?;

        let session_pub = tlv
            .get(Tag::PublicKey)
            .ok_or(PairingError::MissingTag(Tag::PublicKey))?
            .to_vec();
        let sealed = tlv
            .get(Tag::EncryptedData)
            .ok_or(PairingError::MissingTag(Tag::EncryptedData))?;

        let shared = self.ephemeral.diffie_hellman(&session_pub)?;
        let hkdf = HkdfSha512::new(Some(b"Pair-Verify-Encrypt-Salt"), shared.as_bytes());
        let verify_key = hkdf.expand_fixed::<32>(b"Pair-Verify-Encrypt-Info")?;
        let cipher = ChaCha20Poly1305Cipher::new(&verify_key)?;

        let plain = cipher.open(&Nonce::from_label(b"PV-Msg02")?, b"", sealed)?;
        let inner = TlvReader::parse(&plain)?;
        let identifier = inner
            .get(Tag::Identifier)
            .ok_or(PairingError::MissingTag(Tag::Identifier))?;
        let signature = inner
            .get(Tag::Signature)
            .ok_or(PairingError::MissingTag(Tag::Signature))?;

        if identifier != self.credentials.atv_id {
            return Err(PairingError::IdentifierMismatch);
        }

        let mut signed = session_pub.clone();
        signed.extend_from_slice(identifier);
        signed.extend_from_slice(&self.ephemeral.public_bytes());
        Ed25519PublicKey::from_bytes(&self.credentials.ltpk)?.verify(&signed, signature)?;

        // Our turn: sign verifyPublic || clientId || sessionPubKey
        let mut device_info = self.ephemeral.public_bytes().to_vec();
        device_info.extend_from_slice(&self.credentials.client_id);
        device_info.extend_from_slice(&session_pub);
        let our_signature =
            Ed25519KeyPair::from_seed(&self.credentials.ltsk)?.sign(&device_info);

        let inner = TlvWriter::new()
            .add(Tag::Identifier, &self.credentials.client_id)
            .add(Tag::Signature, &our_signature)
            .build();
        let sealed = cipher.seal(&Nonce::from_label(b"PV-Msg03")?, b"", &inner)?;

        self.shared_secret = shared.as_bytes().to_vec();
        self.stage = Stage::AwaitingConfirm;

        Ok(TlvWriter::new()
            .add_u8(Tag::SeqNo, 3)
            .add(Tag::EncryptedData, &sealed)
            .build())
    }

    /// Process the (empty) SeqNo 4 reply and derive the channel keys
    ///
    /// # Errors
    ///
    /// Returns an error if the peer reported a failure.
    pub fn finish(&mut self, reply: &[u8]) -> Result<SessionKeys, PairingError> {
        if self.stage != Stage::AwaitingConfirm {
            return Err(PairingError::OutOfOrder("finish"));
        }
        let tlv = TlvReader::parse(reply)?;
        check_reply(&tlv, 4)?;

        let keys = SessionKeys::derive(&self.shared_secret)?;
        debug!("pair-verify complete, channel keys derived");
        self.stage = Stage::Complete;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> (HapCredentials, Ed25519KeyPair) {
        let device_identity = Ed25519KeyPair::generate();
        let ours = Ed25519KeyPair::generate();
        let creds = HapCredentials {
            ltpk: device_identity.public_key().as_bytes().to_vec(),
            ltsk: ours.seed().to_vec(),
            atv_id: b"11:22:33:44:55:66".to_vec(),
            client_id: HapCredentials::new_client_id(),
        };
        (creds, device_identity)
    }

    /// Drive the device side of step 2 for a given client message
    fn device_challenge(
        client_m1: &[u8],
        device_identity: &Ed25519KeyPair,
        atv_id: &[u8],
    ) -> (Vec<u8>, Vec<u8>, X25519KeyPair) {
        let tlv = TlvReader::parse(client_m1).unwrap();
        let client_pub = tlv.get(Tag::PublicKey).unwrap().to_vec();

        let session = X25519KeyPair::generate();
        let shared = session.diffie_hellman(&client_pub).unwrap();

        let mut signed = session.public_bytes().to_vec();
        signed.extend_from_slice(atv_id);
        signed.extend_from_slice(&client_pub);
        let signature = device_identity.sign(&signed);

        let inner = TlvWriter::new()
            .add(Tag::Identifier, atv_id)
            .add(Tag::Signature, &signature)
            .build();

        let hkdf = HkdfSha512::new(Some(b"Pair-Verify-Encrypt-Salt"), shared.as_bytes());
        let key = hkdf.expand_fixed::<32>(b"Pair-Verify-Encrypt-Info").unwrap();
        let cipher = ChaCha20Poly1305Cipher::new(&key).unwrap();
        let sealed = cipher
            .seal(&Nonce::from_label(b"PV-Msg02").unwrap(), b"", &inner)
            .unwrap();

        let m2 = TlvWriter::new()
            .add_u8(Tag::SeqNo, 2)
            .add(Tag::PublicKey, &session.public_bytes())
            .add(Tag::EncryptedData, &sealed)
            .build();

        (m2, shared.as_bytes().to_vec(), session)
    }

    #[test]
    fn test_full_verify_against_mock_device() {
        let (creds, device_identity) = credentials();
        let atv_id = creds.atv_id.clone();
        let mut verify = PairVerify::new(creds);

        let m1 = verify.start_message().unwrap();
        let (m2, device_shared, _session) = device_challenge(&m1, &device_identity, &atv_id);

        let _m3 = verify.handle_challenge(&m2).unwrap();

        let m4 = TlvWriter::new().add_u8(Tag::SeqNo, 4).build();
        let keys = verify.finish(&m4).unwrap();

        // Device derives the mirror-image keys from the same secret
        let device_keys = SessionKeys::derive(&device_shared).unwrap();
        assert_eq!(keys.output_key, device_keys.output_key);
        assert_eq!(keys.input_key, device_keys.input_key);
    }

    #[test]
    fn test_identifier_mismatch_rejected() {
        let (creds, device_identity) = credentials();
        let mut verify = PairVerify::new(creds);

        let m1 = verify.start_message().unwrap();
        let (m2, _, _) = device_challenge(&m1, &device_identity, b"99:99:99:99:99:99");

        assert!(matches!(
            verify.handle_challenge(&m2),
            Err(PairingError::IdentifierMismatch)
        ));
    }

    #[test]
    fn test_bad_device_signature_rejected() {
        let (creds, _device_identity) = credentials();
        let atv_id = creds.atv_id.clone();
        let imposter = Ed25519KeyPair::generate();
        let mut verify = PairVerify::new(creds);

        let m1 = verify.start_message().unwrap();
        let (m2, _, _) = device_challenge(&m1, &imposter, &atv_id);

        assert!(matches!(
            verify.handle_challenge(&m2),
            Err(PairingError::Crypto(_))
        ));
    }

    #[test]
    fn test_peer_error_in_step4() {
        let (creds, device_identity) = credentials();
        let atv_id = creds.atv_id.clone();
        let mut verify = PairVerify::new(creds);

        let m1 = verify.start_message().unwrap();
        let (m2, _, _) = device_challenge(&m1, &device_identity, &atv_id);
        verify.handle_challenge(&m2).unwrap();

        let m4 = TlvWriter::new()
            .add_u8(Tag::SeqNo, 4)
            .add_u8(Tag::Error, 4)
            .build();
        assert!(matches!(
            verify.finish(&m4),
            Err(PairingError::Peer { .. })
        ));
    }
}
