//! Pair-setup: PIN-based pairing over SRP-6a
//!
//! Establishes long-term keys with a device showing a PIN on screen.
//! The machine is split around the PIN prompt: `start_message` and
//! `absorb_salt` run before the user has typed anything, the remaining
//! steps need the PIN.

use tracing::debug;

use super::{check_reply, HapCredentials, PairingError};
use crate::protocol::crypto::{
    ChaCha20Poly1305Cipher, Ed25519KeyPair, HkdfSha512, Nonce, SrpClient, SrpVerifier,
};
use crate::protocol::opack::{self, Dict, Value};
use crate::protocol::tlv::{Tag, TlvReader, TlvWriter};

const USERNAME: &[u8] = b"Pair-Setup";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Init,
    AwaitingSalt,
    AwaitingPin,
    AwaitingProof,
    AwaitingExchange,
    Complete,
}

/// Pair-setup session
pub struct PairSetup {
    stage: Stage,
    /// Long-term identity; its seed doubles as the SRP private
    /// exponent, which the peer expects
    identity: Ed25519KeyPair,
    client_id: Vec<u8>,
    name: Option<String>,
    salt: Vec<u8>,
    server_public: Vec<u8>,
    verifier: Option<SrpVerifier>,
    session_key: Vec<u8>,
    atv_id: Vec<u8>,
    atv_ltpk: Vec<u8>,
}

impl Default for PairSetup {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PairSetup {
    /// Create a new session, generating a fresh identity
    #[must_use]
    pub fn new(name: Option<String>) -> Self {
        Self {
            stage: Stage::Init,
            identity: Ed25519KeyPair::generate(),
            client_id: HapCredentials::new_client_id(),
            name,
            salt: Vec::new(),
            server_public: Vec::new(),
            verifier: None,
            session_key: Vec::new(),
            atv_id: Vec::new(),
            atv_ltpk: Vec::new(),
        }
    }

    /// First message: request pair-setup (the device shows its PIN)
    ///
    /// # Errors
    ///
    /// Returns an error if called out of order.
    pub fn start_message(&mut self) -> Result<Vec<u8>, PairingError> {
        if self.stage != Stage::Init {
            return Err(PairingError::OutOfOrder("start_message"));
        }
        self.stage = Stage::AwaitingSalt;
        Ok(TlvWriter::new()
            .add_u8(Tag::Method, 0)
            .add_u8(Tag::SeqNo, 1)
            .build())
    }

    /// Absorb the salt and server public key from the SeqNo 2 reply
    ///
    /// # Errors
    ///
    /// Returns an error on peer errors, a wrong sequence number, or
    /// missing fields.
    pub fn absorb_salt(&mut self, reply: &[u8]) -> Result<(), PairingError> {
        if self.stage != Stage::AwaitingSalt {
            return Err(PairingError::OutOfOrder("absorb_salt"));
        }
        let tlv = TlvReader::parse(reply)?;
        check_reply(&tlv, 2)?;

        self.salt = tlv
            .get(Tag::Salt)
            .ok_or(PairingError::MissingTag(Tag::Salt))?
            .to_vec();
        self.server_public = tlv
            .get(Tag::PublicKey)
            .ok_or(PairingError::MissingTag(Tag::PublicKey))?
            .to_vec();

        debug!(salt_len = self.salt.len(), "absorbed pair-setup salt");
        self.stage = Stage::AwaitingPin;
        Ok(())
    }

    /// Run SRP with the PIN and produce the SeqNo 3 message
    ///
    /// The PIN goes in as its decimal ASCII rendering, exactly as the
    /// device displays it.
    ///
    /// # Errors
    ///
    /// Returns an error if SRP rejects the server's public key.
    pub fn proof_message(&mut self, pin: &str) -> Result<Vec<u8>, PairingError> {
        if self.stage != Stage::AwaitingPin {
            return Err(PairingError::OutOfOrder("proof_message"));
        }

        let srp = SrpClient::with_private_key(&self.identity.seed());
        let verifier =
            srp.process_challenge(USERNAME, pin.as_bytes(), &self.salt, &self.server_public)?;

        let message = TlvWriter::new()
            .add_u8(Tag::SeqNo, 3)
            .add(Tag::PublicKey, srp.public_key())
            .add(Tag::Proof, verifier.proof())
            .build();

        self.verifier = Some(verifier);
        self.stage = Stage::AwaitingProof;
        Ok(message)
    }

    /// Check the server proof from SeqNo 4 and produce SeqNo 5
    ///
    /// # Errors
    ///
    /// Returns an error if the server proof does not match (wrong PIN
    /// paths usually surface as a peer error TLV instead).
    pub fn handle_proof(&mut self, reply: &[u8]) -> Result<Vec<u8>, PairingError> {
        if self.stage != Stage::AwaitingProof {
            return Err(PairingError::OutOfOrder("handle_proof"));
        }
        let tlv = TlvReader::parse(reply)?;
        check_reply(&tlv, 4)?;

        let server_proof = tlv
            .get(Tag::Proof)
            .ok_or(PairingError::MissingTag(Tag::Proof))?;
        let verifier = self
            .verifier
            .take()
            .ok_or(PairingError::OutOfOrder("handle_proof"))?;
        verifier.verify_server(server_proof)?;
        self.session_key = verifier.session_key().to_vec();

        // Long-term identity exchange, sealed under the SRP session key
        let hkdf = HkdfSha512::new(Some(b"Pair-Setup-Encrypt-Salt"), &self.session_key);
        let encrypt_key = hkdf.expand_fixed::<32>(b"Pair-Setup-Encrypt-Info")?;

        let sign_hkdf = HkdfSha512::new(Some(b"Pair-Setup-Controller-Sign-Salt"), &self.session_key);
        let mut signed_data = sign_hkdf
            .expand_fixed::<32>(b"Pair-Setup-Controller-Sign-Info")?
            .to_vec();
        signed_data.extend_from_slice(&self.client_id);
        signed_data.extend_from_slice(self.identity.public_key().as_bytes());
        let signature = self.identity.sign(&signed_data);

        let mut inner = TlvWriter::new()
            .add(Tag::Identifier, &self.client_id)
            .add(Tag::PublicKey, self.identity.public_key().as_bytes())
            .add(Tag::Signature, &signature);
        if let Some(name) = &self.name {
            let opack_name = opack::pack(&Value::Dict(Dict::new().entry("name", name.as_str())));
            inner = inner.add(Tag::Name, &opack_name);
        }

        let cipher = ChaCha20Poly1305Cipher::new(&encrypt_key)?;
        let sealed = cipher.seal(&Nonce::from_label(b"PS-Msg05")?, b"", &inner.build())?;

        self.stage = Stage::AwaitingExchange;
        Ok(TlvWriter::new()
            .add_u8(Tag::SeqNo, 5)
            .add(Tag::EncryptedData, &sealed)
            .build())
    }

    /// Decrypt the SeqNo 6 reply and assemble the credentials
    ///
    /// # Errors
    ///
    /// Returns an error if decryption fails or fields are missing.
    pub fn handle_exchange(&mut self, reply: &[u8]) -> Result<HapCredentials, PairingError> {
        if self.stage != Stage::AwaitingExchange {
            return Err(PairingError::OutOfOrder("handle_exchange"));
        }
        let tlv = TlvReader::parse(reply)?;
        check_reply(&tlv, 6)?;

        let sealed = tlv
            .get(Tag::EncryptedData)
            .ok_or(PairingError::MissingTag(Tag::EncryptedData))?;

        let hkdf = HkdfSha512::new(Some(b"Pair-Setup-Encrypt-Salt"), &self.session_key);
        let decrypt_key = hkdf.expand_fixed::<32>(b"Pair-Setup-Encrypt-Info")?;
        let cipher = ChaCha20Poly1305Cipher::new(&decrypt_key)?;
        let plain = cipher.open(&Nonce::from_label(b"PS-Msg06")?, b"", sealed)?;

        let device = TlvReader::parse(&plain)?;
        self.atv_id = device
            .get(Tag::Identifier)
            .ok_or(PairingError::MissingTag(Tag::Identifier))?
            .to_vec();
        self.atv_ltpk = device
            .get(Tag::PublicKey)
            .ok_or(PairingError::MissingTag(Tag::PublicKey))?
            .to_vec();

        debug!(atv_id = ?String::from_utf8_lossy(&self.atv_id), "pair-setup complete");
        self.stage = Stage::Complete;

        Ok(HapCredentials {
            ltpk: self.atv_ltpk.clone(),
            ltsk: self.identity.seed().to_vec(),
            atv_id: self.atv_id.clone(),
            client_id: self.client_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_message_vector() {
        let mut setup = PairSetup::new(None);
        assert_eq!(
            setup.start_message().unwrap(),
            vec![0x00, 0x01, 0x00, 0x06, 0x01, 0x01]
        );
    }

    #[test]
    fn test_out_of_order() {
        let mut setup = PairSetup::new(None);
        assert!(matches!(
            setup.proof_message("1234"),
            Err(PairingError::OutOfOrder(_))
        ));
        setup.start_message().unwrap();
        assert!(matches!(
            setup.start_message(),
            Err(PairingError::OutOfOrder(_))
        ));
    }

    #[test]
    fn test_peer_error_short_circuits() {
        let mut setup = PairSetup::new(None);
        setup.start_message().unwrap();

        let reply = TlvWriter::new()
            .add_u8(Tag::SeqNo, 2)
            .add_u8(Tag::Error, 2)
            .build();
        assert!(matches!(
            setup.absorb_salt(&reply),
            Err(PairingError::Peer { .. })
        ));
    }

    #[test]
    fn test_wrong_seq_rejected() {
        let mut setup = PairSetup::new(None);
        setup.start_message().unwrap();

        let reply = TlvWriter::new()
            .add_u8(Tag::SeqNo, 4)
            .add(Tag::Salt, &[0; 16])
            .add(Tag::PublicKey, &[1; 384])
            .build();
        assert!(matches!(
            setup.absorb_salt(&reply),
            Err(PairingError::UnexpectedSeqNo {
                expected: 2,
                actual: 4
            })
        ));
    }

    #[test]
    fn test_missing_salt_rejected() {
        let mut setup = PairSetup::new(None);
        setup.start_message().unwrap();

        let reply = TlvWriter::new()
            .add_u8(Tag::SeqNo, 2)
            .add(Tag::PublicKey, &[1; 384])
            .build();
        assert!(matches!(
            setup.absorb_salt(&reply),
            Err(PairingError::MissingTag(Tag::Salt))
        ));
    }
}
