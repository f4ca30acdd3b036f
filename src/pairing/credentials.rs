use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::CompanionError;

/// Durable output of pair-setup
///
/// Four byte strings: the peer's long-term Ed25519 public key, our
/// Ed25519 seed, the peer identifier, and our client identifier (a
/// canonical textual UUID stored as bytes). Serialized as four hex
/// tokens joined by `:`; the round-trip is exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HapCredentials {
    /// Peer's Ed25519 public key (32 bytes)
    pub ltpk: Vec<u8>,
    /// Our Ed25519 private seed (32 bytes)
    pub ltsk: Vec<u8>,
    /// Peer identifier
    pub atv_id: Vec<u8>,
    /// Our identifier: a UUID in canonical text form, as bytes (36)
    pub client_id: Vec<u8>,
}

impl HapCredentials {
    /// Generate a fresh client identifier for a new pairing
    #[must_use]
    pub fn new_client_id() -> Vec<u8> {
        Uuid::new_v4().to_string().into_bytes()
    }

    /// Decode the client identifier back into a UUID
    ///
    /// # Errors
    ///
    /// Returns `CompanionError::InvalidCredentials` if the stored bytes
    /// are not a canonical textual UUID.
    pub fn client_uuid(&self) -> Result<Uuid, CompanionError> {
        let text = std::str::from_utf8(&self.client_id)
            .map_err(|_| CompanionError::InvalidCredentials("client id is not UTF-8".into()))?;
        Uuid::parse_str(text)
            .map_err(|_| CompanionError::InvalidCredentials("client id is not a UUID".into()))
    }
}

impl fmt::Display for HapCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            hex::encode(&self.ltpk),
            hex::encode(&self.ltsk),
            hex::encode(&self.atv_id),
            hex::encode(&self.client_id)
        )
    }
}

impl FromStr for HapCredentials {
    type Err = CompanionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s.split(':').collect();
        let [ltpk, ltsk, atv_id, client_id] = tokens.as_slice() else {
            return Err(CompanionError::InvalidCredentials(format!(
                "expected 4 tokens, got {}",
                tokens.len()
            )));
        };

        let decode = |token: &str| {
            hex::decode(token)
                .map_err(|_| CompanionError::InvalidCredentials("bad hex token".into()))
        };

        Ok(Self {
            ltpk: decode(ltpk)?,
            ltsk: decode(ltsk)?,
            atv_id: decode(atv_id)?,
            client_id: decode(client_id)?,
        })
    }
}
