//! Companion-carried pairing
//!
//! The same TLV state machines as the HTTP carrier, but the messages
//! ride OPACK maps inside `PS_*`/`PV_*` frames on the Companion socket
//! and replies come back through the dispatcher's auth table.

use std::sync::Arc;

use tracing::debug;

use super::{HapCredentials, PairSetup, PairVerify};
use crate::dispatch::Dispatcher;
use crate::error::{CompanionError, Result};
use crate::protocol::crypto::SessionKeys;
use crate::protocol::frame::FrameType;
use crate::protocol::opack::{Dict, Value};

/// Pairing flows over an open Companion connection
pub struct CompanionPairing;

impl CompanionPairing {
    /// Run pair-verify and return the channel keys
    ///
    /// # Errors
    ///
    /// Returns a pairing error on identifier or signature mismatch, or
    /// a timeout if the device stops responding.
    pub async fn pair_verify(
        dispatcher: &Arc<Dispatcher>,
        credentials: &HapCredentials,
    ) -> Result<SessionKeys> {
        let mut verify = PairVerify::new(credentials.clone());

        let m1 = verify.start_message().map_err(CompanionError::from)?;
        let reply = Self::exchange(dispatcher, FrameType::PvStart, &m1, verify_content).await?;

        let m3 = verify
            .handle_challenge(&reply)
            .map_err(CompanionError::from)?;
        let reply = Self::exchange(dispatcher, FrameType::PvNext, &m3, verify_content).await?;

        let keys = verify.finish(&reply).map_err(CompanionError::from)?;
        debug!("companion pair-verify complete");
        Ok(keys)
    }

    /// Drive pair-setup up to the PIN prompt
    ///
    /// # Errors
    ///
    /// Returns a pairing error if the device refuses the handshake.
    pub async fn begin_setup(
        dispatcher: &Arc<Dispatcher>,
        name: Option<String>,
    ) -> Result<PairSetup> {
        let mut setup = PairSetup::new(name);
        let m1 = setup.start_message().map_err(CompanionError::from)?;
        let reply = Self::exchange(dispatcher, FrameType::PsStart, &m1, setup_content).await?;
        setup.absorb_salt(&reply).map_err(CompanionError::from)?;
        debug!("companion pair-setup started, awaiting PIN");
        Ok(setup)
    }

    /// Finish pair-setup with the on-screen PIN
    ///
    /// # Errors
    ///
    /// Returns a pairing error; a wrong PIN surfaces as the peer's
    /// `AuthenticationFailed`.
    pub async fn finish_setup(
        dispatcher: &Arc<Dispatcher>,
        mut setup: PairSetup,
        pin: &str,
    ) -> Result<HapCredentials> {
        let m3 = setup.proof_message(pin).map_err(CompanionError::from)?;
        let reply = Self::exchange(dispatcher, FrameType::PsNext, &m3, setup_content).await?;

        let m5 = setup.handle_proof(&reply).map_err(CompanionError::from)?;
        let reply = Self::exchange(dispatcher, FrameType::PsNext, &m5, setup_content).await?;

        let credentials = setup
            .handle_exchange(&reply)
            .map_err(CompanionError::from)?;
        debug!("companion pair-setup complete");
        Ok(credentials)
    }

    async fn exchange(
        dispatcher: &Arc<Dispatcher>,
        frame_type: FrameType,
        tlv: &[u8],
        wrap: fn(&[u8]) -> Value,
    ) -> Result<Vec<u8>> {
        let reply = dispatcher.exchange_auth(frame_type, wrap(tlv)).await?;
        reply
            .as_dict()
            .and_then(|dict| dict.get("_pd"))
            .and_then(Value::as_bytes)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| CompanionError::Protocol("auth reply without _pd".to_string()))
    }
}

/// Pair-setup payload envelope: `{_pd, _pwTy: 1}` (PIN pairing)
fn setup_content(tlv: &[u8]) -> Value {
    Value::Dict(
        Dict::new()
            .entry("_pd", tlv.to_vec())
            .entry("_pwTy", 1u64),
    )
}

/// Pair-verify payload envelope: `{_pd, _auTy: 4}`
fn verify_content(tlv: &[u8]) -> Value {
    Value::Dict(
        Dict::new()
            .entry("_pd", tlv.to_vec())
            .entry("_auTy", 4u64),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_envelope_shape() {
        let value = setup_content(&[0x00, 0x01, 0x00, 0x06, 0x01, 0x01]);
        let dict = value.as_dict().unwrap();
        assert_eq!(
            dict.get("_pd").and_then(Value::as_bytes),
            Some(&[0x00u8, 0x01, 0x00, 0x06, 0x01, 0x01][..])
        );
        assert_eq!(dict.get("_pwTy").and_then(Value::as_u64), Some(1));
    }

    #[test]
    fn test_verify_envelope_shape() {
        let value = verify_content(&[0x06, 0x01, 0x01]);
        let dict = value.as_dict().unwrap();
        assert_eq!(dict.get("_auTy").and_then(Value::as_u64), Some(4));
    }
}
