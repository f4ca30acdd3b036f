//! AirPlay pair-setup carrier
//!
//! The HAP exchange rides HTTP against the device's AirPlay port:
//! `POST /pair-pin-start` makes the device show its PIN, then the TLV
//! messages go through `POST /pair-setup` on the same keep-alive
//! socket.

use tracing::debug;

use super::http::HttpConnection;
use super::{HapCredentials, PairingError, PairSetup};
use crate::error::{CompanionError, Result};
use crate::types::DeviceRecord;

const OCTET_STREAM: &str = "application/octet-stream";

/// An in-flight AirPlay pairing
///
/// Created by [`AirPlayPairing::begin`], which leaves the device
/// showing its PIN; [`finish`](AirPlayPairing::finish) completes the
/// exchange once the user has read it.
pub struct AirPlayPairing {
    http: HttpConnection,
    setup: PairSetup,
}

impl AirPlayPairing {
    /// Start pairing: the device displays its PIN after this returns
    ///
    /// # Errors
    ///
    /// Returns an error if the device refuses `/pair-pin-start` or the
    /// first TLV exchange fails.
    pub async fn begin(device: &DeviceRecord, name: Option<String>) -> Result<Self> {
        let mut http = HttpConnection::connect(&device.airplay_addr()).await?;

        let pin_start = http.post("/pair-pin-start", None, &[]).await?;
        if !pin_start.is_success() {
            return Err(PairingError::HttpStatus(pin_start.status).into());
        }

        let mut setup = PairSetup::new(name);
        let m1 = setup.start_message().map_err(CompanionError::from)?;
        let reply = http.post("/pair-setup", Some(OCTET_STREAM), &m1).await?;
        if !reply.is_success() {
            return Err(PairingError::HttpStatus(reply.status).into());
        }
        setup.absorb_salt(&reply.body).map_err(CompanionError::from)?;

        debug!(device = %device.name, "pair-pin-start accepted, awaiting PIN");
        Ok(Self { http, setup })
    }

    /// Complete pairing with the PIN shown on screen
    ///
    /// # Errors
    ///
    /// Returns a pairing error; a wrong PIN surfaces as the peer's
    /// `AuthenticationFailed`.
    pub async fn finish(mut self, pin: &str) -> Result<HapCredentials> {
        let m3 = self.setup.proof_message(pin).map_err(CompanionError::from)?;
        let reply = self.exchange(&m3).await?;

        let m5 = self
            .setup
            .handle_proof(&reply)
            .map_err(CompanionError::from)?;
        let reply = self.exchange(&m5).await?;

        let credentials = self
            .setup
            .handle_exchange(&reply)
            .map_err(CompanionError::from)?;
        debug!("AirPlay pairing complete");
        Ok(credentials)
    }

    async fn exchange(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        let reply = self
            .http
            .post("/pair-setup", Some(OCTET_STREAM), message)
            .await?;
        if !reply.is_success() {
            return Err(PairingError::HttpStatus(reply.status).into());
        }
        Ok(reply.body)
    }
}
