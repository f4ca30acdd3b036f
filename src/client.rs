//! Public façade
//!
//! Thin orchestration over the pairing carriers, the connection cache
//! and the session layer; all the protocol logic lives below.

use std::sync::Arc;

use tracing::debug;

use crate::dispatch::Dispatcher;
use crate::error::{CompanionError, Result};
use crate::pairing::{AirPlayPairing, CompanionPairing, HapCredentials, PairSetup};
use crate::session::CompanionSession;
use crate::transport::{Connection, ConnectionCache};
use crate::types::{ClientConfig, DeviceRecord};

/// Entry point for pairing with and controlling one device
pub struct CompanionClient {
    device: DeviceRecord,
    config: ClientConfig,
}

impl CompanionClient {
    /// Create a client with default configuration
    #[must_use]
    pub fn new(device: DeviceRecord) -> Self {
        Self::with_config(device, ClientConfig::default())
    }

    /// Create a client with explicit configuration
    #[must_use]
    pub fn with_config(device: DeviceRecord, config: ClientConfig) -> Self {
        Self { device, config }
    }

    /// The device this client talks to
    #[must_use]
    pub fn device(&self) -> &DeviceRecord {
        &self.device
    }

    /// Start AirPlay pairing; the device shows its PIN
    ///
    /// Call [`AirPlayPairing::finish`] with the PIN to obtain
    /// credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the AirPlay endpoints are unreachable or
    /// refuse the handshake.
    pub async fn pair_airplay(&self) -> Result<AirPlayPairing> {
        AirPlayPairing::begin(&self.device, Some(self.config.name.clone())).await
    }

    /// Start Companion pairing; the device shows its PIN
    ///
    /// # Errors
    ///
    /// Returns an error if the Companion port is unreachable or the
    /// device refuses the handshake.
    pub async fn pair_companion(&self) -> Result<CompanionPairingHandle> {
        let connection = self.obtain_connection().await?;
        let dispatcher = Dispatcher::attach(
            Arc::clone(&connection),
            self.config.operation_timeout,
        );
        let setup = CompanionPairing::begin_setup(&dispatcher, Some(self.config.name.clone()))
            .await?;

        Ok(CompanionPairingHandle {
            dispatcher,
            setup,
            device: self.device.clone(),
            config: self.config.clone(),
        })
    }

    /// Open an authenticated session with stored credentials
    ///
    /// Runs pair-verify, installs the channel keys, and drives the
    /// mandatory startup sequence before returning.
    ///
    /// # Errors
    ///
    /// Returns an error on connect failure, verification failure, or a
    /// rejected startup command.
    pub async fn connect(&self, credentials: &HapCredentials) -> Result<CompanionSession> {
        let connection = self.obtain_connection().await?;
        CompanionSession::establish(connection, credentials, self.config.clone()).await
    }

    /// Reuse a cached pairing connection when one is still warm
    async fn obtain_connection(&self) -> Result<Arc<Connection>> {
        if let Some(cached) =
            ConnectionCache::checkout(&self.device.address, self.device.companion_port)
        {
            debug!(device = %self.device.name, "reusing cached connection");
            return Ok(cached);
        }

        let addr = self.device.companion_addr();
        let connection = tokio::time::timeout(self.config.connection_timeout, Connection::open(&addr))
            .await
            .map_err(|_| CompanionError::Timeout {
                operation: format!("connect to {addr}"),
            })??;
        Ok(Arc::new(connection))
    }
}

/// An in-flight Companion pairing, waiting on the on-screen PIN
pub struct CompanionPairingHandle {
    dispatcher: Arc<Dispatcher>,
    setup: PairSetup,
    device: DeviceRecord,
    config: ClientConfig,
}

impl CompanionPairingHandle {
    /// Complete pairing with the PIN shown on screen
    ///
    /// On success the connection is parked in the idle cache so the
    /// verify phase that usually follows can reuse the socket.
    ///
    /// # Errors
    ///
    /// Returns a pairing error; a wrong PIN surfaces as the peer's
    /// `AuthenticationFailed`.
    pub async fn finish(self, pin: &str) -> Result<HapCredentials> {
        let credentials =
            CompanionPairing::finish_setup(&self.dispatcher, self.setup, pin).await?;

        ConnectionCache::release(
            &self.device.address,
            self.device.companion_port,
            Arc::clone(self.dispatcher.connection()),
            self.config.idle_ttl,
        );

        Ok(credentials)
    }
}
