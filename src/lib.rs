//! # companion
//!
//! A pure Rust client library for the Apple TV Companion remote
//! protocol: HAP pairing (over AirPlay HTTP or the Companion socket),
//! an encrypted framed transport, and a session layer for remote-key,
//! media-control and text-input operations.
//!
//! ## Example
//!
//! ```rust,no_run
//! use companion::{CompanionClient, DeviceRecord, HidCommand};
//!
//! # async fn example() -> companion::Result<()> {
//! let device = DeviceRecord::new("Living Room", "192.168.1.50", 49152, 7000);
//! let client = CompanionClient::new(device);
//!
//! // First time: pair with the PIN the device displays
//! let pairing = client.pair_airplay().await?;
//! let credentials = pairing.finish("1234").await?;
//! println!("store this: {credentials}");
//!
//! // Every time after: connect and drive the device
//! let session = client.connect(&credentials).await?;
//! session.press_key(HidCommand::Select).await?;
//! session.set_text("search term").await?;
//! session.disconnect();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
/// Error types
pub mod error;
/// Core value types
pub mod types;

// Protocol stack, bottom up
pub mod dispatch;
pub mod pairing;
pub mod protocol;
pub mod session;
pub mod transport;

mod client;

// Re-exports
pub use client::{CompanionClient, CompanionPairingHandle};
pub use error::{CompanionError, Result};
pub use pairing::{AirPlayPairing, HapCredentials};
pub use session::{CompanionSession, FocusState, FocusWatcher, HidCommand, MediaCommand};
pub use types::{ClientConfig, DeviceRecord};
