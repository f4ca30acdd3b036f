//! Authenticated Companion session
//!
//! Owns the post-verify command sequence and the remote-control,
//! media-control and text-input operations above the dispatcher.

mod hid;
mod keyboard;

pub use hid::{HidCommand, MediaCommand};
pub use keyboard::FocusState;

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::pairing::{CompanionPairing, HapCredentials};
use crate::protocol::opack::{Dict, Value};
use crate::transport::Connection;
use crate::types::ClientConfig;

const TV_REMOTE_SERVICE: &str = "com.apple.tvremoteservices";
const LONG_PRESS_HOLD: Duration = Duration::from_millis(1000);

/// Button press phases for `_hBtS`
mod button_state {
    pub const DOWN: u64 = 1;
    pub const UP: u64 = 2;
}

/// An authenticated, encrypted session with a device
pub struct CompanionSession {
    connection: Arc<Connection>,
    dispatcher: Arc<Dispatcher>,
    config: ClientConfig,
}

impl CompanionSession {
    /// Verify, install channel keys, and run the startup sequence
    ///
    /// The device rejects commands issued out of order, so the startup
    /// sequence is strict: `_systemInfo`, `_touchStart`,
    /// `_sessionStart`, `_tiStart`, then the `_iMC` subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if verification or any startup command fails.
    pub async fn establish(
        connection: Arc<Connection>,
        credentials: &HapCredentials,
        config: ClientConfig,
    ) -> Result<Self> {
        let dispatcher = Dispatcher::attach(Arc::clone(&connection), config.operation_timeout);

        let keys = CompanionPairing::pair_verify(&dispatcher, credentials).await?;
        connection.install_keys(&keys).await?;

        let session = Self {
            connection,
            dispatcher,
            config,
        };
        session.run_startup(credentials).await?;
        Ok(session)
    }

    async fn run_startup(&self, credentials: &HapCredentials) -> Result<()> {
        let client_uuid = credentials.client_uuid()?;

        let info = Dict::new()
            .entry("_idsID", client_uuid.as_bytes().to_vec())
            .entry("name", self.config.name.as_str())
            .entry("model", self.config.model.as_str());
        self.dispatcher
            .send_command("_systemInfo", Value::Dict(info))
            .await?;

        // Surface dimensions must stay float64 on the wire even though
        // the values are integral.
        let touch = Dict::new()
            .entry("_width", Value::Float64(1000.0))
            .entry("_height", Value::Float64(1000.0))
            .entry("_tFl", 0u64);
        self.dispatcher
            .send_command("_touchStart", Value::Dict(touch))
            .await?;

        let sid: u32 = rand::thread_rng().gen();
        let start = Dict::new()
            .entry("_srvT", TV_REMOTE_SERVICE)
            .entry("_sid", u64::from(sid));
        self.dispatcher
            .send_command("_sessionStart", Value::Dict(start))
            .await?;

        self.dispatcher
            .send_command("_tiStart", Value::Dict(Dict::new()))
            .await?;

        self.dispatcher.subscribe_event("_iMC").await?;

        debug!("session startup sequence complete");
        Ok(())
    }

    /// Press and release a button
    ///
    /// # Errors
    ///
    /// Returns an error if either `_hidC` command fails.
    pub async fn press_key(&self, key: HidCommand) -> Result<()> {
        self.key_press(key, Duration::ZERO).await
    }

    /// Press, hold for a second, then release
    ///
    /// # Errors
    ///
    /// Returns an error if either `_hidC` command fails.
    pub async fn long_press_key(&self, key: HidCommand) -> Result<()> {
        self.key_press(key, LONG_PRESS_HOLD).await
    }

    async fn key_press(&self, key: HidCommand, hold: Duration) -> Result<()> {
        let down = Dict::new()
            .entry("_hBtS", button_state::DOWN)
            .entry("_hidC", key.code());
        self.dispatcher
            .send_command("_hidC", Value::Dict(down))
            .await?;

        if !hold.is_zero() {
            tokio::time::sleep(hold).await;
        }

        let up = Dict::new()
            .entry("_hBtS", button_state::UP)
            .entry("_hidC", key.code());
        self.dispatcher
            .send_command("_hidC", Value::Dict(up))
            .await?;
        Ok(())
    }

    /// Send a media-control command with extra operand fields
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the command.
    pub async fn media_command(&self, command: MediaCommand, extra: Dict) -> Result<Value> {
        let mut content = Dict::new().entry("_mcc", command.code());
        for (key, value) in extra.iter() {
            content.insert(key, value.clone());
        }
        self.dispatcher
            .send_command("_mcc", Value::Dict(content))
            .await
    }

    /// Start playback
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the command.
    pub async fn play(&self) -> Result<()> {
        self.media_command(MediaCommand::Play, Dict::new()).await?;
        Ok(())
    }

    /// Pause playback
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the command.
    pub async fn pause(&self) -> Result<()> {
        self.media_command(MediaCommand::Pause, Dict::new()).await?;
        Ok(())
    }

    /// Seek by a relative number of seconds
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the command.
    pub async fn skip_by(&self, seconds: f64) -> Result<()> {
        self.media_command(MediaCommand::SkipBy, Dict::new().entry("_skpS", Value::Float64(seconds)))
            .await?;
        Ok(())
    }

    /// Set the output volume
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the command.
    pub async fn set_volume(&self, volume: f64) -> Result<()> {
        self.media_command(
            MediaCommand::SetVolume,
            Dict::new().entry("_vol", Value::Float64(volume)),
        )
        .await?;
        Ok(())
    }

    /// Query the device for its current volume
    ///
    /// Returns the raw response; the volume field's shape varies by
    /// firmware.
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the command.
    pub async fn get_volume(&self) -> Result<Value> {
        self.media_command(MediaCommand::GetVolume, Dict::new()).await
    }

    /// Text currently in the focused field, or `None` without focus
    ///
    /// # Errors
    ///
    /// Returns an error if the text-input exchange fails.
    pub async fn get_text(&self) -> Result<Option<String>> {
        Ok(keyboard::refresh_session(&self.dispatcher)
            .await?
            .map(|session| session.context))
    }

    /// Replace the focused field's content with `text`
    ///
    /// Returns the client-predicted text, or `None` without focus.
    ///
    /// # Errors
    ///
    /// Returns an error if the text-input exchange fails.
    pub async fn set_text(&self, text: &str) -> Result<Option<String>> {
        keyboard::text_input_command(&self.dispatcher, text, true).await
    }

    /// Append `text` to the focused field
    ///
    /// Returns the client-predicted text, or `None` without focus.
    ///
    /// # Errors
    ///
    /// Returns an error if the text-input exchange fails.
    pub async fn append_text(&self, text: &str) -> Result<Option<String>> {
        keyboard::text_input_command(&self.dispatcher, text, false).await
    }

    /// Watch keyboard focus, invoking `callback` on each transition
    ///
    /// The device does not reliably push focus changes, so this polls
    /// at the configured interval until the watcher is dropped or the
    /// connection goes away.
    #[must_use]
    pub fn watch_focus<F>(&self, callback: F) -> FocusWatcher
    where
        F: Fn(FocusState) + Send + Sync + 'static,
    {
        let dispatcher = Arc::clone(&self.dispatcher);
        let interval = self.config.focus_poll_interval;

        let handle = tokio::spawn(async move {
            let mut state = FocusState::Unknown;
            loop {
                tokio::time::sleep(interval).await;
                match keyboard::poll_focus(&dispatcher).await {
                    Ok(new_state) => {
                        if new_state != state {
                            state = new_state;
                            callback(state);
                        }
                    }
                    Err(err) => {
                        debug!(%err, "focus poll failed, stopping watcher");
                        break;
                    }
                }
            }
        });

        FocusWatcher { handle }
    }

    /// Subscribe to raw events by identifier (e.g. `_iMC`)
    #[must_use]
    pub fn events(&self, identifier: &str) -> mpsc::UnboundedReceiver<Value> {
        self.dispatcher.listen(identifier)
    }

    /// Tear the session down
    pub fn disconnect(&self) {
        self.connection.close();
    }

    /// Whether the underlying connection is still up
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }
}

/// Handle for a focus-polling task; dropping it stops the poll
pub struct FocusWatcher {
    handle: JoinHandle<()>,
}

impl Drop for FocusWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
