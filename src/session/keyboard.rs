//! Remote Text Input
//!
//! Text state lives on the device inside NSKeyedArchiver payloads.
//! `_tiStart` hands back the current session archive (absent when no
//! text field has focus); edits go out as `_tiC` events carrying
//! archives we build for the session UUID.

use tracing::debug;

use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::protocol::opack::{Dict, Value};
use crate::protocol::plist::{self, KeyedArchive};

/// Keyboard focus as seen by the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusState {
    /// No poll has completed yet
    Unknown,
    /// A text field has focus
    Focused,
    /// No text field has focus
    Unfocused,
}

/// A live RTI session extracted from a device archive
pub(crate) struct RtiSession {
    pub uuid: [u8; 16],
    pub context: String,
}

fn empty_content() -> Value {
    Value::Dict(Dict::new())
}

/// Pull `_tiD` out of a `_tiStart` response, leniently
///
/// A missing or empty `_tiD`, or an archive without a session UUID,
/// reads as "no session" rather than an error; missing context text
/// reads as empty.
pub(crate) fn parse_session(reply: &Value) -> Option<RtiSession> {
    let data = reply
        .as_dict()?
        .get("_c")?
        .as_dict()?
        .get("_tiD")?
        .as_bytes()?;
    if data.is_empty() {
        return None;
    }
    let archive = match KeyedArchive::parse(data) {
        Ok(archive) => archive,
        Err(err) => {
            debug!(%err, "undecodable _tiD archive");
            return None;
        }
    };
    let uuid = archive.session_uuid()?;
    Some(RtiSession {
        uuid,
        context: archive.context_before_input(),
    })
}

/// Restart text-input tracking and fetch the current session
pub(crate) async fn refresh_session(dispatcher: &Dispatcher) -> Result<Option<RtiSession>> {
    dispatcher.send_command("_tiStop", empty_content()).await?;
    let reply = dispatcher.send_command("_tiStart", empty_content()).await?;
    Ok(parse_session(&reply))
}

/// Poll focus without disturbing the live session
pub(crate) async fn poll_focus(dispatcher: &Dispatcher) -> Result<FocusState> {
    let reply = dispatcher.send_command("_tiStart", empty_content()).await?;
    Ok(match parse_session(&reply) {
        Some(_) => FocusState::Focused,
        None => FocusState::Unfocused,
    })
}

/// Drive one text-input operation
///
/// Returns the client-predicted text after the edit, or `None` when no
/// text field has focus.
pub(crate) async fn text_input_command(
    dispatcher: &Dispatcher,
    text: &str,
    clear_existing: bool,
) -> Result<Option<String>> {
    let Some(session) = refresh_session(dispatcher).await? else {
        return Ok(None);
    };

    if clear_existing {
        let archive = plist::clear_text_archive(&session.uuid)?;
        send_edit(dispatcher, archive).await?;
    }

    if !text.is_empty() {
        let archive = plist::text_input_archive(&session.uuid, text)?;
        send_edit(dispatcher, archive).await?;
    }

    let predicted = if clear_existing {
        text.to_string()
    } else {
        format!("{}{}", session.context, text)
    };
    Ok(Some(predicted))
}

async fn send_edit(dispatcher: &Dispatcher, archive: Vec<u8>) -> Result<()> {
    let content = Dict::new().entry("_tiV", 1u64).entry("_tiD", archive);
    dispatcher.send_event("_tiC", Value::Dict(content)).await
}
