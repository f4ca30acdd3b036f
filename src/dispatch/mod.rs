//! OPACK message dispatch
//!
//! The dispatcher is the connection's frame sink and the only place
//! concurrency lives: it correlates responses to requests by
//! transaction id, resolves pairing exchanges by expected reply frame
//! type, and fans events out to subscribers. Every pending entry is
//! resolved or rejected exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{CompanionError, Result};
use crate::protocol::frame::FrameType;
use crate::protocol::opack::{self, Dict, Value};
use crate::transport::{Connection, FrameSink};

/// `_t` values in the message envelope
mod message_type {
    pub const EVENT: u64 = 1;
    pub const REQUEST: u64 = 2;
    pub const RESPONSE: u64 = 3;
}

type Completion = oneshot::Sender<Result<Value>>;

/// Routes frames between the transport and higher layers
pub struct Dispatcher {
    connection: Arc<Connection>,
    timeout: Duration,
    next_xid: AtomicU32,
    pending: Mutex<HashMap<u32, Completion>>,
    pending_auth: Mutex<HashMap<u8, Completion>>,
    listeners: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Value>>>>,
}

impl Dispatcher {
    /// Create a dispatcher and install it as the connection's sink
    #[must_use]
    pub fn attach(connection: Arc<Connection>, timeout: Duration) -> Arc<Self> {
        // Random starting id keeps reconnects from colliding with
        // responses still in flight from a previous session.
        let start: u32 = rand::thread_rng().gen_range(0..0x1_0000);
        let dispatcher = Arc::new(Self {
            connection,
            timeout,
            next_xid: AtomicU32::new(start),
            pending: Mutex::new(HashMap::new()),
            pending_auth: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
        });
        dispatcher
            .connection
            .set_sink(Arc::clone(&dispatcher) as Arc<dyn FrameSink>);
        dispatcher
    }

    /// The connection this dispatcher routes for
    #[must_use]
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    fn alloc_xid(&self) -> u32 {
        self.next_xid.fetch_add(1, Ordering::Relaxed)
    }

    /// Send a pairing frame and await the matching reply frame
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the deadline passes, `ConnectionLost` if
    /// the socket dies first, or a protocol error for non-auth frames.
    pub async fn exchange_auth(&self, frame_type: FrameType, content: Value) -> Result<Value> {
        let reply_type = frame_type.auth_reply().ok_or_else(|| {
            CompanionError::Protocol(format!("{frame_type:?} is not an auth frame"))
        })?;

        let (tx, rx) = oneshot::channel();
        self.pending_auth.lock().unwrap().insert(reply_type as u8, tx);

        if let Err(err) = self
            .connection
            .send(frame_type, &opack::pack(&content))
            .await
        {
            self.pending_auth.lock().unwrap().remove(&(reply_type as u8));
            return Err(err.into());
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(CompanionError::ConnectionLost),
            Err(_) => {
                self.pending_auth.lock().unwrap().remove(&(reply_type as u8));
                Err(CompanionError::Timeout {
                    operation: format!("{frame_type:?}"),
                })
            }
        }
    }

    /// Send a request and await its response
    ///
    /// The transaction id is allocated and registered before the frame
    /// goes out, so a fast response can never miss its entry.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the deadline passes or `ConnectionLost`
    /// if the socket dies while the request is pending.
    pub async fn send_command(&self, identifier: &str, content: Value) -> Result<Value> {
        let xid = self.alloc_xid();
        let message = Value::Dict(
            Dict::new()
                .entry("_i", identifier)
                .entry("_t", message_type::REQUEST)
                .entry("_c", content)
                .entry("_x", u64::from(xid)),
        );

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(xid, tx);

        if let Err(err) = self
            .connection
            .send(FrameType::EOpack, &opack::pack(&message))
            .await
        {
            self.pending.lock().unwrap().remove(&xid);
            return Err(err.into());
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(CompanionError::ConnectionLost),
            Err(_) => {
                self.pending.lock().unwrap().remove(&xid);
                Err(CompanionError::Timeout {
                    operation: identifier.to_string(),
                })
            }
        }
    }

    /// Send a fire-and-forget event
    ///
    /// # Errors
    ///
    /// Returns a transport error if the frame cannot be sent.
    pub async fn send_event(&self, identifier: &str, content: Value) -> Result<()> {
        let message = Value::Dict(
            Dict::new()
                .entry("_i", identifier)
                .entry("_t", message_type::EVENT)
                .entry("_c", content)
                .entry("_x", u64::from(self.alloc_xid())),
        );
        self.connection
            .send(FrameType::EOpack, &opack::pack(&message))
            .await?;
        Ok(())
    }

    /// Ask the device to start emitting a named event
    ///
    /// # Errors
    ///
    /// Returns a transport error if the frame cannot be sent.
    pub async fn subscribe_event(&self, name: &str) -> Result<()> {
        let content = Dict::new().entry("_regEvents", vec![Value::from(name)]);
        self.send_event("_interest", Value::Dict(content)).await
    }

    /// Register a listener for events with the given identifier
    ///
    /// Dropped receivers are pruned on the next matching event.
    #[must_use]
    pub fn listen(&self, identifier: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners
            .lock()
            .unwrap()
            .entry(identifier.to_string())
            .or_default()
            .push(tx);
        rx
    }

    fn handle_message(&self, frame_type: FrameType, message: Value) {
        let Some(dict) = message.as_dict() else {
            debug!(?frame_type, "dropping non-dict message");
            return;
        };

        match dict.get("_t").and_then(Value::as_u64) {
            Some(message_type::RESPONSE) => {
                let Some(xid) = dict.get("_x").and_then(Value::as_u64) else {
                    debug!("dropping response without transaction id");
                    return;
                };
                #[allow(clippy::cast_possible_truncation)]
                let entry = self.pending.lock().unwrap().remove(&(xid as u32));
                match entry {
                    Some(tx) => {
                        let _ = tx.send(Ok(message.clone()));
                    }
                    None => debug!(xid, "response with no pending request"),
                }
            }
            Some(message_type::EVENT) => {
                let Some(identifier) = dict.get("_i").and_then(Value::as_str) else {
                    debug!("dropping event without identifier");
                    return;
                };
                let mut listeners = self.listeners.lock().unwrap();
                if let Some(senders) = listeners.get_mut(identifier) {
                    senders.retain(|tx| tx.send(message.clone()).is_ok());
                }
            }
            Some(message_type::REQUEST) => {
                // We are a pure client; peers should not ask us anything
                debug!(identifier = ?dict.get("_i"), "ignoring peer request");
            }
            _ => debug!("dropping message without a valid _t"),
        }
    }
}

impl FrameSink for Dispatcher {
    fn on_frame(&self, frame_type: FrameType, payload: Vec<u8>) {
        match frame_type {
            FrameType::PsNext | FrameType::PvNext | FrameType::PsStart | FrameType::PvStart => {
                let entry = self
                    .pending_auth
                    .lock()
                    .unwrap()
                    .remove(&(frame_type as u8));
                let Some(tx) = entry else {
                    debug!(?frame_type, "auth frame with no pending exchange");
                    return;
                };
                match opack::unpack(&payload) {
                    Ok(value) => {
                        let _ = tx.send(Ok(value));
                    }
                    Err(err) => {
                        // Decode errors drop the frame; the exchange
                        // times out rather than aborting the machine.
                        debug!(?frame_type, %err, "dropping undecodable auth frame");
                        self.pending_auth
                            .lock()
                            .unwrap()
                            .insert(frame_type as u8, tx);
                    }
                }
            }
            FrameType::UOpack | FrameType::EOpack | FrameType::POpack => {
                match opack::unpack(&payload) {
                    Ok(message) => self.handle_message(frame_type, message),
                    Err(err) => debug!(?frame_type, %err, "dropping undecodable message frame"),
                }
            }
            FrameType::NoOp => {}
            other => debug!(?other, len = payload.len(), "ignoring frame"),
        }
    }

    fn on_close(&self) {
        warn!("connection lost, rejecting pending work");
        let pending: Vec<Completion> = {
            let mut map = self.pending.lock().unwrap();
            map.drain().map(|(_, tx)| tx).collect()
        };
        for tx in pending {
            let _ = tx.send(Err(CompanionError::ConnectionLost));
        }

        let auth: Vec<Completion> = {
            let mut map = self.pending_auth.lock().unwrap();
            map.drain().map(|(_, tx)| tx).collect()
        };
        for tx in auth {
            let _ = tx.send(Err(CompanionError::ConnectionLost));
        }

        self.listeners.lock().unwrap().clear();
    }
}
