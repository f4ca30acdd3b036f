//! Idle cache for pairing connections
//!
//! Two-phase pairing runs setup and verify back to back; keeping the
//! socket warm for a couple of minutes avoids reopening it between the
//! phases. Entries are keyed by `(host, port)` and evicted after the
//! idle TTL. A released connection gets a no-op sink so in-flight
//! events never surface after release, and a connection that dies while
//! cached removes itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use super::{Connection, FrameSink};
use crate::protocol::frame::FrameType;

struct Entry {
    connection: Arc<Connection>,
    generation: u64,
}

/// Process-wide cache of idle Companion connections
pub struct ConnectionCache;

static ENTRIES: OnceLock<Mutex<HashMap<(String, u16), Entry>>> = OnceLock::new();
static GENERATION: AtomicU64 = AtomicU64::new(0);

fn entries() -> &'static Mutex<HashMap<(String, u16), Entry>> {
    ENTRIES.get_or_init(|| Mutex::new(HashMap::new()))
}

impl ConnectionCache {
    /// Take a cached connection for `(host, port)` if one is alive
    #[must_use]
    pub fn checkout(host: &str, port: u16) -> Option<Arc<Connection>> {
        let entry = entries()
            .lock()
            .unwrap()
            .remove(&(host.to_string(), port))?;
        if entry.connection.is_connected() {
            Some(entry.connection)
        } else {
            None
        }
    }

    /// Park an idle connection, evicting it after `ttl`
    pub fn release(host: &str, port: u16, connection: Arc<Connection>, ttl: Duration) {
        if !connection.is_connected() {
            return;
        }

        let key = (host.to_string(), port);
        let generation = GENERATION.fetch_add(1, Ordering::Relaxed) + 1;

        connection.set_sink(Arc::new(CacheSink { key: key.clone() }));

        if let Some(previous) = entries().lock().unwrap().insert(
            key.clone(),
            Entry {
                connection,
                generation,
            },
        ) {
            previous.connection.close();
        }

        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let evicted = {
                let mut map = entries().lock().unwrap();
                match map.get(&key) {
                    Some(entry) if entry.generation == generation => map.remove(&key),
                    _ => None,
                }
            };
            if let Some(entry) = evicted {
                tracing::debug!(host = %key.0, port = key.1, "evicting idle connection");
                entry.connection.close();
            }
        });
    }

    #[cfg(test)]
    fn contains(host: &str, port: u16) -> bool {
        entries()
            .lock()
            .unwrap()
            .contains_key(&(host.to_string(), port))
    }
}

/// Sink installed while a connection is parked: events are dropped, and
/// a connection that errors out removes itself from the cache
struct CacheSink {
    key: (String, u16),
}

impl FrameSink for CacheSink {
    fn on_frame(&self, _frame_type: FrameType, _payload: Vec<u8>) {}

    fn on_close(&self) {
        entries().lock().unwrap().remove(&self.key);
    }
}
