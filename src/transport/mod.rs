//! Framed Companion transport
//!
//! One TCP connection per device. Frames are `type(1) | len(3 BE) |
//! payload`; once pair-verify installs session keys, payloads are
//! sealed with ChaCha20-Poly1305 using the 4-byte header as AAD and a
//! little-endian frame counter as nonce.

mod cache;

pub use cache::ConnectionCache;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use crate::protocol::crypto::{ChaCha20Poly1305Cipher, CryptoError, Nonce, SessionKeys};
use crate::protocol::frame::{self, FrameType, HEADER_LEN, MAX_PAYLOAD};

/// Socket-level failures surfaced by the transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// Operation attempted before connect or after close
    #[error("not connected")]
    NotConnected,

    /// Underlying socket error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the connection
    #[error("connection closed")]
    Closed,

    /// Payload exceeds what the 24-bit length field can carry
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Sealing the outgoing payload failed
    #[error("encryption failed: {0}")]
    Encrypt(#[from] CryptoError),
}

/// Receiver of inbound frames
///
/// The read task is the only caller; implementations must not block.
pub trait FrameSink: Send + Sync {
    /// A complete (decrypted) frame arrived
    fn on_frame(&self, frame_type: FrameType, payload: Vec<u8>);

    /// The connection is gone; pending work should be failed
    fn on_close(&self);
}

/// Sink that ignores everything; installed while a connection sits in
/// the idle cache so stale events never surface
pub struct NullSink;

impl FrameSink for NullSink {
    fn on_frame(&self, _frame_type: FrameType, _payload: Vec<u8>) {}
    fn on_close(&self) {}
}

/// One direction of the encrypted channel
struct ChannelCipher {
    cipher: ChaCha20Poly1305Cipher,
    counter: u64,
}

impl ChannelCipher {
    fn new(key: &[u8; 32]) -> Result<Self, CryptoError> {
        Ok(Self {
            cipher: ChaCha20Poly1305Cipher::new(key)?,
            counter: 0,
        })
    }

    fn seal(&mut self, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = Nonce::from_counter(self.counter);
        let sealed = self.cipher.seal(&nonce, aad, plaintext)?;
        self.counter += 1;
        Ok(sealed)
    }

    /// The counter only advances on success so one bad frame cannot
    /// desynchronize the stream.
    fn open(&mut self, aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = Nonce::from_counter(self.counter);
        let plaintext = self.cipher.open(&nonce, aad, ciphertext)?;
        self.counter += 1;
        Ok(plaintext)
    }
}

struct Shared {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    encryptor: tokio::sync::Mutex<Option<ChannelCipher>>,
    decryptor: Mutex<Option<ChannelCipher>>,
    sink: RwLock<Arc<dyn FrameSink>>,
    connected: AtomicBool,
}

/// An open Companion connection
///
/// Exclusively owns the socket. Outbound frames are serialized under
/// the writer lock; inbound frames are produced by a single spawned
/// read task and handed to the installed [`FrameSink`].
pub struct Connection {
    shared: Arc<Shared>,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Open a TCP connection to `addr` and start the read loop
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Io` if the connect fails.
    pub async fn open(addr: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let shared = Arc::new(Shared {
            writer: tokio::sync::Mutex::new(write_half),
            encryptor: tokio::sync::Mutex::new(None),
            decryptor: Mutex::new(None),
            sink: RwLock::new(Arc::new(NullSink)),
            connected: AtomicBool::new(true),
        });

        let task = tokio::spawn(read_loop(read_half, Arc::clone(&shared)));

        Ok(Self {
            shared,
            read_task: Mutex::new(Some(task)),
        })
    }

    /// Install the receiver for inbound frames
    pub fn set_sink(&self, sink: Arc<dyn FrameSink>) {
        *self.shared.sink.write().unwrap() = sink;
    }

    /// Install session keys; every subsequent frame is encrypted
    ///
    /// # Errors
    ///
    /// Returns an error if either key is rejected by the cipher.
    pub async fn install_keys(&self, keys: &SessionKeys) -> Result<(), TransportError> {
        let encryptor = ChannelCipher::new(&keys.output_key)?;
        let decryptor = ChannelCipher::new(&keys.input_key)?;
        *self.shared.encryptor.lock().await = Some(encryptor);
        *self.shared.decryptor.lock().unwrap() = Some(decryptor);
        Ok(())
    }

    /// Whether the socket is still up
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Send one frame, sealing the payload when keys are installed
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` after close, `FrameTooLarge` when the
    /// payload exceeds the length field, or an I/O error.
    pub async fn send(&self, frame_type: FrameType, payload: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        // Lock order: encryptor, then writer. Counter allocation and the
        // socket write stay under one critical section so frames cannot
        // interleave or reorder against their nonces.
        let mut encryptor = self.shared.encryptor.lock().await;

        let (header, body) = match encryptor.as_mut() {
            Some(cipher) if !payload.is_empty() => {
                // Max plaintext under encryption is 2^24 - 17
                if payload.len() + 16 > MAX_PAYLOAD {
                    return Err(TransportError::FrameTooLarge(payload.len()));
                }
                let header = frame::encode_header(frame_type, payload.len() + 16);
                let body = cipher.seal(&header, payload)?;
                (header, body)
            }
            _ => {
                if payload.len() > MAX_PAYLOAD {
                    return Err(TransportError::FrameTooLarge(payload.len()));
                }
                (
                    frame::encode_header(frame_type, payload.len()),
                    payload.to_vec(),
                )
            }
        };

        let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
        buf.extend_from_slice(&header);
        buf.extend_from_slice(&body);

        let mut writer = self.shared.writer.lock().await;
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Close the connection and stop the read loop
    pub fn close(&self) {
        if self.shared.connected.swap(false, Ordering::AcqRel) {
            if let Some(task) = self.read_task.lock().unwrap().take() {
                task.abort();
            }
            let sink = std::mem::replace(
                &mut *self.shared.sink.write().unwrap(),
                Arc::new(NullSink),
            );
            sink.on_close();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

async fn read_loop(mut reader: OwnedReadHalf, shared: Arc<Shared>) {
    let mut buf = BytesMut::with_capacity(8 * 1024);

    loop {
        match reader.read_buf(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        while buf.len() >= HEADER_LEN {
            let mut header = [0u8; HEADER_LEN];
            header.copy_from_slice(&buf[..HEADER_LEN]);
            let (type_byte, length) = frame::decode_header(&header);
            if buf.len() < HEADER_LEN + length {
                break;
            }

            buf.advance(HEADER_LEN);
            let payload = buf.split_to(length).to_vec();
            let frame_type = FrameType::from_byte(type_byte);

            let plaintext = {
                let mut decryptor = shared.decryptor.lock().unwrap();
                match decryptor.as_mut() {
                    Some(cipher) if !payload.is_empty() => {
                        match cipher.open(&header, &payload) {
                            Ok(plaintext) => plaintext,
                            Err(_) => {
                                // Frames from before key installation are
                                // expected here; drop and keep reading.
                                tracing::debug!(
                                    frame_type = type_byte,
                                    length,
                                    "dropping frame that failed decryption"
                                );
                                continue;
                            }
                        }
                    }
                    _ => payload,
                }
            };

            let sink = Arc::clone(&shared.sink.read().unwrap());
            sink.on_frame(frame_type, plaintext);
        }
    }

    if shared.connected.swap(false, Ordering::AcqRel) {
        // Swapping the sink out also breaks the connection<->dispatcher
        // reference cycle once the socket is gone.
        let sink = std::mem::replace(&mut *shared.sink.write().unwrap(), Arc::new(NullSink));
        sink.on_close();
    }
}
