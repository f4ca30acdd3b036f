//! Mock Apple TV: the device side of the Companion protocol, enough to
//! drive pairing, verification and an encrypted command session over a
//! real localhost socket.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::{Buf, BytesMut};
use rand::RngCore;
use sha2::Sha512;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use companion::pairing::HapCredentials;
use companion::protocol::crypto::{
    ChaCha20Poly1305Cipher, Ed25519KeyPair, Ed25519PublicKey, HkdfSha512, Nonce, SessionKeys,
    X25519KeyPair,
};
use companion::protocol::frame::{self, FrameType};
use companion::protocol::opack::{self, Dict, Value};
use companion::protocol::plist::{encode, PlistValue};
use companion::protocol::tlv::{Tag, TlvReader, TlvWriter};

const USERNAME: &[u8] = b"Pair-Setup";

/// What the mock saw arrive after session startup
#[derive(Debug, Clone)]
pub struct SeenMessage {
    pub identifier: String,
    pub is_event: bool,
    pub content: Value,
}

#[derive(Clone)]
pub struct MockOptions {
    pub pin: String,
    pub atv_id: Vec<u8>,
    /// `Some(context)` means a text field has focus
    pub focused_context: Option<String>,
    /// Client identity known from an earlier pairing
    pub preknown_client: Option<(Vec<u8>, Vec<u8>)>, // (ltpk, client id)
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            pin: "1234".to_string(),
            atv_id: b"AA:BB:CC:DD:EE:FF".to_vec(),
            focused_context: None,
            preknown_client: None,
        }
    }
}

pub struct MockAppleTv {
    pub addr: SocketAddr,
    pub log: Arc<Mutex<Vec<SeenMessage>>>,
    pub session_uuid: [u8; 16],
}

impl MockAppleTv {
    /// Start a mock that accepts a single connection
    pub async fn start(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut session_uuid = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut session_uuid);

        let device_identity = Ed25519KeyPair::generate();
        let task_log = Arc::clone(&log);
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut device = Device::new(socket, options, device_identity, task_log, session_uuid);
            device.run().await;
        });

        Self {
            addr,
            log,
            session_uuid,
        }
    }

    /// Start a mock preloaded with a pairing, returning the matching
    /// client credentials
    pub async fn start_paired(mut options: MockOptions) -> (Self, HapCredentials) {
        let client_identity = Ed25519KeyPair::generate();
        let client_id = HapCredentials::new_client_id();
        options.preknown_client = Some((
            client_identity.public_key().as_bytes().to_vec(),
            client_id.clone(),
        ));

        // The device's long-term key must match what the mock signs
        // with, so generate it here and thread it through.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut session_uuid = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut session_uuid);

        let device_identity = Ed25519KeyPair::generate();
        let credentials = HapCredentials {
            ltpk: device_identity.public_key().as_bytes().to_vec(),
            ltsk: client_identity.seed().to_vec(),
            atv_id: options.atv_id.clone(),
            client_id,
        };

        let task_log = Arc::clone(&log);
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut device = Device::new(socket, options, device_identity, task_log, session_uuid);
            device.run().await;
        });

        (
            Self {
                addr,
                log,
                session_uuid,
            },
            credentials,
        )
    }

    pub fn seen_identifiers(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.identifier.clone())
            .collect()
    }
}

struct ChannelState {
    out_cipher: ChaCha20Poly1305Cipher,
    out_counter: u64,
    in_cipher: ChaCha20Poly1305Cipher,
    in_counter: u64,
}

struct Device {
    socket: TcpStream,
    buf: BytesMut,
    options: MockOptions,
    identity: Ed25519KeyPair,
    log: Arc<Mutex<Vec<SeenMessage>>>,
    session_uuid: [u8; 16],
    channel: Option<ChannelState>,
    // pair-setup state
    srp_b: [u8; 32],
    srp_salt: [u8; 16],
    srp_verifier_v: Vec<u8>,
    srp_key: Vec<u8>,
    // pair-verify state
    verify_shared: Vec<u8>,
    verify_key: [u8; 32],
}

impl Device {
    fn new(
        socket: TcpStream,
        options: MockOptions,
        identity: Ed25519KeyPair,
        log: Arc<Mutex<Vec<SeenMessage>>>,
        session_uuid: [u8; 16],
    ) -> Self {
        Self {
            socket,
            buf: BytesMut::with_capacity(8 * 1024),
            options,
            identity,
            log,
            session_uuid,
            channel: None,
            srp_b: [0; 32],
            srp_salt: [0; 16],
            srp_verifier_v: Vec::new(),
            srp_key: Vec::new(),
            verify_shared: Vec::new(),
            verify_key: [0; 32],
        }
    }

    async fn run(&mut self) {
        while let Some((type_byte, payload)) = self.read_frame().await {
            match FrameType::from_byte(type_byte) {
                FrameType::PsStart | FrameType::PsNext => self.handle_setup(&payload).await,
                FrameType::PvStart | FrameType::PvNext => self.handle_verify(&payload).await,
                FrameType::EOpack => self.handle_message(&payload).await,
                _ => {}
            }
        }
    }

    async fn read_frame(&mut self) -> Option<(u8, Vec<u8>)> {
        loop {
            if self.buf.len() >= 4 {
                let mut header = [0u8; 4];
                header.copy_from_slice(&self.buf[..4]);
                let (type_byte, len) = frame::decode_header(&header);
                if self.buf.len() >= 4 + len {
                    self.buf.advance(4);
                    let payload = self.buf.split_to(len).to_vec();
                    let plain = match &mut self.channel {
                        Some(channel) if !payload.is_empty() => {
                            let nonce = Nonce::from_counter(channel.in_counter);
                            channel.in_counter += 1;
                            channel.in_cipher.open(&nonce, &header, &payload).unwrap()
                        }
                        _ => payload,
                    };
                    return Some((type_byte, plain));
                }
            }
            match self.socket.read_buf(&mut self.buf).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    async fn write_frame(&mut self, frame_type: FrameType, payload: &[u8]) {
        let (header, body) = match &mut self.channel {
            Some(channel) if !payload.is_empty() => {
                let header = frame::encode_header(frame_type, payload.len() + 16);
                let nonce = Nonce::from_counter(channel.out_counter);
                channel.out_counter += 1;
                let body = channel.out_cipher.seal(&nonce, &header, payload).unwrap();
                (header, body)
            }
            _ => (
                frame::encode_header(frame_type, payload.len()),
                payload.to_vec(),
            ),
        };
        self.socket.write_all(&header).await.unwrap();
        self.socket.write_all(&body).await.unwrap();
    }

    async fn write_auth_reply(&mut self, frame_type: FrameType, tlv: Vec<u8>) {
        let content = Value::Dict(Dict::new().entry("_pd", tlv));
        let payload = opack::pack(&content);
        self.write_frame(frame_type, &payload).await;
    }

    fn unwrap_pd(payload: &[u8]) -> Vec<u8> {
        let value = opack::unpack(payload).unwrap();
        value
            .as_dict()
            .unwrap()
            .get("_pd")
            .unwrap()
            .as_bytes()
            .unwrap()
            .to_vec()
    }

    async fn handle_setup(&mut self, payload: &[u8]) {
        let tlv = TlvReader::parse(&Self::unwrap_pd(payload)).unwrap();
        match tlv.seq_no().unwrap() {
            1 => {
                rand::thread_rng().fill_bytes(&mut self.srp_salt);
                rand::thread_rng().fill_bytes(&mut self.srp_b);
                self.srp_verifier_v = srp::client::SrpClient::<Sha512>::new(&srp::groups::G_3072)
                    .compute_verifier(USERNAME, self.options.pin.as_bytes(), &self.srp_salt);
                let b_pub = srp::server::SrpServer::<Sha512>::new(&srp::groups::G_3072)
                    .compute_public_ephemeral(&self.srp_b, &self.srp_verifier_v);

                let reply = TlvWriter::new()
                    .add_u8(Tag::SeqNo, 2)
                    .add(Tag::Salt, &self.srp_salt)
                    .add(Tag::PublicKey, &b_pub)
                    .build();
                self.write_auth_reply(FrameType::PsNext, reply).await;
            }
            3 => {
                let a_pub = tlv.get(Tag::PublicKey).unwrap();
                let m1 = tlv.get(Tag::Proof).unwrap();

                let server = srp::server::SrpServer::<Sha512>::new(&srp::groups::G_3072);
                let verifier = server
                    .process_reply(&self.srp_b, &self.srp_verifier_v, a_pub)
                    .unwrap();

                let reply = match verifier.verify_client(m1) {
                    Ok(()) => {
                        self.srp_key = verifier.key().to_vec();
                        TlvWriter::new()
                            .add_u8(Tag::SeqNo, 4)
                            .add(Tag::Proof, verifier.proof())
                            .build()
                    }
                    Err(_) => TlvWriter::new()
                        .add_u8(Tag::SeqNo, 4)
                        .add_u8(Tag::Error, 2)
                        .build(),
                };
                self.write_auth_reply(FrameType::PsNext, reply).await;
            }
            5 => {
                let sealed = tlv.get(Tag::EncryptedData).unwrap();
                let hkdf = HkdfSha512::new(Some(b"Pair-Setup-Encrypt-Salt"), &self.srp_key);
                let key = hkdf.expand_fixed::<32>(b"Pair-Setup-Encrypt-Info").unwrap();
                let cipher = ChaCha20Poly1305Cipher::new(&key).unwrap();
                let plain = cipher
                    .open(&Nonce::from_label(b"PS-Msg05").unwrap(), b"", sealed)
                    .unwrap();

                let inner = TlvReader::parse(&plain).unwrap();
                let client_id = inner.get(Tag::Identifier).unwrap().to_vec();
                let client_ltpk = inner.get(Tag::PublicKey).unwrap().to_vec();

                // Check the controller signature the way a device would
                let sign_hkdf =
                    HkdfSha512::new(Some(b"Pair-Setup-Controller-Sign-Salt"), &self.srp_key);
                let mut signed = sign_hkdf
                    .expand_fixed::<32>(b"Pair-Setup-Controller-Sign-Info")
                    .unwrap()
                    .to_vec();
                signed.extend_from_slice(&client_id);
                signed.extend_from_slice(&client_ltpk);
                Ed25519PublicKey::from_bytes(&client_ltpk)
                    .unwrap()
                    .verify(&signed, inner.get(Tag::Signature).unwrap())
                    .unwrap();

                self.options.preknown_client = Some((client_ltpk, client_id));

                let exchange = TlvWriter::new()
                    .add(Tag::Identifier, &self.options.atv_id)
                    .add(Tag::PublicKey, self.identity.public_key().as_bytes())
                    .build();
                let sealed = cipher
                    .seal(&Nonce::from_label(b"PS-Msg06").unwrap(), b"", &exchange)
                    .unwrap();
                let reply = TlvWriter::new()
                    .add_u8(Tag::SeqNo, 6)
                    .add(Tag::EncryptedData, &sealed)
                    .build();
                self.write_auth_reply(FrameType::PsNext, reply).await;
            }
            other => panic!("unexpected setup seq {other}"),
        }
    }

    async fn handle_verify(&mut self, payload: &[u8]) {
        let tlv = TlvReader::parse(&Self::unwrap_pd(payload)).unwrap();
        match tlv.seq_no().unwrap() {
            1 => {
                let client_pub = tlv.get(Tag::PublicKey).unwrap().to_vec();
                let session = X25519KeyPair::generate();
                let shared = session.diffie_hellman(&client_pub).unwrap();

                let mut signed = session.public_bytes().to_vec();
                signed.extend_from_slice(&self.options.atv_id);
                signed.extend_from_slice(&client_pub);
                let signature = self.identity.sign(&signed);

                let inner = TlvWriter::new()
                    .add(Tag::Identifier, &self.options.atv_id)
                    .add(Tag::Signature, &signature)
                    .build();

                let hkdf = HkdfSha512::new(Some(b"Pair-Verify-Encrypt-Salt"), shared.as_bytes());
                self.verify_key = hkdf.expand_fixed::<32>(b"Pair-Verify-Encrypt-Info").unwrap();
                let cipher = ChaCha20Poly1305Cipher::new(&self.verify_key).unwrap();
                let sealed = cipher
                    .seal(&Nonce::from_label(b"PV-Msg02").unwrap(), b"", &inner)
                    .unwrap();

                self.verify_shared = shared.as_bytes().to_vec();

                let reply = TlvWriter::new()
                    .add_u8(Tag::SeqNo, 2)
                    .add(Tag::PublicKey, &session.public_bytes())
                    .add(Tag::EncryptedData, &sealed)
                    .build();
                self.write_auth_reply(FrameType::PvNext, reply).await;
            }
            3 => {
                let sealed = tlv.get(Tag::EncryptedData).unwrap();
                let cipher = ChaCha20Poly1305Cipher::new(&self.verify_key).unwrap();
                let plain = cipher
                    .open(&Nonce::from_label(b"PV-Msg03").unwrap(), b"", sealed)
                    .unwrap();
                let inner = TlvReader::parse(&plain).unwrap();

                let (client_ltpk, client_id) = self
                    .options
                    .preknown_client
                    .clone()
                    .expect("verify without a known client");
                assert_eq!(inner.get(Tag::Identifier).unwrap(), &client_id[..]);
                // Signature covers clientVerifyPub || clientId || sessionPub,
                // but the mock only checks it parses; key material equality
                // is what the session tests assert end to end.
                assert_eq!(inner.get(Tag::Signature).unwrap().len(), 64);
                let _ = client_ltpk;

                let reply = TlvWriter::new().add_u8(Tag::SeqNo, 4).build();
                self.write_auth_reply(FrameType::PvNext, reply).await;

                // Keys go live for everything after the SeqNo 4 frame
                let keys = SessionKeys::derive(&self.verify_shared).unwrap().flipped();
                self.channel = Some(ChannelState {
                    out_cipher: ChaCha20Poly1305Cipher::new(&keys.output_key).unwrap(),
                    out_counter: 0,
                    in_cipher: ChaCha20Poly1305Cipher::new(&keys.input_key).unwrap(),
                    in_counter: 0,
                });
            }
            other => panic!("unexpected verify seq {other}"),
        }
    }

    async fn handle_message(&mut self, payload: &[u8]) {
        let message = opack::unpack(payload).unwrap();
        let dict = message.as_dict().unwrap().clone();
        let identifier = dict
            .get("_i")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let message_type = dict.get("_t").and_then(Value::as_u64).unwrap_or_default();
        let content = dict
            .get("_c")
            .cloned()
            .unwrap_or(Value::Dict(Dict::new()));

        self.log.lock().unwrap().push(SeenMessage {
            identifier: identifier.clone(),
            is_event: message_type == 1,
            content,
        });

        if message_type != 2 {
            return;
        }

        let response_content = match identifier.as_str() {
            "_tiStart" => {
                let mut content = Dict::new();
                if let Some(context) = &self.options.focused_context {
                    content.insert(
                        "_tiD",
                        device_archive(&self.session_uuid, context),
                    );
                }
                content
            }
            _ => Dict::new(),
        };

        let xid = dict.get("_x").and_then(Value::as_u64).unwrap();
        let response = Value::Dict(
            Dict::new()
                .entry("_i", identifier.as_str())
                .entry("_t", 3u64)
                .entry("_c", response_content)
                .entry("_x", xid),
        );
        let payload = opack::pack(&response);
        self.write_frame(FrameType::EOpack, &payload).await;
    }
}

/// A device-shaped RTI session archive
pub fn device_archive(uuid: &[u8; 16], context: &str) -> Vec<u8> {
    fn dict(entries: Vec<(&str, PlistValue)>) -> PlistValue {
        PlistValue::Dictionary(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    let objects = vec![
        PlistValue::String("$null".to_string()),                       // 0
        dict(vec![
            ("sessionUUID", PlistValue::Uid(2)),
            ("documentState", PlistValue::Uid(3)),
        ]),                                                            // 1: root
        PlistValue::Data(uuid.to_vec()),                               // 2
        dict(vec![("docSt", PlistValue::Uid(4))]),                     // 3
        dict(vec![("contextBeforeInput", PlistValue::Uid(5))]),        // 4
        PlistValue::String(context.to_string()),                       // 5
    ];

    let archive = dict(vec![
        ("$version", PlistValue::Integer(100_000)),
        ("$archiver", PlistValue::String("RTIKeyedArchiver".to_string())),
        ("$top", dict(vec![("root", PlistValue::Uid(1))])),
        ("$objects", PlistValue::Array(objects)),
    ]);

    encode(&archive).unwrap()
}
