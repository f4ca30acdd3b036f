//! AirPlay HTTP pair-setup against a mock device endpoint

use bytes::BytesMut;
use rand::RngCore;
use sha2::Sha512;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use companion::protocol::crypto::{
    ChaCha20Poly1305Cipher, Ed25519KeyPair, HkdfSha512, Nonce,
};
use companion::protocol::tlv::{Tag, TlvReader, TlvWriter};
use companion::{CompanionClient, DeviceRecord};

struct HttpRequest {
    path: String,
    headers: String,
    body: Vec<u8>,
}

async fn read_request(socket: &mut TcpStream, buf: &mut BytesMut) -> HttpRequest {
    let header_end = loop {
        if let Some(at) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break at;
        }
        assert_ne!(socket.read_buf(buf).await.unwrap(), 0, "client hung up");
    };

    let head = buf.split_to(header_end + 4);
    let headers = String::from_utf8(head.to_vec()).unwrap();
    let path = headers
        .lines()
        .next()
        .unwrap()
        .split_whitespace()
        .nth(1)
        .unwrap()
        .to_string();
    let content_length: usize = headers
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse().ok())?
        })
        .unwrap_or(0);

    while buf.len() < content_length {
        assert_ne!(socket.read_buf(buf).await.unwrap(), 0, "client hung up");
    }
    let body = buf.split_to(content_length).to_vec();

    HttpRequest {
        path,
        headers,
        body,
    }
}

async fn write_response(socket: &mut TcpStream, body: &[u8]) {
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    socket.write_all(head.as_bytes()).await.unwrap();
    socket.write_all(body).await.unwrap();
}

/// Device side of HAP pair-setup over the AirPlay HTTP endpoints
async fn run_mock_airplay_device(listener: TcpListener, pin: &str) -> Vec<String> {
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut buf = BytesMut::new();
    let mut request_log = Vec::new();

    let identity = Ed25519KeyPair::generate();
    let mut salt = [0u8; 16];
    let mut b = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut salt);
    rand::thread_rng().fill_bytes(&mut b);

    let srp_client = srp::client::SrpClient::<Sha512>::new(&srp::groups::G_3072);
    let verifier_v = srp_client.compute_verifier(b"Pair-Setup", pin.as_bytes(), &salt);
    let server = srp::server::SrpServer::<Sha512>::new(&srp::groups::G_3072);
    let mut srp_key = Vec::new();

    loop {
        let request = read_request(&mut socket, &mut buf).await;
        request_log.push(format!("{} {}", request.path, request.headers.lines().count()));
        assert!(request.headers.contains("User-Agent: AirPlay/320.20"));
        assert!(request.headers.contains("X-Apple-HKP: 3"));

        if request.path == "/pair-pin-start" {
            write_response(&mut socket, &[]).await;
            continue;
        }
        assert_eq!(request.path, "/pair-setup");

        let tlv = TlvReader::parse(&request.body).unwrap();
        match tlv.seq_no().unwrap() {
            1 => {
                let b_pub = server.compute_public_ephemeral(&b, &verifier_v);
                let reply = TlvWriter::new()
                    .add_u8(Tag::SeqNo, 2)
                    .add(Tag::Salt, &salt)
                    .add(Tag::PublicKey, &b_pub)
                    .build();
                write_response(&mut socket, &reply).await;
            }
            3 => {
                let verifier = server
                    .process_reply(&b, &verifier_v, tlv.get(Tag::PublicKey).unwrap())
                    .unwrap();
                verifier.verify_client(tlv.get(Tag::Proof).unwrap()).unwrap();
                srp_key = verifier.key().to_vec();
                let reply = TlvWriter::new()
                    .add_u8(Tag::SeqNo, 4)
                    .add(Tag::Proof, verifier.proof())
                    .build();
                write_response(&mut socket, &reply).await;
            }
            5 => {
                let hkdf = HkdfSha512::new(Some(b"Pair-Setup-Encrypt-Salt"), &srp_key);
                let key = hkdf.expand_fixed::<32>(b"Pair-Setup-Encrypt-Info").unwrap();
                let cipher = ChaCha20Poly1305Cipher::new(&key).unwrap();
                let plain = cipher
                    .open(
                        &Nonce::from_label(b"PS-Msg05").unwrap(),
                        b"",
                        tlv.get(Tag::EncryptedData).unwrap(),
                    )
                    .unwrap();
                let inner = TlvReader::parse(&plain).unwrap();
                assert_eq!(inner.get(Tag::PublicKey).unwrap().len(), 32);
                assert!(inner.get(Tag::Name).is_some());

                let exchange = TlvWriter::new()
                    .add(Tag::Identifier, b"FF:EE:DD:CC:BB:AA")
                    .add(Tag::PublicKey, identity.public_key().as_bytes())
                    .build();
                let sealed = cipher
                    .seal(&Nonce::from_label(b"PS-Msg06").unwrap(), b"", &exchange)
                    .unwrap();
                let reply = TlvWriter::new()
                    .add_u8(Tag::SeqNo, 6)
                    .add(Tag::EncryptedData, &sealed)
                    .build();
                write_response(&mut socket, &reply).await;
                return request_log;
            }
            other => panic!("unexpected seq {other}"),
        }
    }
}

#[tokio::test]
async fn test_airplay_pair_setup() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let device_task = tokio::spawn(async move { run_mock_airplay_device(listener, "4321").await });

    let device = DeviceRecord::new("Mock TV", "127.0.0.1", 1, port);
    let client = CompanionClient::new(device);

    let pairing = client.pair_airplay().await.unwrap();
    let credentials = pairing.finish("4321").await.unwrap();

    assert_eq!(credentials.atv_id, b"FF:EE:DD:CC:BB:AA".to_vec());
    assert_eq!(credentials.ltpk.len(), 32);
    assert_eq!(credentials.client_id.len(), 36);
    credentials.client_uuid().unwrap();

    let log = device_task.await.unwrap();
    assert_eq!(log.len(), 5); // pin-start + four TLV exchanges
    assert!(log[0].starts_with("/pair-pin-start"));
}

#[tokio::test]
async fn test_airplay_wrong_pin_fails_srp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // Device that reports code 2 when the client proof is wrong
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = BytesMut::new();

        let mut salt = [0u8; 16];
        let mut b = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut b);
        let srp_client = srp::client::SrpClient::<Sha512>::new(&srp::groups::G_3072);
        let verifier_v = srp_client.compute_verifier(b"Pair-Setup", b"1234", &salt);
        let server = srp::server::SrpServer::<Sha512>::new(&srp::groups::G_3072);

        loop {
            let request = read_request(&mut socket, &mut buf).await;
            if request.path == "/pair-pin-start" {
                write_response(&mut socket, &[]).await;
                continue;
            }
            let tlv = TlvReader::parse(&request.body).unwrap();
            match tlv.seq_no().unwrap() {
                1 => {
                    let b_pub = server.compute_public_ephemeral(&b, &verifier_v);
                    let reply = TlvWriter::new()
                        .add_u8(Tag::SeqNo, 2)
                        .add(Tag::Salt, &salt)
                        .add(Tag::PublicKey, &b_pub)
                        .build();
                    write_response(&mut socket, &reply).await;
                }
                3 => {
                    let verifier = server
                        .process_reply(&b, &verifier_v, tlv.get(Tag::PublicKey).unwrap())
                        .unwrap();
                    assert!(verifier.verify_client(tlv.get(Tag::Proof).unwrap()).is_err());
                    let reply = TlvWriter::new()
                        .add_u8(Tag::SeqNo, 4)
                        .add_u8(Tag::Error, 2)
                        .build();
                    write_response(&mut socket, &reply).await;
                    return;
                }
                other => panic!("unexpected seq {other}"),
            }
        }
    });

    let device = DeviceRecord::new("Mock TV", "127.0.0.1", 1, port);
    let client = CompanionClient::new(device);

    let pairing = client.pair_airplay().await.unwrap();
    let err = pairing.finish("9999").await.unwrap_err();
    assert!(err.to_string().contains("wrong PIN"));
}
