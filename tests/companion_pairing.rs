//! Companion-carried pairing against the mock Apple TV

mod support;

use companion::pairing::{PairingError, PeerErrorCode};
use companion::{CompanionClient, CompanionError, DeviceRecord, HidCommand};
use support::{MockAppleTv, MockOptions};

fn device_for(mock: &MockAppleTv) -> DeviceRecord {
    DeviceRecord::new("Mock TV", "127.0.0.1", mock.addr.port(), 1)
}

#[tokio::test]
async fn test_pair_then_connect_reuses_socket() {
    let mock = MockAppleTv::start(MockOptions::default()).await;
    let client = CompanionClient::new(device_for(&mock));

    let handle = client.pair_companion().await.unwrap();
    let credentials = handle.finish("1234").await.unwrap();

    assert_eq!(credentials.atv_id, b"AA:BB:CC:DD:EE:FF".to_vec());
    assert_eq!(credentials.ltpk.len(), 32);
    assert_eq!(credentials.ltsk.len(), 32);

    // The credential string survives a round-trip
    let restored: companion::HapCredentials = credentials.to_string().parse().unwrap();
    assert_eq!(restored, credentials);

    // The mock accepts a single connection: connect() must reuse the
    // cached pairing socket for verify and the session
    let session = client.connect(&credentials).await.unwrap();
    session.press_key(HidCommand::Menu).await.unwrap();
    assert!(mock.seen_identifiers().contains(&"_hidC".to_string()));
}

#[tokio::test]
async fn test_wrong_pin_reports_auth_failure() {
    let mock = MockAppleTv::start(MockOptions::default()).await;
    let client = CompanionClient::new(device_for(&mock));

    let handle = client.pair_companion().await.unwrap();
    let err = handle.finish("0000").await.unwrap_err();

    match err {
        CompanionError::Pairing(PairingError::Peer { code, .. }) => {
            assert_eq!(code, PeerErrorCode::AuthenticationFailed);
        }
        other => panic!("expected peer auth failure, got {other:?}"),
    }
}
