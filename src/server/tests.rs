use super::*;

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Duration};

use crate::alert::{Alert, AlertKind};
use crate::hash::Md4Hash;
use crate::session::{SessionFacade, TransferHandle};
use crate::settings::SessionSettings;
use crate::tag::{Tag, TagList};

// ============================================================================
// Frame header
// ============================================================================

#[test]
fn test_header_round_trip() {
    let header = FrameHeader::plain(0x15, 4);
    assert_eq!(header.size, 5);

    let raw = header.encode();
    assert_eq!(raw, [0xE3, 0x05, 0x00, 0x00, 0x00, 0x15]);
    assert_eq!(FrameHeader::decode(&raw).unwrap(), header);
}

#[test]
fn test_header_rejects_unknown_protocol() {
    let raw = [0xAAu8, 0x01, 0x00, 0x00, 0x00, 0x15];
    assert!(matches!(
        FrameHeader::decode(&raw),
        Err(ServerError::InvalidProtocolType(0xAA))
    ));
}

#[test]
fn test_header_rejects_zero_size() {
    let raw = [0xE3u8, 0x00, 0x00, 0x00, 0x00, 0x15];
    assert!(matches!(
        FrameHeader::decode(&raw),
        Err(ServerError::DecodePacket(_))
    ));
}

#[test]
fn test_header_rejects_oversized_frame() {
    let mut raw = [0xE3u8, 0, 0, 0, 0, 0x15];
    raw[1..5].copy_from_slice(&0x7FFF_FFFFu32.to_le_bytes());
    assert!(matches!(
        FrameHeader::decode(&raw),
        Err(ServerError::DecodePacket(_))
    ));
}

// ============================================================================
// Messages
// ============================================================================

fn test_hash() -> Md4Hash {
    Md4Hash::from_hex("0123456789ABCDEF0123456789ABCDEF").unwrap()
}

fn test_entry() -> SharedFileEntry {
    let mut tags = TagList::new();
    tags.push(Tag::new(0x01u8, "shared.bin"));
    tags.push(Tag::new(0x02u8, 1_000_000u32));
    SharedFileEntry {
        hash: test_hash(),
        endpoint: Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 4662),
        tags,
    }
}

#[test]
fn test_message_round_trips() {
    let messages = vec![
        Message::LoginRequest(LoginRequest::from_settings(&SessionSettings::default())),
        Message::ServerMessage {
            message: "welcome".to_string(),
        },
        Message::ServerList {
            servers: vec![
                Endpoint::new(Ipv4Addr::new(1, 2, 3, 4), 4661),
                Endpoint::new(Ipv4Addr::new(5, 6, 7, 8), 5661),
            ],
        },
        Message::ServerStatus {
            users: 10,
            files: 100,
        },
        Message::IdChange(IdChange {
            client_id: 0x01020304,
            tcp_flags: 1,
            aux_port: 4663,
        }),
        Message::ServerIdent(ServerIdent {
            hash: test_hash(),
            endpoint: Endpoint::new(Ipv4Addr::new(9, 9, 9, 9), 4661),
            tags: TagList::new(),
        }),
        Message::OfferFiles {
            files: vec![test_entry()],
        },
        Message::GetServerList,
        Message::GetSources {
            hash: test_hash(),
            size: 5_000_000_000,
        },
        Message::CallbackRequest {
            client_id: 0x00000042,
        },
        Message::FoundSources {
            hash: test_hash(),
            sources: vec![Endpoint::new(Ipv4Addr::new(10, 1, 1, 1), 7000)],
        },
        Message::SearchRequest {
            query: Bytes::from_static(&[0x01, 0x04, 0x00, b't', b'e', b's', b't']),
        },
        Message::SearchResult {
            results: vec![test_entry(), test_entry()],
        },
        Message::Reject,
        Message::Disconnect,
        Message::UsersList {
            payload: Bytes::from_static(&[1, 2, 3]),
        },
        Message::CallbackRequested {
            payload: Bytes::from_static(&[4, 5, 6]),
        },
    ];

    for message in messages {
        let payload = message.encode();
        let decoded = Message::decode(message.opcode(), payload).unwrap();
        assert_eq!(decoded, message);
    }
}

#[test]
fn test_unknown_opcode_round_trips_raw_bytes() {
    let message = Message::Unknown {
        opcode: 0x77,
        payload: Bytes::from_static(&[0xDE, 0xAD]),
    };
    let decoded = Message::decode(0x77, message.encode()).unwrap();
    assert_eq!(decoded, message);
}

#[test]
fn test_id_change_optional_fields() {
    // Only the client id: flags and aux port default to zero.
    let payload = Bytes::copy_from_slice(&0x01020304u32.to_le_bytes());
    let decoded = Message::decode(Opcode::IdChange as u8, payload).unwrap();
    assert_eq!(
        decoded,
        Message::IdChange(IdChange {
            client_id: 0x01020304,
            tcp_flags: 0,
            aux_port: 0,
        })
    );

    // Id plus flags, no aux port.
    let mut raw = Vec::new();
    raw.extend_from_slice(&7u32.to_le_bytes());
    raw.extend_from_slice(&1u32.to_le_bytes());
    let decoded = Message::decode(Opcode::IdChange as u8, Bytes::from(raw)).unwrap();
    assert_eq!(
        decoded,
        Message::IdChange(IdChange {
            client_id: 7,
            tcp_flags: 1,
            aux_port: 0,
        })
    );
}

#[test]
fn test_login_request_carries_identity_tags() {
    let settings = SessionSettings {
        client_name: "tester".to_string(),
        listen_port: 4662,
        ..SessionSettings::default()
    };
    let login = LoginRequest::from_settings(&settings);

    assert_eq!(login.client_id, 0);
    assert_eq!(login.port, 4662);
    assert_eq!(
        login.tags.get_by_id(0x01).unwrap().as_str().unwrap(),
        "tester"
    );
    assert_eq!(login.tags.get_by_id(0x11).unwrap().as_u32().unwrap(), 0x3C);
    assert!(login.tags.get_by_id(0x20).is_some());
    assert!(login.tags.get_by_id(0xFB).is_some());
}

#[test]
fn test_keepalive_frame_is_empty_offer() {
    let message = Message::OfferFiles { files: Vec::new() };
    let payload = message.encode();
    assert_eq!(payload.as_ref(), &[0u8, 0, 0, 0]);

    let header = FrameHeader::plain(message.opcode(), payload.len());
    assert_eq!(header.opcode, 0x15);
    assert_eq!(header.size, 5);
}

#[test]
fn test_recognized_message_with_bad_payload_fails() {
    let payload = Bytes::from_static(&[0x01, 0x02]);
    assert!(Message::decode(Opcode::ServerStatus as u8, payload).is_err());
}

// ============================================================================
// Fake session and scripted server
// ============================================================================

struct FakeTransfer {
    sources: Mutex<Vec<Vec<Endpoint>>>,
}

impl TransferHandle for FakeTransfer {
    fn set_sources(&self, sources: Vec<Endpoint>) {
        self.sources.lock().push(sources);
    }
}

struct FakeSession {
    settings: SessionSettings,
    muted: Vec<AlertKind>,
    alerts: Mutex<Vec<Alert>>,
    ready_calls: Mutex<Vec<(u32, u32, u32, u32, u32)>>,
    stopped_count: AtomicUsize,
    transfers: Mutex<HashMap<Md4Hash, Arc<FakeTransfer>>>,
}

impl FakeSession {
    fn new(settings: SessionSettings) -> Arc<Self> {
        Arc::new(Self {
            settings,
            muted: Vec::new(),
            alerts: Mutex::new(Vec::new()),
            ready_calls: Mutex::new(Vec::new()),
            stopped_count: AtomicUsize::new(0),
            transfers: Mutex::new(HashMap::new()),
        })
    }

    fn add_transfer(&self, hash: Md4Hash) -> Arc<FakeTransfer> {
        let transfer = Arc::new(FakeTransfer {
            sources: Mutex::new(Vec::new()),
        });
        self.transfers.lock().insert(hash, transfer.clone());
        transfer
    }

    fn alert_kinds(&self) -> Vec<AlertKind> {
        self.alerts.lock().iter().map(Alert::kind).collect()
    }

    fn stopped(&self) -> usize {
        self.stopped_count.load(Ordering::SeqCst)
    }
}

impl SessionFacade for FakeSession {
    fn settings(&self) -> SessionSettings {
        self.settings.clone()
    }

    fn should_post(&self, kind: AlertKind) -> bool {
        !self.muted.contains(&kind)
    }

    fn post_alert(&self, alert: Alert) {
        self.alerts.lock().push(alert);
    }

    fn find_transfer(&self, hash: &Md4Hash) -> Option<Arc<dyn TransferHandle>> {
        self.transfers
            .lock()
            .get(hash)
            .map(|t| t.clone() as Arc<dyn TransferHandle>)
    }

    fn server_ready(&self, client_id: u32, files: u32, users: u32, tcp_flags: u32, aux_port: u32) {
        self.ready_calls
            .lock()
            .push((client_id, files, users, tcp_flags, aux_port));
    }

    fn server_stopped(&self) {
        self.stopped_count.fetch_add(1, Ordering::SeqCst);
    }
}

async fn local_server() -> (TcpListener, SessionSettings) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut hash_bytes = [0u8; 16];
    hash_bytes[15] = 0x01;

    let settings = SessionSettings {
        server_hostname: "127.0.0.1".to_string(),
        server_port: port,
        client_hash: Md4Hash::from_bytes(hash_bytes),
        client_name: "tester".to_string(),
        listen_port: 4662,
        server_keep_alive_timeout: Duration::from_secs(600),
        ..SessionSettings::default()
    };
    (listener, settings)
}

async fn read_wire_frame(stream: &mut TcpStream) -> (u8, u8, Vec<u8>) {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).await.unwrap();
    let size = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
    let mut payload = vec![0u8; size - 1];
    stream.read_exact(&mut payload).await.unwrap();
    (header[0], header[5], payload)
}

async fn write_wire_frame(stream: &mut TcpStream, protocol: u8, opcode: u8, payload: &[u8]) {
    let mut wire = Vec::with_capacity(HEADER_LEN + payload.len());
    wire.push(protocol);
    wire.extend_from_slice(&(payload.len() as u32 + 1).to_le_bytes());
    wire.push(opcode);
    wire.extend_from_slice(payload);
    stream.write_all(&wire).await.unwrap();
}

async fn write_message(stream: &mut TcpStream, message: &Message) {
    write_wire_frame(stream, PROTO_EDONKEY, message.opcode(), &message.encode()).await;
}

/// Accepts the client and consumes its login request.
async fn accept_with_login(listener: &TcpListener, settings: &SessionSettings) -> TcpStream {
    let (mut stream, _) = listener.accept().await.unwrap();
    let (protocol, opcode, payload) = read_wire_frame(&mut stream).await;
    assert_eq!(protocol, PROTO_EDONKEY);
    assert_eq!(opcode, Opcode::LoginRequest as u8);

    let login = match Message::decode(opcode, Bytes::from(payload)).unwrap() {
        Message::LoginRequest(login) => login,
        other => panic!("expected login request, got {other:?}"),
    };
    assert_eq!(login.hash, settings.client_hash);
    assert_eq!(login.client_id, 0);
    assert_eq!(login.port, settings.listen_port);

    stream
}

/// Sends the status + id-change pair that makes the connection ready.
async fn make_ready(stream: &mut TcpStream) {
    write_message(
        stream,
        &Message::ServerStatus {
            users: 10,
            files: 100,
        },
    )
    .await;
    write_message(
        stream,
        &Message::IdChange(IdChange {
            client_id: 0x01020304,
            tcp_flags: 1,
            aux_port: 4663,
        }),
    )
    .await;
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn deflate(data: &[u8]) -> Vec<u8> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

// ============================================================================
// End-to-end scenarios
// ============================================================================

#[tokio::test]
async fn test_happy_path_login() {
    let (listener, settings) = local_server().await;
    let session = FakeSession::new(settings.clone());
    let connection = ServerConnection::new(session.clone());
    connection.start();

    let mut stream = accept_with_login(&listener, &settings).await;

    write_message(
        &mut stream,
        &Message::ServerMessage {
            message: "hi".to_string(),
        },
    )
    .await;
    make_ready(&mut stream).await;

    wait_until(|| connection.state() == ConnectionState::Ready).await;

    assert_eq!(
        session.alert_kinds(),
        vec![
            AlertKind::ServerMessage,
            AlertKind::ServerStatus,
            AlertKind::ServerConnectionInitialized,
        ]
    );

    let alerts = session.alerts.lock();
    assert!(matches!(
        &alerts[0],
        Alert::ServerMessage { message } if message == "hi"
    ));
    assert!(matches!(
        alerts[1],
        Alert::ServerStatus {
            users: 10,
            files: 100
        }
    ));
    assert!(matches!(
        alerts[2],
        Alert::ServerConnectionInitialized {
            client_id: 0x01020304,
            files: 100,
            users: 10
        }
    ));
    drop(alerts);

    assert_eq!(
        *session.ready_calls.lock(),
        vec![(0x01020304, 100, 10, 1, 4663)]
    );
    assert_eq!(connection.client_id(), 0x01020304);
    assert_eq!(session.stopped(), 0);
}

#[tokio::test]
async fn test_ready_fires_once_in_either_order() {
    let (listener, settings) = local_server().await;
    let session = FakeSession::new(settings.clone());
    let connection = ServerConnection::new(session.clone());
    connection.start();

    let mut stream = accept_with_login(&listener, &settings).await;

    // Id first, then status, then repeats of both.
    write_message(
        &mut stream,
        &Message::IdChange(IdChange {
            client_id: 0x0A0B0C0D,
            tcp_flags: 0,
            aux_port: 0,
        }),
    )
    .await;
    write_message(&mut stream, &Message::ServerStatus { users: 1, files: 2 }).await;
    write_message(&mut stream, &Message::ServerStatus { users: 3, files: 4 }).await;
    write_message(
        &mut stream,
        &Message::IdChange(IdChange {
            client_id: 0x0A0B0C0E,
            tcp_flags: 0,
            aux_port: 0,
        }),
    )
    .await;

    wait_until(|| connection.client_id() == 0x0A0B0C0E).await;

    assert_eq!(session.ready_calls.lock().len(), 1);
    assert_eq!(
        session
            .alert_kinds()
            .iter()
            .filter(|k| **k == AlertKind::ServerConnectionInitialized)
            .count(),
        1
    );
    // Later frames still refresh the cached fields.
    assert_eq!(connection.client_id(), 0x0A0B0C0E);
}

#[tokio::test]
async fn test_connect_timeout() {
    // 192.0.2.0/24 is reserved for documentation and not routed.
    let settings = SessionSettings {
        server_hostname: "192.0.2.1".to_string(),
        server_port: 4661,
        peer_connect_timeout: Duration::from_millis(200),
        ..SessionSettings::default()
    };
    let session = FakeSession::new(settings);
    let connection = ServerConnection::new(session.clone());
    connection.start();

    wait_until(|| session.stopped() == 1).await;

    assert_eq!(connection.state(), ConnectionState::Closed);
    assert!(connection.is_stopped());

    let alerts = session.alerts.lock();
    assert_eq!(alerts.len(), 1);
    // An unrouted address usually hangs until the deadline, but some
    // hosts refuse it outright; both terminate the connection.
    assert!(matches!(
        &alerts[0],
        Alert::ServerConnectionFailed {
            error: ServerError::TimedOut | ServerError::ConnectFailed(_)
        }
    ));
}

#[tokio::test]
async fn test_operation_timeout_after_connect() {
    let (listener, settings) = local_server().await;
    let settings = SessionSettings {
        server_timeout: Duration::from_millis(200),
        ..settings
    };
    let session = FakeSession::new(settings.clone());
    let connection = ServerConnection::new(session.clone());
    connection.start();

    // Accept the login and then go silent.
    let _stream = accept_with_login(&listener, &settings).await;

    wait_until(|| session.stopped() == 1).await;

    assert_eq!(connection.state(), ConnectionState::Closed);
    let alerts = session.alerts.lock();
    assert!(matches!(
        &alerts[0],
        Alert::ServerConnectionFailed {
            error: ServerError::TimedOut
        }
    ));
}

#[tokio::test]
async fn test_compressed_search_result() {
    let (listener, settings) = local_server().await;
    let session = FakeSession::new(settings.clone());
    let connection = ServerConnection::new(session.clone());
    connection.start();

    let mut stream = accept_with_login(&listener, &settings).await;
    make_ready(&mut stream).await;

    let results = Message::SearchResult {
        results: vec![test_entry(), test_entry()],
    };
    let packed = deflate(&results.encode());
    write_wire_frame(&mut stream, PROTO_PACKED, results.opcode(), &packed).await;

    wait_until(|| {
        session
            .alert_kinds()
            .contains(&AlertKind::SearchResult)
    })
    .await;

    let alerts = session.alerts.lock();
    let found = alerts
        .iter()
        .find_map(|alert| match alert {
            Alert::SearchResult { results } => Some(results.len()),
            _ => None,
        })
        .unwrap();
    assert_eq!(found, 2);
    drop(alerts);

    assert_eq!(connection.state(), ConnectionState::Ready);
    assert_eq!(session.stopped(), 0);
}

#[tokio::test]
async fn test_corrupt_packed_frame_is_dropped() {
    let (listener, settings) = local_server().await;
    let session = FakeSession::new(settings.clone());
    let connection = ServerConnection::new(session.clone());
    connection.start();

    let mut stream = accept_with_login(&listener, &settings).await;
    write_wire_frame(&mut stream, PROTO_PACKED, 0x33, b"not a zlib stream").await;
    write_message(
        &mut stream,
        &Message::ServerMessage {
            message: "still here".to_string(),
        },
    )
    .await;

    wait_until(|| {
        session
            .alert_kinds()
            .contains(&AlertKind::ServerMessage)
    })
    .await;

    assert!(!connection.is_stopped());
    assert_eq!(session.stopped(), 0);
}

#[tokio::test]
async fn test_keepalive() {
    let (listener, settings) = local_server().await;
    let settings = SessionSettings {
        server_keep_alive_timeout: Duration::from_millis(100),
        ..settings
    };
    let session = FakeSession::new(settings.clone());
    let connection = ServerConnection::new(session.clone());
    connection.start();

    let mut stream = accept_with_login(&listener, &settings).await;
    make_ready(&mut stream).await;

    let (protocol, opcode, payload) =
        timeout(Duration::from_secs(5), read_wire_frame(&mut stream))
            .await
            .expect("no keepalive within the period");

    assert_eq!(protocol, PROTO_EDONKEY);
    assert_eq!(opcode, Opcode::OfferFiles as u8);
    assert_eq!(payload, vec![0u8, 0, 0, 0]);
    assert!(!connection.is_stopped());
}

#[tokio::test]
async fn test_sources_for_transfer() {
    let (listener, settings) = local_server().await;
    let session = FakeSession::new(settings.clone());
    let connection = ServerConnection::new(session.clone());
    connection.start();

    let mut stream = accept_with_login(&listener, &settings).await;
    make_ready(&mut stream).await;
    wait_until(|| connection.state() == ConnectionState::Ready).await;

    let hash = test_hash();
    let transfer = session.add_transfer(hash);
    connection.post_sources_request(hash, 1_000_000);

    let (_, opcode, payload) = read_wire_frame(&mut stream).await;
    assert_eq!(opcode, Opcode::GetSources as u8);
    assert_eq!(
        Message::decode(opcode, Bytes::from(payload)).unwrap(),
        Message::GetSources {
            hash,
            size: 1_000_000
        }
    );

    let p1 = Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 4662);
    let p2 = Endpoint::new(Ipv4Addr::new(10, 0, 0, 2), 4663);
    write_message(
        &mut stream,
        &Message::FoundSources {
            hash,
            sources: vec![p1, p2],
        },
    )
    .await;

    wait_until(|| !transfer.sources.lock().is_empty()).await;
    assert_eq!(*transfer.sources.lock(), vec![vec![p1, p2]]);
}

#[tokio::test]
async fn test_sources_for_dead_transfer_are_dropped() {
    let (listener, settings) = local_server().await;
    let session = FakeSession::new(settings.clone());
    let connection = ServerConnection::new(session.clone());
    connection.start();

    let mut stream = accept_with_login(&listener, &settings).await;
    make_ready(&mut stream).await;

    write_message(
        &mut stream,
        &Message::FoundSources {
            hash: test_hash(),
            sources: vec![Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 4662)],
        },
    )
    .await;
    write_message(
        &mut stream,
        &Message::ServerMessage {
            message: "after".to_string(),
        },
    )
    .await;

    wait_until(|| {
        session
            .alert_kinds()
            .contains(&AlertKind::ServerMessage)
    })
    .await;
    assert!(!connection.is_stopped());
}

#[tokio::test]
async fn test_invalid_protocol_byte_closes_connection() {
    let (listener, settings) = local_server().await;
    let session = FakeSession::new(settings.clone());
    let connection = ServerConnection::new(session.clone());
    connection.start();

    let mut stream = accept_with_login(&listener, &settings).await;
    stream
        .write_all(&[0xAAu8, 0x01, 0x00, 0x00, 0x00, 0x15])
        .await
        .unwrap();

    wait_until(|| session.stopped() == 1).await;

    assert_eq!(connection.state(), ConnectionState::Closed);
    let alerts = session.alerts.lock();
    assert!(matches!(
        &alerts[0],
        Alert::ServerConnectionFailed {
            error: ServerError::InvalidProtocolType(0xAA)
        }
    ));
}

#[tokio::test]
async fn test_malformed_recognized_frame_closes_connection() {
    let (listener, settings) = local_server().await;
    let session = FakeSession::new(settings.clone());
    let connection = ServerConnection::new(session.clone());
    connection.start();

    let mut stream = accept_with_login(&listener, &settings).await;
    // A server status frame with a truncated payload.
    write_wire_frame(&mut stream, PROTO_EDONKEY, Opcode::ServerStatus as u8, &[1, 2]).await;

    wait_until(|| session.stopped() == 1).await;

    let alerts = session.alerts.lock();
    assert!(matches!(
        &alerts[0],
        Alert::ServerConnectionFailed {
            error: ServerError::DecodePacket(_)
        }
    ));
}

#[tokio::test]
async fn test_unknown_opcode_is_skipped() {
    let (listener, settings) = local_server().await;
    let session = FakeSession::new(settings.clone());
    let connection = ServerConnection::new(session.clone());
    connection.start();

    let mut stream = accept_with_login(&listener, &settings).await;
    write_wire_frame(&mut stream, PROTO_EDONKEY, 0x7E, &[1, 2, 3]).await;
    write_message(
        &mut stream,
        &Message::ServerMessage {
            message: "next".to_string(),
        },
    )
    .await;

    wait_until(|| {
        session
            .alert_kinds()
            .contains(&AlertKind::ServerMessage)
    })
    .await;
    assert!(!connection.is_stopped());
}

#[tokio::test]
async fn test_close_is_idempotent_and_silent() {
    let (listener, settings) = local_server().await;
    let session = FakeSession::new(settings.clone());
    let connection = ServerConnection::new(session.clone());
    connection.start();

    let _stream = accept_with_login(&listener, &settings).await;
    wait_until(|| connection.initializing()).await;

    connection.close(None);
    connection.close(None);

    assert_eq!(connection.state(), ConnectionState::Closed);
    assert_eq!(session.stopped(), 1);
    assert!(session.alerts.lock().is_empty());

    // Posting after close is a silent no-op.
    connection.post_announce(Vec::new());
    connection.post_search_request(Bytes::new());
    sleep(Duration::from_millis(50)).await;
    assert!(session.alerts.lock().is_empty());
}

#[tokio::test]
async fn test_close_with_reason_posts_one_failure_alert() {
    let (listener, settings) = local_server().await;
    let session = FakeSession::new(settings.clone());
    let connection = ServerConnection::new(session.clone());
    connection.start();

    let _stream = accept_with_login(&listener, &settings).await;

    // A session tearing itself down closes with a classified reason.
    connection.close(Some(ServerError::SessionClosing));
    connection.close(Some(ServerError::SessionClosing));

    assert_eq!(connection.state(), ConnectionState::Closed);
    assert_eq!(session.stopped(), 1);

    let alerts = session.alerts.lock();
    assert_eq!(alerts.len(), 1);
    assert!(matches!(
        &alerts[0],
        Alert::ServerConnectionFailed {
            error: ServerError::SessionClosing
        }
    ));
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let (listener, settings) = local_server().await;
    let session = FakeSession::new(settings.clone());
    let connection = ServerConnection::new(session.clone());
    connection.start();
    connection.start();

    // Exactly one login arrives even with a second start call.
    let mut stream = accept_with_login(&listener, &settings).await;
    make_ready(&mut stream).await;
    wait_until(|| connection.state() == ConnectionState::Ready).await;
    assert_eq!(session.ready_calls.lock().len(), 1);
}

#[tokio::test]
async fn test_muted_alert_kinds_are_not_posted() {
    let (listener, settings) = local_server().await;
    let mut session = FakeSession::new(settings.clone());
    Arc::get_mut(&mut session).unwrap().muted = vec![AlertKind::ServerMessage];
    let connection = ServerConnection::new(session.clone());
    connection.start();

    let mut stream = accept_with_login(&listener, &settings).await;
    write_message(
        &mut stream,
        &Message::ServerMessage {
            message: "muted".to_string(),
        },
    )
    .await;
    make_ready(&mut stream).await;

    wait_until(|| connection.state() == ConnectionState::Ready).await;

    assert_eq!(
        session.alert_kinds(),
        vec![
            AlertKind::ServerStatus,
            AlertKind::ServerConnectionInitialized,
        ]
    );
}

#[tokio::test]
async fn test_announce_and_auxiliary_requests() {
    let (listener, settings) = local_server().await;
    let session = FakeSession::new(settings.clone());
    let connection = ServerConnection::new(session.clone());
    connection.start();

    let mut stream = accept_with_login(&listener, &settings).await;
    make_ready(&mut stream).await;
    wait_until(|| connection.state() == ConnectionState::Ready).await;

    connection.post_announce(vec![test_entry()]);
    connection.post_server_list_request();
    connection.post_callback_request(0x42);

    let (_, opcode, payload) = read_wire_frame(&mut stream).await;
    assert_eq!(opcode, Opcode::OfferFiles as u8);
    match Message::decode(opcode, Bytes::from(payload)).unwrap() {
        Message::OfferFiles { files } => assert_eq!(files, vec![test_entry()]),
        other => panic!("expected offer files, got {other:?}"),
    }

    let (_, opcode, payload) = read_wire_frame(&mut stream).await;
    assert_eq!(opcode, Opcode::GetServerList as u8);
    assert!(payload.is_empty());

    let (_, opcode, payload) = read_wire_frame(&mut stream).await;
    assert_eq!(opcode, Opcode::CallbackRequest as u8);
    assert_eq!(
        Message::decode(opcode, Bytes::from(payload)).unwrap(),
        Message::CallbackRequest { client_id: 0x42 }
    );
}

#[tokio::test]
async fn test_server_ident_is_cached() {
    let (listener, settings) = local_server().await;
    let session = FakeSession::new(settings.clone());
    let connection = ServerConnection::new(session.clone());
    connection.start();

    let mut stream = accept_with_login(&listener, &settings).await;
    let ident = ServerIdent {
        hash: test_hash(),
        endpoint: Endpoint::new(Ipv4Addr::new(4, 4, 4, 4), 4661),
        tags: TagList::new(),
    };
    write_message(&mut stream, &Message::ServerIdent(ident.clone())).await;

    wait_until(|| connection.server_ident().is_some()).await;
    assert_eq!(connection.server_ident().unwrap(), ident);
}
