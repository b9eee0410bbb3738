//! End-to-end integration tests for capfs.
//!
//! These tests verify complete flows over real TCP connections:
//! - Server startup and shutdown
//! - Login and the access-control scenario
//! - Concurrent readers and writer exclusion
//! - Registry capacity

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use daemon::client::{ClientError, FileClient};
use daemon::config::{Config, TimingConfig};
use daemon::server::{FileServer, ServerState};
use protocol::{Command, Permissions, Response, Status};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Create a test configuration bound to an ephemeral local port.
fn create_test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.server.bind_address = "127.0.0.1".to_string();
    config.server.port = 0;
    config.server.storage_dir = temp_dir.path().to_path_buf();
    config.timing = TimingConfig::immediate();
    config
}

async fn start_server(config: Config) -> (FileServer, SocketAddr) {
    let mut server = FileServer::new(config).unwrap();
    let addr = server.start().await.unwrap();
    (server, addr)
}

async fn login(addr: SocketAddr, user: &str, group: &str) -> FileClient {
    let mut client = FileClient::connect(addr).await.unwrap();
    let response = client.login(user, group).await.unwrap();
    assert_eq!(response.status, Status::LoginOk);
    client
}

// =============================================================================
// Access Control
// =============================================================================

#[tokio::test]
async fn test_permission_change_scenario() {
    let temp_dir = TempDir::new().unwrap();
    let (server, addr) = start_server(create_test_config(&temp_dir)).await;

    let mut alice = login(addr, "alice", "G1").await;
    let mut bob = login(addr, "bob", "G2").await;

    let created = alice.send_line("create f1 rwrnnn").await.unwrap();
    assert_eq!(created.status, Status::Ok);

    let denied = bob.send_line("read f1").await.unwrap();
    assert_eq!(denied.status, Status::PermissionDenied);

    let changed = alice.send_line("change f1 rwrwrw").await.unwrap();
    assert_eq!(changed.status, Status::Ok);

    let read = bob.send_line("read f1").await.unwrap();
    assert_eq!(read.status, Status::Ok);
    assert_eq!(read.message, "Init file: f1");

    assert_eq!(
        std::fs::read_to_string(temp_dir.path().join("f1")).unwrap(),
        "Init file: f1\n"
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_group_member_uses_group_bits() {
    let temp_dir = TempDir::new().unwrap();
    let (server, addr) = start_server(create_test_config(&temp_dir)).await;

    let mut alice = login(addr, "alice", "G1").await;
    let mut carol = login(addr, "carol", "G1").await;
    let mut bob = login(addr, "bob", "G2").await;

    alice.send_line("create f1 rnrwnn").await.unwrap();

    // Owner bits lack write even though group bits grant it.
    assert_eq!(
        alice.send_line("write f1 a").await.unwrap().status,
        Status::PermissionDenied
    );
    assert_eq!(
        carol.send_line("write f1 a").await.unwrap().status,
        Status::Ok
    );
    assert_eq!(
        bob.send_line("read f1").await.unwrap().status,
        Status::PermissionDenied
    );
    // Only the owner may change permissions, regardless of group.
    assert_eq!(
        carol.send_line("change f1 rwrwrw").await.unwrap().status,
        Status::NotOwner
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_write_then_read_returns_record() {
    let temp_dir = TempDir::new().unwrap();
    let (server, addr) = start_server(create_test_config(&temp_dir)).await;
    let mut alice = login(addr, "alice", "G1").await;

    let create = Command::Create {
        name: "notes".to_string(),
        perms: Permissions::parse("rwnnnn").unwrap(),
    };
    assert_eq!(alice.send(&create).await.unwrap().status, Status::Ok);

    let write = alice.send_line("write notes o").await.unwrap();
    assert_eq!(write.status, Status::Ok);

    let read = alice.send_line("read notes").await.unwrap();
    assert_eq!(read.status, Status::Ok);
    assert!(read.message.starts_with("alice wrote here at "));
    assert_eq!(read.message.lines().count(), 1);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_timed_out_client_does_not_pair_stale_response() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = create_test_config(&temp_dir);
    config.timing.write_delay_ms = 300;
    let (server, addr) = start_server(config).await;
    let mut alice = login(addr, "alice", "G1").await;

    let create = alice.send_line("create f1 rwnnnn").await.unwrap();
    assert_eq!(create.status, Status::Ok);

    alice.set_timeout(Some(Duration::from_millis(50)));
    let err = alice.send_line("write f1 a").await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout));

    let err = alice.send_line("read f1").await.unwrap_err();
    assert!(matches!(err, ClientError::Closed));

    // A new connection sees the write once it completes.
    let mut again = login(addr, "alice", "G1").await;
    let read = again.send_line("read f1").await.unwrap();
    assert_eq!(read.status, Status::Ok);
    assert!(read.message.contains("alice wrote here at "));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_error_responses_keep_session_open() {
    let temp_dir = TempDir::new().unwrap();
    let (server, addr) = start_server(create_test_config(&temp_dir)).await;
    let mut alice = login(addr, "alice", "G1").await;

    let cases = [
        ("create f1 rwx", Status::FormatError),
        ("create f1 rwrnnnn", Status::FormatError),
        ("create ../escape rwrnnn", Status::FormatError),
        ("read missing", Status::NotFound),
        ("remove f1", Status::InvalidCommand),
        ("read", Status::InvalidCommand),
        ("new f1 rwrnnn", Status::Ok),
        ("create f1 rwrnnn", Status::AlreadyExists),
        ("write f1 x", Status::FormatError),
        ("change f1 rwrnnn", Status::Ok),
        ("change f1 rwrnnn", Status::Ok),
    ];
    for (line, expected) in cases {
        let response = alice.send_line(line).await.unwrap();
        assert_eq!(response.status, expected, "{}", line);
    }

    assert!(!temp_dir.path().parent().unwrap().join("escape").exists());
    server.stop().await.unwrap();
}

// =============================================================================
// Login
// =============================================================================

#[tokio::test]
async fn test_login_rejected_by_allow_list() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = create_test_config(&temp_dir);
    config.access.allowed_groups = vec!["staff".to_string()];
    let (server, addr) = start_server(config).await;

    let mut client = FileClient::connect(addr).await.unwrap();
    let err = client.login("eve", "guests").await.unwrap_err();
    assert!(matches!(err, ClientError::LoginRejected(_)));

    let mut client = FileClient::connect(addr).await.unwrap();
    assert_eq!(
        client.login("sam", "staff").await.unwrap().status,
        Status::LoginOk
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_raw_protocol_lines() {
    let temp_dir = TempDir::new().unwrap();
    let (server, addr) = start_server(create_test_config(&temp_dir)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"alice G1\r\ncreate f1 rwrnnn\r\n")
        .await
        .unwrap();

    let mut received = String::new();
    let mut buf = [0u8; 1024];
    while received.matches('\n').count() < 2 {
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "server closed early");
        received.push_str(std::str::from_utf8(&buf[..n]).unwrap());
    }

    let responses: Vec<Response> = received
        .lines()
        .map(|line| Response::from_json(line).unwrap())
        .collect();
    assert_eq!(responses[0].status, Status::LoginOk);
    assert_eq!(responses[1].status, Status::Ok);

    server.stop().await.unwrap();
}

// =============================================================================
// Capacity
// =============================================================================

#[tokio::test]
async fn test_space_exhausted() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = create_test_config(&temp_dir);
    config.registry.capacity = 3;
    let (server, addr) = start_server(config).await;
    let mut alice = login(addr, "alice", "G1").await;

    for i in 0..3 {
        let response = alice.send_line(&format!("create f{} rwrnnn", i)).await.unwrap();
        assert_eq!(response.status, Status::Ok);
    }
    assert_eq!(
        alice.send_line("create f3 rwrnnn").await.unwrap().status,
        Status::SpaceExhausted
    );
    // Existing entries are still usable.
    assert_eq!(
        alice.send_line("read f0").await.unwrap().status,
        Status::Ok
    );
    assert_eq!(server.registry().len(), 3);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_creates_fill_exactly_capacity() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = create_test_config(&temp_dir);
    config.registry.capacity = 5;
    let (server, addr) = start_server(config).await;

    let mut handles = Vec::new();
    for i in 0..12 {
        handles.push(tokio::spawn(async move {
            let mut client = login(addr, &format!("user{}", i), "G1").await;
            client
                .send_line(&format!("create f{} rwrwrw", i))
                .await
                .unwrap()
                .status
        }));
    }

    let mut ok = 0;
    let mut exhausted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Status::Ok => ok += 1,
            Status::SpaceExhausted => exhausted += 1,
            other => panic!("unexpected status {}", other),
        }
    }
    assert_eq!(ok, 5);
    assert_eq!(exhausted, 7);

    server.stop().await.unwrap();
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_concurrent_readers_share_entry() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = create_test_config(&temp_dir);
    config.timing = TimingConfig {
        read_delay_ms: 400,
        write_delay_ms: 0,
    };
    let (server, addr) = start_server(config).await;

    let mut alice = login(addr, "alice", "G1").await;
    alice.send_line("create f1 rwrwrw").await.unwrap();

    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..4 {
        handles.push(tokio::spawn(async move {
            let mut client = login(addr, &format!("reader{}", i), "G2").await;
            client.send_line("read f1").await.unwrap().status
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), Status::Ok);
    }

    // Serialized reads would take at least 1600ms.
    assert!(start.elapsed() < Duration::from_millis(1400));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_writer_excludes_reader() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = create_test_config(&temp_dir);
    config.timing = TimingConfig {
        read_delay_ms: 0,
        write_delay_ms: 300,
    };
    config.session.contention_notice = true;
    let (server, addr) = start_server(config).await;

    let mut alice = login(addr, "alice", "G1").await;
    alice.send_line("create f1 rwrwrw").await.unwrap();
    let mut bob = login(addr, "bob", "G2").await;

    let writer = tokio::spawn(async move { alice.send_line("write f1 o").await.unwrap() });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let read_start = Instant::now();
    let read = bob.send_line("read f1").await.unwrap();
    let waited = read_start.elapsed();
    let write = writer.await.unwrap();

    assert_eq!(write.status, Status::Ok);
    assert_eq!(read.status, Status::Ok);
    // The reader queued behind the writer and saw the finished record.
    assert!(waited >= Duration::from_millis(200));
    assert!(read.message.starts_with("alice wrote here at "));
    assert_eq!(bob.notices_received(), 1);

    server.stop().await.unwrap();
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_shutdown_ends_sessions_and_releases_locks() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = create_test_config(&temp_dir);
    config.timing = TimingConfig {
        read_delay_ms: 0,
        write_delay_ms: 60_000,
    };
    let (server, addr) = start_server(config).await;

    let mut alice = login(addr, "alice", "G1").await;
    alice.send_line("create f1 rwrwrw").await.unwrap();

    let pending = tokio::spawn(async move { alice.send_line("write f1 a").await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let entry = server.registry().lookup("f1").unwrap();
    assert!(entry.try_read().is_none());

    tokio::time::timeout(Duration::from_secs(5), server.stop())
        .await
        .expect("stop should not wait for the slow write")
        .unwrap();
    assert_eq!(server.state().await, ServerState::Stopped);
    assert!(entry.try_write().is_some());

    let result = pending.await.unwrap();
    assert!(matches!(
        result,
        Err(ClientError::Closed) | Err(ClientError::Io(_))
    ));

    assert!(FileClient::connect(addr).await.is_err());
}
