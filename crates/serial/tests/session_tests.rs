//! Session lifecycle integration tests
//!
//! Runs two controllers (server role and client role) against the
//! in-memory hub transport and drives full sessions through the façade:
//! establishment in both roles, byte transfer, delimiter extraction,
//! subscriptions, teardown, and the failure paths.
//!
//! Run with: `cargo test -p serial --test session_tests`

use std::sync::Arc;
use std::time::Duration;

use common::{LinkError, granted_bridge};
use serial::{LinkConfig, Phase, Role, SerialController};
use transport::{MemoryHub, MemoryTransport, PeerAddr};

type Controller = Arc<SerialController<MemoryTransport>>;

fn controller(node: MemoryTransport) -> Controller {
    Arc::new(SerialController::new(
        node,
        granted_bridge(),
        LinkConfig::default(),
    ))
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(cond(), "condition not reached in time");
}

/// Connect, retrying while the acceptor's listening endpoint is still
/// being opened (a refused attempt resets the machine to Idle).
async fn connect_with_retry(client: &Controller, addr: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        match client.connect(addr.into(), true).await {
            Ok(()) => return,
            Err(LinkError::Io(_)) if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Err(e) => panic!("connect failed: {}", e),
        }
    }
}

/// Bring up a connected server/client controller pair.
async fn establish(hub: &MemoryHub) -> (Controller, Controller) {
    let server = controller(hub.node("server"));
    let client = controller(hub.node("client"));

    let listener = server.clone();
    let listen = tokio::spawn(async move {
        listener.listen().await.expect("listen should succeed");
    });

    connect_with_retry(&client, "server").await;
    listen.await.unwrap();

    (server, client)
}

#[tokio::test]
async fn test_session_establishment_and_roles() {
    let hub = MemoryHub::new();
    let (server, client) = establish(&hub).await;

    assert!(server.is_connected().await);
    assert!(client.is_connected().await);
    assert_eq!(server.phase(), Phase::Connected);
    assert_eq!(client.phase(), Phase::Connected);
    assert_eq!(server.session().unwrap().role, Role::Server);
    assert_eq!(client.session().unwrap().role, Role::Client);
    assert_eq!(
        client.session().unwrap().peer.addr,
        PeerAddr::from("server")
    );
}

#[tokio::test]
async fn test_bidirectional_transfer() -> anyhow::Result<()> {
    let hub = MemoryHub::new();
    let (server, client) = establish(&hub).await;

    client.write(b"ping").await?;
    let inbound = server.read().await?;
    assert_eq!(&inbound[..], b"ping");

    server.write(b"pong").await?;
    let inbound = client.read().await?;
    assert_eq!(&inbound[..], b"pong");
    Ok(())
}

#[tokio::test]
async fn test_available_reports_buffered_count() -> anyhow::Result<()> {
    let hub = MemoryHub::new();
    let (server, client) = establish(&hub).await;

    assert_eq!(server.available().await?, 0);
    client.write(b"abc").await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let buffered = server.available().await?;
        if buffered >= 3 {
            assert_eq!(buffered, 3);
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "data never arrived in the session buffer"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(())
}

#[tokio::test]
async fn test_read_until_returns_delimiter_inclusive() -> anyhow::Result<()> {
    let hub = MemoryHub::new();
    let (server, client) = establish(&hub).await;

    client.write(b"abc\n").await?;
    let line = server.read_until(b"\n").await?;
    assert_eq!(&line[..], b"abc\n");
    Ok(())
}

#[tokio::test]
async fn test_read_until_eof_is_no_data() {
    let hub = MemoryHub::new();
    let (server, client) = establish(&hub).await;

    client.write(b"abc").await.unwrap();
    client.disconnect().await.unwrap();

    let err = server.read_until(b"\n").await.unwrap_err();
    assert!(matches!(err, LinkError::NoData));
}

#[tokio::test]
async fn test_subscription_ends_at_delimiter() {
    let hub = MemoryHub::new();
    let (server, client) = establish(&hub).await;

    let mut rx = server.subscribe(b";").await.unwrap();
    client.write(b"xy;z").await.unwrap();

    let mut received = Vec::new();
    while let Some(item) = rx.recv().await {
        received.extend_from_slice(&item.unwrap());
    }
    // The subscription ends at the delimiter; "z" is never delivered.
    assert_eq!(received, b"xy;");
}

#[tokio::test]
async fn test_second_subscription_rejected() {
    let hub = MemoryHub::new();
    let (server, _client) = establish(&hub).await;

    let _rx = server.subscribe(b"\n").await.unwrap();
    let err = server.subscribe(b"\n").await.unwrap_err();
    assert!(matches!(err, LinkError::AlreadyActive("subscription")));
}

#[tokio::test]
async fn test_disconnect_ends_subscription_without_hanging() {
    let hub = MemoryHub::new();
    let (server, _client) = establish(&hub).await;

    let mut rx = server.subscribe(b"\n").await.unwrap();
    server.disconnect().await.unwrap();

    // The channel closes rather than hanging; no chunk is an error we
    // cannot explain.
    while let Some(item) = rx.recv().await {
        match item {
            Ok(_) => {}
            Err(LinkError::NotConnected) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert!(!server.is_connected().await);
}

#[tokio::test]
async fn test_connect_while_listening_is_already_active() {
    let hub = MemoryHub::new();
    let server = controller(hub.node("server"));
    let client = controller(hub.node("client"));

    let listener = server.clone();
    let listen = tokio::spawn(async move { listener.listen().await });
    wait_for({
        let server = server.clone();
        move || server.phase() == Phase::Listening
    })
    .await;

    // A second attempt on the same controller is rejected; the original
    // listen keeps going and still completes.
    let err = server.connect("client".into(), true).await.unwrap_err();
    assert!(matches!(err, LinkError::AlreadyActive("listen")));

    connect_with_retry(&client, "server").await;
    listen.await.unwrap().unwrap();
    assert!(server.is_connected().await);
}

#[tokio::test]
async fn test_inbound_while_connected_is_rejected() {
    let hub = MemoryHub::new();
    let (server, client) = establish(&hub).await;

    // The listening endpoint closed after the first session, so a
    // latecomer is refused outright.
    let late = controller(hub.node("late"));
    let err = late.connect("server".into(), true).await.unwrap_err();
    assert!(matches!(err, LinkError::Io(_)));

    // The active session is unaffected.
    assert!(server.is_connected().await);
    client.write(b"still alive").await.unwrap();
    assert_eq!(&server.read().await.unwrap()[..], b"still alive");
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let hub = MemoryHub::new();
    let (_server, client) = establish(&hub).await;

    client.disconnect().await.unwrap();
    let err = client.disconnect().await.unwrap_err();
    assert!(matches!(err, LinkError::NotConnected));
}

#[tokio::test]
async fn test_write_after_peer_close_fails_and_disconnects() {
    let hub = MemoryHub::new();
    let (server, client) = establish(&hub).await;

    client.disconnect().await.unwrap();

    // The pipe may absorb a write or two before the close is observed;
    // keep writing until the failure surfaces.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let mut failed = false;
    while tokio::time::Instant::now() < deadline {
        match server.write(b"payload").await {
            Ok(()) => tokio::time::sleep(Duration::from_millis(5)).await,
            Err(LinkError::Io(_)) | Err(LinkError::NotConnected) => {
                failed = true;
                break;
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert!(failed);
    assert!(!server.is_connected().await);
    assert_eq!(server.phase(), Phase::Idle);
}

#[tokio::test]
async fn test_reconnect_after_session_ends() -> anyhow::Result<()> {
    let hub = MemoryHub::new();
    let (server, client) = establish(&hub).await;

    client.disconnect().await?;
    // End-of-stream alone does not clear the server's session; it tears
    // down explicitly before taking the other role.
    server.disconnect().await?;

    // Both sides can run a fresh session afterwards, roles swapped.
    let listener = client.clone();
    let listen = tokio::spawn(async move { listener.listen().await });
    connect_with_retry(&server, "client").await;
    listen.await??;

    assert_eq!(server.session().unwrap().role, Role::Client);
    assert_eq!(client.session().unwrap().role, Role::Server);

    server.write(b"second life").await?;
    assert_eq!(&client.read().await?[..], b"second life");
    Ok(())
}

#[tokio::test]
async fn test_shutdown_cancels_pending_listen() {
    let hub = MemoryHub::new();
    let server = controller(hub.node("server"));

    let listener = server.clone();
    let listen = tokio::spawn(async move { listener.listen().await });
    wait_for({
        let server = server.clone();
        move || server.phase() == Phase::Listening
    })
    .await;

    server.shutdown().await;

    let result = listen.await.unwrap();
    assert!(result.is_err());
    wait_for({
        let server = server.clone();
        move || server.phase() == Phase::Idle
    })
    .await;
}

#[tokio::test]
async fn test_list_reflects_bonded_peers() -> anyhow::Result<()> {
    let hub = MemoryHub::new();
    let node = hub.node("aa:00");
    node.bond("bb:11".into());
    let ctl = controller(node);

    assert_eq!(ctl.list().await?, vec![PeerAddr::from("bb:11")]);
    Ok(())
}
