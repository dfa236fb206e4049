//! Session actor behavior: serialization, fan-in, expiry.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Notify;

use cyan_server::client::{get_request, CyanClient};
use cyan_server::protocol::{self, Envelope, Field, FrameError, Response, ResponseKind, WireError};

mod common;

fn resource(response: &Response) -> Option<&str> {
    response.field("RESOURCE").and_then(Field::as_text)
}

#[tokio::test]
async fn one_token_two_connections_is_serialized() {
    let mut config = common::test_config();
    config.handler.privileged_targets = vec!["/a".into(), "/b".into(), "/c".into()];
    let handler = Arc::new(common::RecordingHandler::with_delay(Duration::from_millis(100)));
    let cluster = common::start_cluster(config, handler.clone()).await;

    let mut first = CyanClient::connect(&cluster.edge()).await.unwrap();
    let mut second = CyanClient::connect(&cluster.edge()).await.unwrap();

    first.send_raw(&get_request("0.1", "u1", "/a", "shared")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    second.send_raw(&get_request("0.1", "u1", "/b", "shared")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    first.send_raw(&get_request("0.1", "u1", "/c", "shared")).await.unwrap();

    let a = first.recv().await.unwrap();
    let c = first.recv().await.unwrap();
    let b = second.recv().await.unwrap();

    assert_eq!(resource(&a), Some("/a"));
    assert_eq!(resource(&b), Some("/b"));
    assert_eq!(resource(&c), Some("/c"));
    assert_eq!(handler.seen(), vec!["/a", "/b", "/c"]);
    assert_eq!(handler.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(cluster.registry.len(), 1);
}

#[tokio::test]
async fn expiry_answers_queued_requests_and_replaces_actor() {
    let mut config = common::test_config();
    config.session.ttl_secs = 1;
    let gate = Arc::new(Notify::new());
    let handler = Arc::new(common::RecordingHandler::gated(Arc::clone(&gate)));
    let cluster = common::start_cluster(config, handler).await;
    let mut client = CyanClient::connect(&cluster.edge()).await.unwrap();

    // Blocks in the handler until the gate opens.
    client.send_raw(&get_request("0.1", "u1", "/login", "tok")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let original = cluster.registry.get("tok").map(|h| h.id()).unwrap();

    let mut queued = get_request("0.1", "u1", "/x", "tok");
    queued.extend(get_request("0.1", "u1", "/y", "tok"));
    client.send_raw(&queued).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1200)).await;
    gate.notify_one();

    let login = client.recv().await.unwrap();
    assert_eq!(login.kind(), ResponseKind::Ack);
    for _ in 0..2 {
        let stale = client.recv().await.unwrap();
        assert_eq!(stale.kind(), ResponseKind::Err);
        assert_eq!(stale.code(), 304);
        assert_eq!(stale.text(), Some("Repeat request due to timeout"));
    }

    // Let the edge observe the closed link before reusing the token.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let fresh = client.get("u1", "/x", "tok").await.unwrap();
    assert_eq!(fresh.kind(), ResponseKind::Bin);
    let replacement = cluster.registry.get("tok").map(|h| h.id()).unwrap();
    assert_ne!(replacement, original);
}

#[tokio::test]
async fn link_attached_after_deadline_is_served_by_successor() {
    let mut config = common::test_config();
    config.session.ttl_secs = 1;
    let gate = Arc::new(Notify::new());
    let handler = Arc::new(common::RecordingHandler::gated(Arc::clone(&gate)));
    let cluster = common::start_cluster(config, handler).await;

    let mut first = CyanClient::connect(&cluster.edge()).await.unwrap();
    first.send_raw(&get_request("0.1", "u1", "/login", "tok")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1200)).await;
    let original = cluster.registry.get("tok").map(|h| h.id()).unwrap();

    // Past the deadline but still busy: this link lands on the old actor.
    let mut second = CyanClient::connect(&cluster.edge()).await.unwrap();
    second.send_raw(&get_request("0.1", "u1", "/x", "tok")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    gate.notify_one();

    let login = first.recv().await.unwrap();
    assert_eq!(login.kind(), ResponseKind::Ack);

    let response = tokio::time::timeout(Duration::from_secs(3), second.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.kind(), ResponseKind::Bin);
    assert_eq!(resource(&response), Some("/x"));

    let successor = cluster.registry.get("tok").map(|h| h.id()).unwrap();
    assert_ne!(successor, original);
}

async fn identified_link(addr: &str, user: &str, token: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut ident = Envelope::new();
    ident.insert("USER".into(), user.into());
    ident.insert("USER-TOKEN".into(), token.into());
    protocol::write_envelope(&mut stream, &ident).await.unwrap();
    stream
}

#[tokio::test]
async fn undecodable_frame_drops_the_link() {
    let cluster = common::start_cluster(common::test_config(), Arc::new(common::FailingHandler)).await;
    let mut link = identified_link(&cluster.session_addr.to_string(), "u1", "tok").await;

    protocol::frame::write_frame(&mut link, b"\xc1 not msgpack").await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), protocol::read_envelope(&mut link, None))
        .await
        .unwrap();
    assert!(matches!(result, Err(WireError::Frame(FrameError::ConnectionClosed))));
}

#[tokio::test]
async fn incomplete_handler_response_closes_the_link() {
    let cluster = common::start_cluster(common::test_config(), Arc::new(common::HollowHandler)).await;
    let mut link = identified_link(&cluster.session_addr.to_string(), "u1", "tok").await;

    let mut parser = protocol::RequestParser::new();
    parser.feed(&get_request("0.1", "u1", "/login", "tok")).unwrap();
    let request = parser.into_request().unwrap();
    protocol::write_envelope(&mut link, &request.to_envelope()).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), protocol::read_envelope(&mut link, None))
        .await
        .unwrap();
    assert!(matches!(result, Err(WireError::Frame(FrameError::ConnectionClosed))));
    assert_eq!(cluster.registry.len(), 1);
}

#[tokio::test]
async fn identification_without_token_is_rejected() {
    let cluster = common::start_cluster(common::test_config(), Arc::new(common::FailingHandler)).await;
    let mut link = TcpStream::connect(cluster.session_addr).await.unwrap();
    let mut ident = Envelope::new();
    ident.insert("USER".into(), "u1".into());
    protocol::write_envelope(&mut link, &ident).await.unwrap();

    let envelope = protocol::read_envelope(&mut link, None).await.unwrap();
    let response = Response::from_envelope(envelope).unwrap();
    assert_eq!(response.kind(), ResponseKind::Err);
    assert_eq!(response.code(), 400);
    assert!(cluster.registry.is_empty());
}

#[tokio::test]
async fn session_link_speaks_envelopes() {
    let cluster = common::start_cluster(common::test_config(), Arc::new(common::FailingHandler)).await;
    let mut link = identified_link(&cluster.session_addr.to_string(), "u1", "tok").await;

    let mut parser = protocol::RequestParser::new();
    parser.feed(&get_request("0.1", "u1", "/feed", "tok")).unwrap();
    let request = parser.into_request().unwrap();
    protocol::write_envelope(&mut link, &request.to_envelope()).await.unwrap();

    let envelope = protocol::read_envelope(&mut link, None).await.unwrap();
    let response = Response::from_envelope(envelope).unwrap();
    assert_eq!(response.kind(), ResponseKind::Bin);
    assert_eq!(resource(&response), Some("/feed"));
}
