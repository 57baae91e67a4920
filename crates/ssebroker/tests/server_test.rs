//! End-to-end tests against a real listener

use ssebroker::{Broker, BrokerConfig, CancellationToken, Server, ServerConfig, SessionConfig, SessionHandler};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const INDEX: &str = "<!DOCTYPE html><title>clock</title>";

struct TestServer {
    addr: SocketAddr,
    broker: Broker,
    cancel: CancellationToken,
    handle: JoinHandle<Result<(), ssebroker::BoxError>>,
}

impl TestServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();

        let (broker, _) = Broker::spawn(BrokerConfig::default(), cancel.clone());
        let sessions = SessionHandler::new(broker.clone(), SessionConfig::default(), cancel.clone());
        let server = Server::new(sessions, &ServerConfig::default(), cancel.clone()).with_index(INDEX);
        let handle = tokio::spawn(server.serve(listener));

        Self {
            addr,
            broker,
            cancel,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn wait_for_subscribers(&self, expected: usize) {
        for _ in 0..500 {
            if self.broker.subscriber_count().await.unwrap() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("subscriber count never reached {}", expected);
    }
}

async fn next_chunk(resp: &mut reqwest::Response) -> Option<bytes::Bytes> {
    tokio::time::timeout(Duration::from_secs(5), resp.chunk())
        .await
        .expect("timed out waiting for chunk")
        .unwrap()
}

#[tokio::test]
async fn subscriber_receives_events_in_order() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let mut resp = client.get(server.url("/sse-stream")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "text/event-stream");
    server.wait_for_subscribers(1).await;

    server
        .broker
        .send_event("1", "currentTime", "2024-01-01T00:00:00Z")
        .unwrap();
    assert_eq!(
        &next_chunk(&mut resp).await.unwrap()[..],
        b"id: 1\nevent: currentTime\ndata: 2024-01-01T00:00:00Z\n\n"
    );

    server.broker.send_message("line one\nline two").unwrap();
    assert_eq!(
        &next_chunk(&mut resp).await.unwrap()[..],
        b"data: line one\ndata: line two\n\n"
    );
}

#[tokio::test]
async fn disconnected_subscriber_is_removed() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let resp = client.get(server.url("/sse-stream")).send().await.unwrap();
    server.wait_for_subscribers(1).await;
    drop(resp);
    drop(client);

    // Publishing forces a write to the dead socket if the close went unnoticed.
    for _ in 0..200 {
        server.broker.send_message("ping").unwrap();
        if server.broker.subscriber_count().await.unwrap() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("subscriber was never removed");
}

#[tokio::test]
async fn preflight_echoes_origin() {
    let server = TestServer::start().await;
    let resp = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, server.url("/sse-stream"))
        .header("Origin", "https://dashboard.example")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(
        resp.headers()["access-control-allow-origin"],
        "https://dashboard.example"
    );
    assert_eq!(resp.headers()["access-control-allow-headers"], "*");
    assert_eq!(server.broker.subscriber_count().await.unwrap(), 0);
}

#[tokio::test]
async fn other_methods_are_not_allowed() {
    let server = TestServer::start().await;
    let resp = reqwest::Client::new()
        .post(server.url("/sse-stream"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(resp.headers()["allow"], "GET, OPTIONS");
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let server = TestServer::start().await;
    let resp = reqwest::get(server.url("/nope")).await.unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    let body: serde_json::Value = serde_json::from_slice(&resp.bytes().await.unwrap()).unwrap();
    assert_eq!(body["error"]["type"], "not_found");
}

#[tokio::test]
async fn index_page_is_served() {
    let server = TestServer::start().await;
    let resp = reqwest::get(server.url("/")).await.unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "text/html; charset=utf-8");
    assert_eq!(resp.text().await.unwrap(), INDEX);
}

#[tokio::test]
async fn cancellation_ends_streams_and_stops_server() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let mut resp = client.get(server.url("/sse-stream")).send().await.unwrap();
    server.wait_for_subscribers(1).await;

    server.cancel.cancel();
    assert!(next_chunk(&mut resp).await.is_none());

    tokio::time::timeout(Duration::from_secs(5), server.handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
