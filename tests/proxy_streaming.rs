// Upgrade tunnelling and incremental streaming through the gateway.
use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use meridian::{
    DiscoveryManager, GatewayMetrics, GatewayService, HttpClientAdapter, HttpHandler,
    adapters::StaticResolver, config::GatewayConfig,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time::timeout,
};
use tower::ServiceExt;

const WAIT: Duration = Duration::from_secs(5);

/// Read from `stream` until the end of an HTTP head and return it.
async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.unwrap();
        assert_ne!(n, 0, "connection closed before end of head");
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

/// Upstream that accepts one `Upgrade: echo` handshake and then echoes bytes.
async fn spawn_upgrade_upstream() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let head = read_head(&mut stream).await.to_ascii_lowercase();
        assert!(head.contains("upgrade: echo"));
        stream
            .write_all(
                b"HTTP/1.1 101 Switching Protocols\r\nConnection: upgrade\r\nUpgrade: echo\r\n\r\n",
            )
            .await
            .unwrap();

        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            stream.write_all(&buf[..n]).await.unwrap();
        }
    });
    format!("http://{addr}")
}

/// Upstream that sends one chunk, then waits for `release` before finishing.
async fn spawn_chunked_upstream(release: oneshot::Receiver<()>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_head(&mut stream).await;
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nfirst\r\n")
            .await
            .unwrap();
        stream.flush().await.unwrap();

        let _ = release.await;
        stream
            .write_all(b"6\r\nsecond\r\n0\r\n\r\n")
            .await
            .unwrap();
    });
    format!("http://{addr}")
}

async fn gateway_router(upstream: &str) -> Router {
    let config = GatewayConfig {
        rate_limit_enabled: false,
        primary_url: upstream.to_string(),
        ..Default::default()
    };
    let metrics = Arc::new(GatewayMetrics::new().unwrap());
    let discovery = DiscoveryManager::new(
        StaticResolver::new(&config.primary_url, None).unwrap(),
        metrics.clone(),
        Duration::from_secs(60),
        Duration::from_secs(1),
    );
    discovery.refresh().await.unwrap();

    let gateway = Arc::new(GatewayService::new(&config, discovery.handle(), metrics).unwrap());
    let client = Arc::new(
        HttpClientAdapter::new(Duration::from_secs(1), Duration::from_secs(5)).unwrap(),
    );
    HttpHandler::new(gateway, client).router()
}

#[tokio::test]
async fn test_upgrade_is_tunnelled_end_to_end() {
    let upstream = spawn_upgrade_upstream().await;
    let router = gateway_router(&upstream).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let gateway_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    let mut client = TcpStream::connect(gateway_addr).await.unwrap();
    client
        .write_all(
            b"GET /ws/live HTTP/1.1\r\nHost: gateway.local\r\nConnection: Upgrade\r\nUpgrade: echo\r\n\r\n",
        )
        .await
        .unwrap();

    let head = timeout(WAIT, read_head(&mut client)).await.unwrap();
    assert!(head.starts_with("HTTP/1.1 101"), "unexpected head: {head}");
    assert!(head.to_ascii_lowercase().contains("upgrade: echo"));

    client.write_all(b"ping").await.unwrap();
    let mut echoed = [0u8; 4];
    timeout(WAIT, client.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&echoed, b"ping");
}

#[tokio::test]
async fn test_response_body_streams_incrementally() {
    let (release, released) = oneshot::channel();
    let upstream = spawn_chunked_upstream(released).await;
    let router = gateway_router(&upstream).await;

    let request = Request::builder()
        .uri("/api/v1/metrics/stream")
        .body(Body::empty())
        .unwrap();
    let response = timeout(WAIT, router.oneshot(request))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body();
    let first = timeout(WAIT, body.frame())
        .await
        .expect("first chunk should arrive before the upstream finishes")
        .unwrap()
        .unwrap()
        .into_data()
        .unwrap();
    assert_eq!(&first[..], b"first");

    release.send(()).unwrap();
    let rest = timeout(WAIT, body.collect())
        .await
        .unwrap()
        .unwrap()
        .to_bytes();
    assert_eq!(&rest[..], b"second");
}
