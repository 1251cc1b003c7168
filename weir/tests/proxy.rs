/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{TestClient, start_pipeline};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use weir::filter::{Upstream, UpstreamPool, UpstreamPoolEntry, UpstreamTransport};
use weir::{Pipeline, Request, RequestFilter, Response, request_filter_fn};

struct EchoFilter;

#[async_trait]
impl RequestFilter for EchoFilter {
    async fn filter_request(&self, req: &mut Request<'_>) -> Option<Response> {
        let mut data = Vec::new();
        if let Some(body) = req.body() {
            body.read_to_end(&mut data).await.ok()?;
        }
        Some(Response::from_bytes(200, None, &data))
    }
}

/// A weir server acting as the origin.
async fn start_origin() -> Arc<weir::Server> {
    let mut pipeline = Pipeline::new();
    pipeline.add_upstream_filter(request_filter_fn(|req| {
        match req.head.uri.path() {
            "/hello" => Some(Response::from_string(200, None, "hello world")),
            "/echo" => None, // fall through to the echo filter
            _ => Some(Response::from_string(404, None, "Not Found")),
        }
    }));
    pipeline.add_upstream_filter(Arc::new(EchoFilter));
    start_pipeline(pipeline).await
}

/// An origin that answers without any body framing and closes, the way
/// ancient HTTP servers do.
async fn start_unframed_origin() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let mut seen = Vec::new();
                loop {
                    let Ok(n) = stream.read(&mut buf).await else {
                        return;
                    };
                    if n == 0 {
                        return;
                    }
                    seen.extend_from_slice(&buf[..n]);
                    if seen.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let _ = stream.write_all(b"HTTP/1.0 200 OK\r\n\r\nABC").await;
                let _ = stream.shutdown().await;
            });
        }
    });
    port
}

fn gateway_pipeline(upstream: Upstream) -> Pipeline {
    let mut pipeline = Pipeline::new();
    pipeline.add_upstream_filter(Arc::new(upstream));
    pipeline
}

#[tokio::test]
async fn forwards_to_origin() {
    let origin = start_origin().await;
    let transport = Arc::new(UpstreamTransport::new("127.0.0.1", origin.port(), None));
    let gateway =
        start_pipeline(gateway_pipeline(Upstream::new(transport).named("origin"))).await;

    let mut client = TestClient::connect(gateway.port()).await;
    client
        .send("GET /hello HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let rsp = client.read_response(false).await.unwrap();
    assert_eq!(rsp.status, 200);
    assert_eq!(rsp.content_length(), Some(11));
    assert_eq!(rsp.body.as_slice(), b"hello world");

    gateway.stop_accepting();
    origin.stop_accepting();
}

#[tokio::test]
async fn forwards_request_body() {
    let origin = start_origin().await;
    let transport = Arc::new(UpstreamTransport::new("127.0.0.1", origin.port(), None));
    let gateway = start_pipeline(gateway_pipeline(Upstream::new(transport))).await;

    let mut client = TestClient::connect(gateway.port()).await;
    client
        .send("POST /echo HTTP/1.1\r\nHost: localhost\r\nContent-Length: 7\r\n\r\npayload")
        .await
        .unwrap();
    let rsp = client.read_response(false).await.unwrap();
    assert_eq!(rsp.status, 200);
    assert_eq!(rsp.body.as_slice(), b"payload");

    gateway.stop_accepting();
    origin.stop_accepting();
}

#[tokio::test]
async fn promotes_unframed_body_to_chunked() {
    let origin_port = start_unframed_origin().await;
    let transport = Arc::new(UpstreamTransport::new("127.0.0.1", origin_port, None));
    let gateway = start_pipeline(gateway_pipeline(Upstream::new(transport))).await;

    let mut client = TestClient::connect(gateway.port()).await;
    client
        .send("GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let rsp = client.read_response(false).await.unwrap();
    assert_eq!(rsp.status, 200);
    // the probe byte is preserved and the body re-framed losslessly
    assert!(rsp.chunked(), "expected chunked, got {:?}", rsp.headers);
    assert_eq!(rsp.body.as_slice(), b"ABC");

    gateway.stop_accepting();
}

#[tokio::test]
async fn bad_gateway_on_refused_connection() {
    let refused = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let transport = Arc::new(UpstreamTransport::new("127.0.0.1", refused, None));
    let gateway = start_pipeline(gateway_pipeline(Upstream::new(transport))).await;

    let mut client = TestClient::connect(gateway.port()).await;
    client
        .send("GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let rsp = client.read_response(false).await.unwrap();
    assert_eq!(rsp.status, 502);
    assert_eq!(rsp.body.as_slice(), b"Bad Gateway\n");

    gateway.stop_accepting();
}

#[tokio::test]
async fn pool_demotes_failed_upstream() {
    let origin = start_origin().await;
    let refused = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };

    let broken =
        Upstream::new(Arc::new(UpstreamTransport::new("127.0.0.1", refused, None))).named("a");
    let healthy =
        Upstream::new(Arc::new(UpstreamTransport::new("127.0.0.1", origin.port(), None)))
            .named("b");
    let pool = UpstreamPool::new(
        "test-pool",
        vec![
            UpstreamPoolEntry {
                upstream: Arc::new(broken),
                weight: 1,
            },
            UpstreamPoolEntry {
                upstream: Arc::new(healthy),
                weight: 1,
            },
        ],
    );

    let mut pipeline = Pipeline::new();
    pipeline.add_upstream_filter(pool.clone());
    let gateway = start_pipeline(pipeline).await;

    // round robin starts at the broken upstream, which demotes itself
    let mut client = TestClient::connect(gateway.port()).await;
    client
        .send("GET /hello HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let rsp = client.read_response(false).await.unwrap();
    assert_eq!(rsp.status, 502);

    // every following request lands on the healthy one
    for _ in 0..4 {
        let mut client = TestClient::connect(gateway.port()).await;
        client
            .send("GET /hello HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let rsp = client.read_response(false).await.unwrap();
        assert_eq!(rsp.status, 200);
        assert_eq!(rsp.body.as_slice(), b"hello world");
    }

    pool.shutdown();
    gateway.stop_accepting();
    origin.stop_accepting();
}
