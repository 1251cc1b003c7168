/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

mod common;

use common::{TestClient, start_pipeline};
use weir::{Pipeline, Response, request_filter_fn};

fn hello_pipeline() -> Pipeline {
    let mut pipeline = Pipeline::new();
    pipeline.add_upstream_filter(request_filter_fn(|_| {
        Some(Response::from_string(200, None, "hello"))
    }));
    pipeline
}

#[tokio::test]
async fn sequential_requests_reuse_connection() {
    let server = start_pipeline(hello_pipeline()).await;
    let mut client = TestClient::connect(server.port()).await;

    for i in 0..5 {
        client
            .send("GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let rsp = client.read_response(false).await.unwrap_or_else(|e| {
            panic!("request {i} failed: {e}");
        });
        assert_eq!(rsp.status, 200);
        assert_eq!(rsp.body.as_slice(), b"hello");
    }

    server.stop_accepting();
}

#[tokio::test]
async fn keep_alive_matrix() {
    struct Case {
        name: &'static str,
        version: u8,
        use_header: bool,
        should_keep_alive: bool,
    }
    let cases = [
        Case {
            name: "1.0",
            version: 0,
            use_header: true,
            should_keep_alive: true,
        },
        Case {
            name: "1.0 no KA",
            version: 0,
            use_header: false,
            should_keep_alive: false,
        },
        Case {
            name: "1.1",
            version: 1,
            use_header: true,
            should_keep_alive: true,
        },
        Case {
            name: "1.1 no KA",
            version: 1,
            use_header: false,
            should_keep_alive: true,
        },
    ];

    let server = start_pipeline(hello_pipeline()).await;

    for case in &cases {
        let mut client = TestClient::connect(server.port()).await;
        for i in 0..3 {
            let header = if case.use_header {
                "Connection: Keep-Alive\r\n"
            } else {
                ""
            };
            let raw = format!("GET / HTTP/1.{}\r\nHost: localhost\r\n{header}\r\n", case.version);
            if let Err(e) = client.send(&raw).await {
                if case.should_keep_alive {
                    panic!("[{}:{i}] couldn't write request: {e}", case.name);
                }
                break;
            }
            match client.read_response(false).await {
                Ok(rsp) => {
                    if !case.should_keep_alive && i > 0 {
                        panic!("[{}:{i}] connection should be closed", case.name);
                    }
                    assert_eq!(rsp.status, 200);
                    if case.version == 0 && case.use_header {
                        // keep-alive must be explicit for HTTP/1.0
                        assert_eq!(rsp.header("connection"), Some("Keep-Alive"));
                    }
                }
                Err(e) => {
                    if case.should_keep_alive {
                        panic!("[{}:{i}] couldn't read response: {e}", case.name);
                    }
                    break;
                }
            }
        }
    }

    server.stop_accepting();
}
