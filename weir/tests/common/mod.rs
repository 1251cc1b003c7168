/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

// not every test binary uses every helper
#![allow(dead_code)]

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;

use weir::{Pipeline, Server};

/// Spawn a server on an ephemeral port and wait until it accepts.
pub async fn start_server(server: Server) -> Arc<Server> {
    let server = Arc::new(server);
    let srv = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = srv.listen_and_serve().await;
    });
    server.accept_ready().await;
    assert_ne!(server.port(), 0);
    server
}

pub async fn start_pipeline(pipeline: Pipeline) -> Arc<Server> {
    start_server(Server::new(0, pipeline)).await
}

pub struct TestClient {
    pub reader: BufReader<OwnedReadHalf>,
    pub writer: tokio::net::tcp::OwnedWriteHalf,
}

impl TestClient {
    pub async fn connect(port: u16) -> TestClient {
        let stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .expect("couldn't connect");
        let (r, w) = stream.into_split();
        TestClient {
            reader: BufReader::new(r),
            writer: w,
        }
    }

    pub async fn send(&mut self, raw: &str) -> std::io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.writer.write_all(raw.as_bytes()).await?;
        self.writer.flush().await
    }

    pub async fn read_response(&mut self, head_only: bool) -> std::io::Result<TestResponse> {
        read_response(&mut self.reader, head_only).await
    }

    /// The server closed without sending anything further.
    pub async fn assert_eof(&mut self) {
        let mut buf = [0u8; 1];
        let n = self
            .reader
            .read(&mut buf)
            .await
            .expect("expected clean close");
        assert_eq!(n, 0, "expected connection close, got more data");
    }
}

#[derive(Debug)]
pub struct TestResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn chunked(&self) -> bool {
        self.header("transfer-encoding")
            .map(|v| v.eq_ignore_ascii_case("chunked"))
            .unwrap_or(false)
    }

    pub fn content_length(&self) -> Option<i64> {
        self.header("content-length").and_then(|v| v.parse().ok())
    }
}

pub async fn read_response<R>(reader: &mut R, head_only: bool) -> std::io::Result<TestResponse>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    if line.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed before status line",
        ));
    }
    let status: u16 = line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("bad status line {line:?}"),
            )
        })?;

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let mut rsp = TestResponse {
        status,
        headers,
        body: Vec::new(),
    };
    if head_only {
        return Ok(rsp);
    }

    if rsp.chunked() {
        loop {
            let mut size_line = String::new();
            reader.read_line(&mut size_line).await?;
            let size = usize::from_str_radix(size_line.trim(), 16).map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("bad chunk size {size_line:?}"),
                )
            })?;
            if size == 0 {
                // trailer section ends with a blank line
                loop {
                    let mut trailer = String::new();
                    reader.read_line(&mut trailer).await?;
                    if trailer.trim_end().is_empty() {
                        break;
                    }
                }
                break;
            }
            let mut chunk = vec![0u8; size];
            reader.read_exact(&mut chunk).await?;
            rsp.body.extend_from_slice(&chunk);
            let mut crlf = [0u8; 2];
            reader.read_exact(&mut crlf).await?;
        }
    } else if let Some(len) = rsp.content_length() {
        let mut body = vec![0u8; len as usize];
        reader.read_exact(&mut body).await?;
        rsp.body = body;
    } else {
        // no framing, read until the peer closes
        reader.read_to_end(&mut rsp.body).await?;
    }
    Ok(rsp)
}
