/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io::Write;

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::{DeflateEncoder, GzEncoder};
use http::{HeaderValue, header};
use log::error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use crate::pipeline::ResponseFilter;
use crate::request::{Request, StageStatus};
use crate::response::{Response, ResponseBody};

const PIPE_BUF_SIZE: usize = 8192;
const COPY_BUF_SIZE: usize = 8192;

pub const DEFAULT_TYPES: &[&str] = &[
    "text/plain",
    "text/html",
    "application/json",
    "text/xml",
];

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Gzip,
    Deflate,
}

impl Mode {
    fn token(&self) -> &'static str {
        match self {
            Mode::Gzip => "gzip",
            Mode::Deflate => "deflate",
        }
    }
}

/// Downstream filter negotiating `Accept-Encoding` and streaming the
/// response body through gzip or deflate. The body is replaced with the
/// read end of a pipe; a spawned task runs the compressor.
pub struct CompressionFilter {
    types: Vec<String>,
}

impl CompressionFilter {
    /// `types` is the set of compressible content types; None selects the
    /// defaults.
    pub fn new(types: Option<&[&str]>) -> Self {
        let types = types
            .unwrap_or(DEFAULT_TYPES)
            .iter()
            .map(|t| t.to_string())
            .collect();
        CompressionFilter { types }
    }
}

#[async_trait]
impl ResponseFilter for CompressionFilter {
    async fn filter_response(&self, req: &mut Request<'_>, res: &mut Response) {
        let accept = match req.head.headers.get(header::ACCEPT_ENCODING) {
            Some(v) => match v.to_str() {
                Ok(s) if !s.is_empty() => s.to_string(),
                _ => {
                    mark_skipped(req);
                    return;
                }
            },
            None => {
                mark_skipped(req);
                return;
            }
        };

        // is the content an acceptable type for encoding?
        let content_type = res
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let mut compress = self.types.iter().any(|t| t == content_type);

        // is the content already compressed?
        if res.headers.contains_key(header::CONTENT_ENCODING) {
            compress = false;
        }

        if !compress {
            mark_skipped(req);
            return;
        }

        // figure out which encoding to use
        let mode = accept.split(',').find_map(|opt| match opt.trim() {
            "gzip" => Some(Mode::Gzip),
            "deflate" => Some(Mode::Deflate),
            _ => None,
        });
        let Some(mode) = mode else {
            mark_skipped(req);
            return;
        };

        let (pipe_r, pipe_w) = tokio::io::duplex(PIPE_BUF_SIZE);
        let body = res.take_body();
        tokio::spawn(run_compressor(body, pipe_w, mode));

        res.content_length = -1;
        res.set_body(ResponseBody::from_stream(pipe_r));
        res.headers.insert(
            header::CONTENT_ENCODING,
            HeaderValue::from_static(mode.token()),
        );
    }
}

fn mark_skipped(req: &mut Request<'_>) {
    if let Some(stage) = req.current_stage() {
        stage.status = StageStatus::Skipped;
    }
}

async fn run_compressor(mut body: ResponseBody, mut pipe_w: DuplexStream, mode: Mode) {
    if let Err(e) = compress_body(&mut body, &mut pipe_w, mode).await {
        // the client observes a truncated chunked stream
        error!("error compressing body: {e}");
    }
    let _ = pipe_w.shutdown().await;
    // dropping the original body closes it
}

async fn compress_body(
    body: &mut ResponseBody,
    pipe_w: &mut DuplexStream,
    mode: Mode,
) -> std::io::Result<()> {
    enum Encoder {
        Gzip(GzEncoder<Vec<u8>>),
        Deflate(DeflateEncoder<Vec<u8>>),
    }

    impl Encoder {
        fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
            match self {
                Encoder::Gzip(e) => e.write_all(data),
                Encoder::Deflate(e) => e.write_all(data),
            }
        }

        fn take_output(&mut self) -> Vec<u8> {
            match self {
                Encoder::Gzip(e) => std::mem::take(e.get_mut()),
                Encoder::Deflate(e) => std::mem::take(e.get_mut()),
            }
        }

        fn finish(self) -> std::io::Result<Vec<u8>> {
            match self {
                Encoder::Gzip(e) => e.finish(),
                Encoder::Deflate(e) => e.finish(),
            }
        }
    }

    let mut encoder = match mode {
        Mode::Gzip => Encoder::Gzip(GzEncoder::new(Vec::new(), Compression::default())),
        Mode::Deflate => Encoder::Deflate(DeflateEncoder::new(Vec::new(), Compression::default())),
    };

    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let nr = body.read(&mut buf).await?;
        if nr == 0 {
            break;
        }
        encoder.write(&buf[..nr])?;
        let compressed = encoder.take_output();
        if !compressed.is_empty() {
            pipe_w.write_all(&compressed).await?;
        }
    }
    let tail = encoder.finish()?;
    if !tail.is_empty() {
        pipe_w.write_all(&tail).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::{DeflateDecoder, GzDecoder};
    use std::io::Read;

    async fn request_with_accept(accept: Option<&'static str>) -> Request<'static> {
        let raw: &'static [u8] = match accept {
            Some("gzip") => b"GET /hello HTTP/1.1\r\nHost: x\r\nAccept-Encoding: gzip\r\n\r\n",
            Some("deflate") => {
                b"GET /hello HTTP/1.1\r\nHost: x\r\nAccept-Encoding: deflate\r\n\r\n"
            }
            Some(_) => b"GET /hello HTTP/1.1\r\nHost: x\r\nAccept-Encoding: br\r\n\r\n",
            None => b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n",
        };
        let mut reader = tokio::io::BufReader::new(raw);
        let head = weir_http::server::RequestHead::parse(&mut reader, 4096)
            .await
            .unwrap();
        Request::new(head, None, None, std::time::SystemTime::now())
    }

    fn text_response(body: &str) -> Response {
        let mut res = Response::from_string(200, None, body);
        res.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain"),
        );
        res
    }

    #[tokio::test]
    async fn gzip_round_trip() {
        let filter = CompressionFilter::new(None);
        let mut req = request_with_accept(Some("gzip")).await;
        let mut res = text_response("hello world");

        filter.filter_response(&mut req, &mut res).await;

        assert_eq!(
            res.headers.get(header::CONTENT_ENCODING).unwrap(),
            "gzip"
        );
        assert_eq!(res.content_length, -1);

        let mut compressed = Vec::new();
        res.body_mut().read_to_end(&mut compressed).await.unwrap();
        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut decoded = String::new();
        decoder.read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, "hello world");
    }

    #[tokio::test]
    async fn deflate_round_trip() {
        let filter = CompressionFilter::new(None);
        let mut req = request_with_accept(Some("deflate")).await;
        let mut res = text_response("hello world");

        filter.filter_response(&mut req, &mut res).await;

        assert_eq!(
            res.headers.get(header::CONTENT_ENCODING).unwrap(),
            "deflate"
        );

        let mut compressed = Vec::new();
        res.body_mut().read_to_end(&mut compressed).await.unwrap();
        let mut decoder = DeflateDecoder::new(compressed.as_slice());
        let mut decoded = String::new();
        decoder.read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, "hello world");
    }

    #[tokio::test]
    async fn no_accept_encoding_skips() {
        let filter = CompressionFilter::new(None);
        let mut req = request_with_accept(None).await;
        let mut res = text_response("hello world");

        filter.filter_response(&mut req, &mut res).await;
        assert!(!res.headers.contains_key(header::CONTENT_ENCODING));
    }

    #[tokio::test]
    async fn wrong_content_type_skips() {
        let filter = CompressionFilter::new(None);
        let mut req = request_with_accept(Some("gzip")).await;
        let mut res = Response::from_string(200, None, "png bytes");
        res.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("image/png"),
        );

        filter.filter_response(&mut req, &mut res).await;
        assert!(!res.headers.contains_key(header::CONTENT_ENCODING));
    }

    #[tokio::test]
    async fn already_encoded_skips() {
        let filter = CompressionFilter::new(None);
        let mut req = request_with_accept(Some("gzip")).await;
        let mut res = text_response("already gzipped");
        res.headers.insert(
            header::CONTENT_ENCODING,
            HeaderValue::from_static("gzip"),
        );

        filter.filter_response(&mut req, &mut res).await;
        // unchanged, no re-compression
        assert_eq!(
            res.headers.get(header::CONTENT_ENCODING).unwrap(),
            "gzip"
        );
        let mut out = Vec::new();
        res.body_mut().read_to_end(&mut out).await.unwrap();
        assert_eq!(out.as_slice(), b"already gzipped");
    }

    #[tokio::test]
    async fn unknown_encoding_skips() {
        let filter = CompressionFilter::new(None);
        let mut req = request_with_accept(Some("br")).await;
        let mut res = text_response("hello");

        filter.filter_response(&mut req, &mut res).await;
        assert!(!res.headers.contains_key(header::CONTENT_ENCODING));
    }
}
