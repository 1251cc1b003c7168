/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io::Write;
use std::str::FromStr;

use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri, Version, header};
use tokio::io::AsyncBufRead;

use super::HttpRequestParseError;
use crate::head::{HeadReadError, HeadReader, MessageFraming};
use crate::{HttpBodyType, HttpHeaderLine, HttpLineParseError, HttpMethodLine};

/// Headers that change how the connection or body is handled; everything
/// else passes through untouched.
enum FieldKind {
    Host,
    Connection,
    KeepAlive,
    Expect,
    Upgrade,
    TransferEncoding,
    ContentLength,
    Other,
}

impl FieldKind {
    fn of(name: &HeaderName) -> FieldKind {
        match name.as_str() {
            "host" => FieldKind::Host,
            "connection" => FieldKind::Connection,
            "keep-alive" => FieldKind::KeepAlive,
            "expect" => FieldKind::Expect,
            "upgrade" => FieldKind::Upgrade,
            "transfer-encoding" => FieldKind::TransferEncoding,
            "content-length" => FieldKind::ContentLength,
            _ => FieldKind::Other,
        }
    }
}

/// Parsed request line and headers of one inbound HTTP/1.1 (or 1.0)
/// request. The body, if any, stays on the connection stream and is framed
/// according to [`RequestHead::body_type`].
pub struct RequestHead {
    pub version: Version,
    pub method: Method,
    pub uri: Uri,
    /// End-to-end headers. Connection handling headers (`Connection`,
    /// `Expect`, `Transfer-Encoding`) are consumed into flags instead.
    pub headers: HeaderMap,
    pub host: Option<String>,
    origin_header_size: usize,
    keep_alive: bool,
    expect_continue: bool,
    framing: MessageFraming,
}

impl RequestHead {
    fn new(method: Method, uri: Uri, version: Version) -> Self {
        RequestHead {
            // connections outlive the request by default only since 1.1
            keep_alive: version == Version::HTTP_11,
            version,
            method,
            uri,
            headers: HeaderMap::new(),
            host: None,
            origin_header_size: 0,
            expect_continue: false,
            framing: MessageFraming::Unframed,
        }
    }

    #[inline]
    pub fn origin_header_size(&self) -> usize {
        self.origin_header_size
    }

    #[inline]
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    #[inline]
    pub fn disable_keep_alive(&mut self) {
        self.keep_alive = false;
    }

    #[inline]
    pub fn expect_continue(&self) -> bool {
        self.expect_continue
    }

    pub fn body_type(&self) -> Option<HttpBodyType> {
        match self.framing {
            MessageFraming::Chunked => Some(HttpBodyType::Chunked),
            MessageFraming::Length(n) if n > 0 => Some(HttpBodyType::ContentLength(n)),
            _ => None,
        }
    }

    pub async fn parse<R>(
        reader: &mut R,
        max_header_size: usize,
    ) -> Result<Self, HttpRequestParseError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut head = HeadReader::new(reader, max_header_size);

        let line = head
            .start_line()
            .await
            .map_err(|e| head_error(e, max_header_size))?;
        let start =
            HttpMethodLine::parse(line).map_err(HttpRequestParseError::InvalidMethodLine)?;
        let method = Method::from_str(start.method)
            .map_err(|_| HttpRequestParseError::UnsupportedMethod(start.method.to_string()))?;
        let uri =
            Uri::from_str(start.uri).map_err(|_| HttpRequestParseError::InvalidRequestTarget)?;
        let mut req = RequestHead::new(method, uri, start.version);

        while let Some(line) = head
            .field_line()
            .await
            .map_err(|e| head_error(e, max_header_size))?
        {
            let field =
                HttpHeaderLine::parse(line).map_err(HttpRequestParseError::InvalidHeaderLine)?;
            req.absorb_field(field)?;
        }
        req.origin_header_size = head.taken();

        Ok(req)
    }

    fn absorb_field(&mut self, field: HttpHeaderLine<'_>) -> Result<(), HttpRequestParseError> {
        let name = HeaderName::from_str(field.name).map_err(|_| {
            HttpRequestParseError::InvalidHeaderLine(HttpLineParseError::InvalidHeaderName)
        })?;

        match FieldKind::of(&name) {
            FieldKind::Host => {
                if self.host.is_some() {
                    return Err(HttpRequestParseError::InvalidHost);
                }
                if !field.value.is_empty() {
                    self.host = Some(field.value.to_string());
                }
            }
            FieldKind::Connection => {
                self.scan_connection_tokens(field.value);
                // connection options stay out of the forwarded header set
                return Ok(());
            }
            FieldKind::KeepAlive => {
                // only meaningful as a Connection option, drop the stray header
                return Ok(());
            }
            FieldKind::Expect => {
                if field.value.eq_ignore_ascii_case("100-continue") {
                    self.expect_continue = true;
                }
                // answered locally, never forwarded
                return Ok(());
            }
            FieldKind::Upgrade => {
                return Err(HttpRequestParseError::UpgradeIsNotSupported);
            }
            FieldKind::TransferEncoding => {
                return self.absorb_transfer_encoding(field.value);
            }
            FieldKind::ContentLength => {
                return self.absorb_content_length(name, field.value);
            }
            FieldKind::Other => {}
        }

        let value = HeaderValue::from_str(field.value).map_err(|_| {
            HttpRequestParseError::InvalidHeaderLine(HttpLineParseError::InvalidHeaderValue)
        })?;
        self.headers.append(name, value);
        Ok(())
    }

    fn scan_connection_tokens(&mut self, value: &str) {
        for token in value.split(',') {
            let token = token.trim();
            if token.eq_ignore_ascii_case("close") {
                self.keep_alive = false;
            } else if token.eq_ignore_ascii_case("keep-alive") {
                self.keep_alive = true;
            }
        }
    }

    fn absorb_transfer_encoding(&mut self, value: &str) -> Result<(), HttpRequestParseError> {
        // only a coding chain ending in chunked leaves a body we can delimit
        let chunked_last = value
            .rsplit(',')
            .next()
            .map(str::trim)
            .is_some_and(|t| t.eq_ignore_ascii_case("chunked"));
        if !chunked_last {
            return Err(HttpRequestParseError::InvalidChunkedTransferEncoding);
        }

        if let MessageFraming::Length(_) = self.framing {
            // two competing length claims; chunked wins, but the message
            // boundary was ambiguous, so never reuse this connection
            self.headers.remove(header::CONTENT_LENGTH);
            self.keep_alive = false;
        }
        self.framing = MessageFraming::Chunked;
        Ok(())
    }

    fn absorb_content_length(
        &mut self,
        name: HeaderName,
        value: &str,
    ) -> Result<(), HttpRequestParseError> {
        let declared: u64 = value
            .trim()
            .parse()
            .map_err(|_| HttpRequestParseError::InvalidContentLength)?;

        match self.framing {
            MessageFraming::Chunked => {
                // chunked has already won; the stray length only poisons reuse
                self.keep_alive = false;
                Ok(())
            }
            MessageFraming::Length(seen) if seen != declared => {
                Err(HttpRequestParseError::InvalidContentLength)
            }
            MessageFraming::Length(_) => Ok(()),
            MessageFraming::Unframed => {
                self.framing = MessageFraming::Length(declared);
                let value = HeaderValue::from_str(value).map_err(|_| {
                    HttpRequestParseError::InvalidHeaderLine(HttpLineParseError::InvalidHeaderValue)
                })?;
                self.headers.append(name, value);
                Ok(())
            }
        }
    }

    /// Serialize the head for forwarding to an origin server, always with
    /// `Connection: Keep-Alive` toward the upstream.
    pub fn serialize_for_origin(&self) -> Vec<u8> {
        const RESERVED_LEN_FOR_EXTRA_HEADERS: usize = 64;
        let mut buf =
            Vec::<u8>::with_capacity(self.origin_header_size + RESERVED_LEN_FOR_EXTRA_HEADERS);

        let target = self
            .uri
            .path_and_query()
            .map(|pa| pa.as_str())
            .unwrap_or("/");
        let _ = write!(buf, "{} {} {:?}\r\n", self.method, target, self.version);

        crate::header::serialize_headers(&self.headers, &mut buf);
        if self.framing == MessageFraming::Chunked {
            buf.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
        }
        buf.extend_from_slice(b"Connection: Keep-Alive\r\n\r\n");
        buf
    }
}

fn head_error(e: HeadReadError, max_header_size: usize) -> HttpRequestParseError {
    match e {
        HeadReadError::Closed => HttpRequestParseError::ClientClosed,
        HeadReadError::TooLarge => HttpRequestParseError::TooLargeHeader(max_header_size),
        HeadReadError::Io(e) => HttpRequestParseError::IoFailed(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::io::{BufReader, Result};
    use tokio_util::io::StreamReader;

    #[tokio::test]
    async fn read_get() {
        let content = b"GET /v/a/x HTTP/1.1\r\n\
            Host: example.com\r\n\
            Connection: Keep-Alive\r\n\
            Accept-Language: en-us,en;q=0.5\r\n\
            Accept-Encoding: gzip, deflate\r\n\
            Accept: */*\r\n\r\n";
        let stream = tokio_stream::iter(vec![Result::Ok(Bytes::from_static(content))]);
        let stream = StreamReader::new(stream);
        let mut buf_stream = BufReader::new(stream);
        let request = RequestHead::parse(&mut buf_stream, 4096).await.unwrap();
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.version, Version::HTTP_11);
        assert!(request.keep_alive());
        assert!(request.body_type().is_none());
        assert_eq!(request.host.as_deref(), Some("example.com"));

        let result = RequestHead::parse(&mut buf_stream, 4096).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn connection_close() {
        let content = b"GET /v1/files?api_key=abcd HTTP/1.1\r\n\
            Accept: application/json, text/plain, */*\r\n\
            Host: api.example.com\r\n\
            Connection: close\r\n\r\n";
        let stream = tokio_stream::iter(vec![Result::Ok(Bytes::from_static(content))]);
        let stream = StreamReader::new(stream);
        let mut buf_stream = BufReader::new(stream);
        let request = RequestHead::parse(&mut buf_stream, 4096).await.unwrap();
        assert!(!request.keep_alive());
    }

    #[tokio::test]
    async fn http_10_default_close() {
        let content = b"GET / HTTP/1.0\r\n\r\n";
        let stream = tokio_stream::iter(vec![Result::Ok(Bytes::from_static(content))]);
        let stream = StreamReader::new(stream);
        let mut buf_stream = BufReader::new(stream);
        let request = RequestHead::parse(&mut buf_stream, 4096).await.unwrap();
        assert_eq!(request.version, Version::HTTP_10);
        assert!(!request.keep_alive());
    }

    #[tokio::test]
    async fn http_10_keep_alive() {
        let content = b"GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n";
        let stream = tokio_stream::iter(vec![Result::Ok(Bytes::from_static(content))]);
        let stream = StreamReader::new(stream);
        let mut buf_stream = BufReader::new(stream);
        let request = RequestHead::parse(&mut buf_stream, 4096).await.unwrap();
        assert!(request.keep_alive());
    }

    #[tokio::test]
    async fn post_with_body() {
        let content = b"POST /submit HTTP/1.1\r\n\
            Host: example.com\r\n\
            Content-Length: 5\r\n\r\nhello";
        let stream = tokio_stream::iter(vec![Result::Ok(Bytes::from_static(content))]);
        let stream = StreamReader::new(stream);
        let mut buf_stream = BufReader::new(stream);
        let request = RequestHead::parse(&mut buf_stream, 4096).await.unwrap();
        assert_eq!(request.body_type(), Some(HttpBodyType::ContentLength(5)));
        assert!(request.headers.contains_key(header::CONTENT_LENGTH));
    }

    #[tokio::test]
    async fn expect_continue() {
        let content = b"PUT /upload HTTP/1.1\r\n\
            Host: example.com\r\n\
            Expect: 100-continue\r\n\
            Transfer-Encoding: chunked\r\n\r\n";
        let stream = tokio_stream::iter(vec![Result::Ok(Bytes::from_static(content))]);
        let stream = StreamReader::new(stream);
        let mut buf_stream = BufReader::new(stream);
        let request = RequestHead::parse(&mut buf_stream, 4096).await.unwrap();
        assert!(request.expect_continue());
        assert_eq!(request.body_type(), Some(HttpBodyType::Chunked));
        assert!(!request.headers.contains_key(header::EXPECT));
    }

    #[tokio::test]
    async fn conflicting_lengths() {
        // transfer-encoding beats content-length, and the connection is
        // not reusable afterwards
        let content = b"POST /u HTTP/1.1\r\n\
            Host: example.com\r\n\
            Content-Length: 5\r\n\
            Transfer-Encoding: chunked\r\n\r\n";
        let stream = tokio_stream::iter(vec![Result::Ok(Bytes::from_static(content))]);
        let stream = StreamReader::new(stream);
        let mut buf_stream = BufReader::new(stream);
        let request = RequestHead::parse(&mut buf_stream, 4096).await.unwrap();
        assert_eq!(request.body_type(), Some(HttpBodyType::Chunked));
        assert!(!request.keep_alive());
        assert!(!request.headers.contains_key(header::CONTENT_LENGTH));
    }

    #[tokio::test]
    async fn too_large_header() {
        let content = b"GET / HTTP/1.1\r\n\
            Host: example.com\r\n\
            Accept: */*\r\n\r\n";
        let stream = tokio_stream::iter(vec![Result::Ok(Bytes::from_static(content))]);
        let stream = StreamReader::new(stream);
        let mut buf_stream = BufReader::new(stream);
        let result = RequestHead::parse(&mut buf_stream, 24).await;
        assert!(matches!(
            result,
            Err(HttpRequestParseError::TooLargeHeader(_))
        ));
    }
}
