/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::str::FromStr;

use http::{HeaderMap, HeaderName, HeaderValue, Method, Version, header};
use tokio::io::AsyncBufRead;

use super::HttpResponseParseError;
use crate::head::{HeadReadError, HeadReader, MessageFraming};
use crate::{HttpBodyType, HttpHeaderLine, HttpLineParseError, HttpStatusLine};

/// Headers that change how the exchange is handled; everything else passes
/// through untouched.
enum FieldKind {
    Connection,
    KeepAlive,
    TransferEncoding,
    ContentLength,
    Other,
}

impl FieldKind {
    fn of(name: &HeaderName) -> FieldKind {
        match name.as_str() {
            "connection" | "proxy-connection" => FieldKind::Connection,
            "keep-alive" => FieldKind::KeepAlive,
            "transfer-encoding" => FieldKind::TransferEncoding,
            "content-length" => FieldKind::ContentLength,
            _ => FieldKind::Other,
        }
    }
}

/// Parsed status line and headers of a response received from an origin
/// server during a proxied round trip.
pub struct UpstreamResponse {
    pub version: Version,
    pub code: u16,
    pub reason: String,
    /// End-to-end headers; connection handling headers are consumed into
    /// flags instead.
    pub headers: HeaderMap,
    origin_header_size: usize,
    keep_alive: bool,
    framing: MessageFraming,
}

impl UpstreamResponse {
    #[inline]
    pub fn origin_header_size(&self) -> usize {
        self.origin_header_size
    }

    #[inline]
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    #[inline]
    pub fn content_length(&self) -> Option<u64> {
        match self.framing {
            MessageFraming::Length(n) => Some(n),
            _ => None,
        }
    }

    fn no_body_status(&self, method: &Method) -> bool {
        method == Method::HEAD || self.code < 200 || matches!(self.code, 204 | 304)
    }

    /// Framing of the response body per RFC 9112 Section 6.3.
    pub fn body_type(&self, method: &Method) -> Option<HttpBodyType> {
        if self.no_body_status(method) {
            return None;
        }
        match self.framing {
            MessageFraming::Chunked => Some(HttpBodyType::Chunked),
            MessageFraming::Length(n) if n > 0 => Some(HttpBodyType::ContentLength(n)),
            MessageFraming::Length(_) => None,
            MessageFraming::Unframed => Some(HttpBodyType::ReadUntilEnd),
        }
    }

    pub async fn parse<R>(
        reader: &mut R,
        method: &Method,
        keep_alive: bool,
        max_header_size: usize,
    ) -> Result<Self, HttpResponseParseError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut head = HeadReader::new(reader, max_header_size);

        let line = head
            .start_line()
            .await
            .map_err(|e| head_error(e, max_header_size))?;
        let status =
            HttpStatusLine::parse(line).map_err(HttpResponseParseError::InvalidStatusLine)?;
        let mut rsp = UpstreamResponse {
            version: status.version,
            code: status.code,
            reason: status.reason.to_string(),
            headers: HeaderMap::new(),
            origin_header_size: 0,
            keep_alive,
            framing: MessageFraming::Unframed,
        };

        while let Some(line) = head
            .field_line()
            .await
            .map_err(|e| head_error(e, max_header_size))?
        {
            let field =
                HttpHeaderLine::parse(line).map_err(HttpResponseParseError::InvalidHeaderLine)?;
            rsp.absorb_field(field)?;
        }
        rsp.origin_header_size = head.taken();

        // a body with no framing at all runs to the end of the stream; the
        // connection cannot carry another response after it
        if rsp.framing == MessageFraming::Unframed && !rsp.no_body_status(method) {
            rsp.keep_alive = false;
        }

        Ok(rsp)
    }

    fn absorb_field(&mut self, field: HttpHeaderLine<'_>) -> Result<(), HttpResponseParseError> {
        let name = HeaderName::from_str(field.name).map_err(|_| {
            HttpResponseParseError::InvalidHeaderLine(HttpLineParseError::InvalidHeaderName)
        })?;

        match FieldKind::of(&name) {
            FieldKind::Connection => {
                // on the receiving side only close matters
                for token in field.value.split(',') {
                    if token.trim().eq_ignore_ascii_case("close") {
                        self.keep_alive = false;
                    }
                }
                return Ok(());
            }
            FieldKind::KeepAlive => {
                // hop-by-hop detail of the upstream connection, dropped
                return Ok(());
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
            HttpResponseParseError::InvalidHeaderLine(HttpLineParseError::InvalidHeaderValue)
        })?;
        self.headers.append(name, value);
        Ok(())
    }

    fn absorb_transfer_encoding(&mut self, value: &str) -> Result<(), HttpResponseParseError> {
        if let MessageFraming::Length(_) = self.framing {
            // two competing length claims; the message boundary is
            // ambiguous, never reuse this connection
            self.headers.remove(header::CONTENT_LENGTH);
            self.keep_alive = false;
            self.framing = MessageFraming::Unframed;
        }

        let mut codings = value.split(',').map(str::trim).filter(|t| !t.is_empty());
        let last = codings.next_back().unwrap_or("");
        if last.eq_ignore_ascii_case("chunked") {
            self.framing = MessageFraming::Chunked;
        } else if codings.any(|t| t.eq_ignore_ascii_case("chunked")) {
            // chunked anywhere but last leaves the body undelimited
            return Err(HttpResponseParseError::InvalidChunkedTransferEncoding);
        }
        Ok(())
    }

    fn absorb_content_length(
        &mut self,
        name: HeaderName,
        value: &str,
    ) -> Result<(), HttpResponseParseError> {
        let declared: u64 = value
            .trim()
            .parse()
            .map_err(|_| HttpResponseParseError::InvalidContentLength)?;

        match self.framing {
            MessageFraming::Chunked => {
                // chunked has already won; the stray length only poisons reuse
                self.keep_alive = false;
                Ok(())
            }
            MessageFraming::Length(seen) if seen != declared => {
                Err(HttpResponseParseError::InvalidContentLength)
            }
            MessageFraming::Length(_) => Ok(()),
            MessageFraming::Unframed => {
                self.framing = MessageFraming::Length(declared);
                let value = HeaderValue::from_str(value).map_err(|_| {
                    HttpResponseParseError::InvalidHeaderLine(HttpLineParseError::InvalidHeaderValue)
                })?;
                self.headers.append(name, value);
                Ok(())
            }
        }
    }
}

fn head_error(e: HeadReadError, max_header_size: usize) -> HttpResponseParseError {
    match e {
        HeadReadError::Closed => HttpResponseParseError::RemoteClosed,
        HeadReadError::TooLarge => HttpResponseParseError::TooLargeHeader(max_header_size),
        HeadReadError::Io(e) => HttpResponseParseError::IoFailed(e),
    }
}
