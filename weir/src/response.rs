/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use http::{HeaderMap, HeaderValue, StatusCode, header};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use weir_io::BoxAsyncRead;

/// Byte stream carried by a [`Response`]. Closed exactly once, by drop.
pub enum ResponseBody {
    Empty,
    Bytes(Bytes),
    Stream(BoxAsyncRead),
}

impl ResponseBody {
    pub fn from_stream<R>(stream: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        ResponseBody::Stream(Box::new(stream))
    }
}

impl AsyncRead for ResponseBody {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            ResponseBody::Empty => Poll::Ready(Ok(())),
            ResponseBody::Bytes(bytes) => {
                let to_read = buf.remaining().min(bytes.len());
                if to_read > 0 {
                    buf.put_slice(&bytes.chunk()[0..to_read]);
                    bytes.advance(to_read);
                }
                Poll::Ready(Ok(()))
            }
            ResponseBody::Stream(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

/// How the body will be framed on the wire. Unset until the server-side
/// framing correction has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferHint {
    Identity,
    Chunked,
}

/// An HTTP response travelling down the pipeline. `content_length`
/// follows the convention −1 ≡ unknown/chunked, 0 ≡ empty, >0 ≡ exact.
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub content_length: i64,
    pub(crate) transfer: Option<TransferHint>,
    pub(crate) body: ResponseBody,
    /// Force-close the connection after this response is written.
    pub close: bool,
}

impl Response {
    /// Build a response from the basic fields.
    pub fn simple(
        status: u16,
        headers: Option<HeaderMap>,
        content_length: i64,
        body: ResponseBody,
    ) -> Self {
        Response {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            headers: headers.unwrap_or_default(),
            content_length,
            transfer: None,
            body,
            close: false,
        }
    }

    /// Like [`Response::simple`] but with a byte slice body and an exact
    /// content length.
    pub fn from_bytes(status: u16, headers: Option<HeaderMap>, body: &[u8]) -> Self {
        let bytes = Bytes::copy_from_slice(body);
        Response::simple(
            status,
            headers,
            bytes.len() as i64,
            ResponseBody::Bytes(bytes),
        )
    }

    /// Like [`Response::from_bytes`] but with a string body.
    pub fn from_string(status: u16, headers: Option<HeaderMap>, body: &str) -> Self {
        Response::from_bytes(status, headers, body.as_bytes())
    }

    /// A 302 redirect to `location`.
    pub fn redirect(location: &str) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(value) = location.parse() {
            headers.insert(header::LOCATION, value);
        }
        Response::simple(302, Some(headers), 0, ResponseBody::Empty)
    }

    /// JSON-encode `value` as the body, setting `Content-Type:
    /// application/json` unless one was supplied. Encoder failures are
    /// surfaced to the caller.
    pub fn json<T: Serialize>(
        status: u16,
        headers: Option<HeaderMap>,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        let encoded = serde_json::to_vec(value)?;
        let mut headers = headers.unwrap_or_default();
        if !headers.contains_key(header::CONTENT_TYPE) {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }
        Ok(Response::simple(
            status,
            Some(headers),
            encoded.len() as i64,
            ResponseBody::Bytes(Bytes::from(encoded)),
        ))
    }

    pub fn body_mut(&mut self) -> &mut ResponseBody {
        &mut self.body
    }

    pub fn take_body(&mut self) -> ResponseBody {
        std::mem::replace(&mut self.body, ResponseBody::Empty)
    }

    pub fn set_body(&mut self, body: ResponseBody) {
        self.body = body;
    }

    /// Statuses that must not carry a body at all.
    pub(crate) fn status_forbids_body(&self) -> bool {
        self.status.is_informational()
            || self.status == StatusCode::NO_CONTENT
            || self.status == StatusCode::NOT_MODIFIED
    }

    /// Check whether the body holds any bytes, consuming at most one byte
    /// from a streaming body and splicing it back in front afterwards.
    pub(crate) async fn probe_body_nonempty(&mut self) -> io::Result<bool> {
        match &mut self.body {
            ResponseBody::Empty => Ok(false),
            ResponseBody::Bytes(bytes) => Ok(!bytes.is_empty()),
            ResponseBody::Stream(stream) => {
                let mut probe = [0u8; 1];
                let nr = stream.read(&mut probe).await?;
                if nr == 0 {
                    Ok(false)
                } else {
                    let ResponseBody::Stream(rest) = self.take_body() else {
                        unreachable!()
                    };
                    let rejoined = AsyncReadExt::chain(std::io::Cursor::new(vec![probe[0]]), rest);
                    self.body = ResponseBody::Stream(Box::new(rejoined));
                    Ok(true)
                }
            }
        }
    }
}
