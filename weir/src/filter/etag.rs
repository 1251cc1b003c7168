/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use async_trait::async_trait;
use http::{StatusCode, header};

use crate::pipeline::ResponseFilter;
use crate::request::{Request, StageStatus};
use crate::response::{Response, ResponseBody};

/// Replies `304 Not Modified` with an empty body when the request's
/// `If-None-Match` matches the response `Etag`.
#[derive(Default)]
pub struct EtagFilter;

#[async_trait]
impl ResponseFilter for EtagFilter {
    async fn filter_response(&self, req: &mut Request<'_>, res: &mut Response) {
        let if_none_match = req.head.headers.get(header::IF_NONE_MATCH);
        let etag = res.headers.get(header::ETAG);
        let matched = match (if_none_match, etag) {
            (Some(a), Some(b)) => !a.is_empty() && a == b,
            _ => false,
        };
        if !matched || res.status != StatusCode::OK {
            if let Some(stage) = req.current_stage() {
                stage.status = StageStatus::Skipped;
            }
            return;
        }

        res.status = StatusCode::NOT_MODIFIED;
        res.content_length = 0;
        res.set_body(ResponseBody::Empty);
        res.headers.remove(header::CONTENT_LENGTH);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    async fn request_with_etag(etag: Option<&'static str>) -> Request<'static> {
        let raw: &'static [u8] = match etag {
            Some(_) => b"GET /hello HTTP/1.1\r\nHost: x\r\nIf-None-Match: abc123\r\n\r\n",
            None => b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n",
        };
        let mut reader = tokio::io::BufReader::new(raw);
        let head = weir_http::server::RequestHead::parse(&mut reader, 4096)
            .await
            .unwrap();
        Request::new(head, None, None, std::time::SystemTime::now())
    }

    fn tagged_response(etag: &'static str) -> Response {
        let mut res = Response::from_string(200, None, "hello world");
        res.headers
            .insert(header::ETAG, HeaderValue::from_static(etag));
        res
    }

    #[tokio::test]
    async fn matching_etag_yields_304() {
        let filter = EtagFilter;
        let mut req = request_with_etag(Some("abc123")).await;
        let mut res = tagged_response("abc123");
        filter.filter_response(&mut req, &mut res).await;
        assert_eq!(res.status, StatusCode::NOT_MODIFIED);
        assert_eq!(res.content_length, 0);
    }

    #[tokio::test]
    async fn mismatched_etag_passes_through() {
        let filter = EtagFilter;
        let mut req = request_with_etag(Some("abc123")).await;
        let mut res = tagged_response("other");
        filter.filter_response(&mut req, &mut res).await;
        assert_eq!(res.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn no_etag_passes_through() {
        let filter = EtagFilter;
        let mut req = request_with_etag(None).await;
        let mut res = tagged_response("abc123");
        filter.filter_response(&mut req, &mut res).await;
        assert_eq!(res.status, StatusCode::OK);
    }
}
