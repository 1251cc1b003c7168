/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use async_trait::async_trait;

use crate::request::{PipelineStageKind, Request};
use crate::response::Response;

/// An upstream stage: inspects a request and optionally yields a response,
/// which ends the upstream traversal.
#[async_trait]
pub trait RequestFilter: Send + Sync {
    async fn filter_request(&self, req: &mut Request<'_>) -> Option<Response>;

    /// Stage name used in diagnostics.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Nested pipelines record their inner stages themselves and must not
    /// be wrapped in an extra stage record.
    fn is_pipeline(&self) -> bool {
        false
    }
}

/// A downstream stage: may mutate the response in place, including
/// replacing its body with a streaming wrapper.
#[async_trait]
pub trait ResponseFilter: Send + Sync {
    async fn filter_response(&self, req: &mut Request<'_>, res: &mut Response);

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A filter-selector: returns the next filter to invoke, which may itself
/// be a pipeline, or nothing to fall through to the next upstream entry.
#[async_trait]
pub trait Router: Send + Sync {
    async fn select_pipeline(&self, req: &mut Request<'_>) -> Option<Arc<dyn RequestFilter>>;

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Entries of the upstream list: either a plain request filter or a router
/// branching to one.
pub enum UpstreamEntry {
    Filter(Arc<dyn RequestFilter>),
    Router(Arc<dyn Router>),
}

/// An ordered upstream list of request filters (and routers) plus an
/// ordered downstream list of response filters.
///
/// `filter_request` is called for the upstream entries in order UNTIL a
/// response is returned, after which every downstream filter runs in
/// order. If no upstream filter yields a response the caller substitutes a
/// default 404.
///
/// Pipelines are request filters themselves, so routers may return a whole
/// pipeline to branch the flow.
#[derive(Default)]
pub struct Pipeline {
    upstream: Vec<UpstreamEntry>,
    downstream: Vec<Arc<dyn ResponseFilter>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline::default()
    }

    pub fn add_upstream_filter(&mut self, filter: Arc<dyn RequestFilter>) -> &mut Self {
        self.upstream.push(UpstreamEntry::Filter(filter));
        self
    }

    pub fn add_upstream_router(&mut self, router: Arc<dyn Router>) -> &mut Self {
        self.upstream.push(UpstreamEntry::Router(router));
        self
    }

    pub fn add_downstream_filter(&mut self, filter: Arc<dyn ResponseFilter>) -> &mut Self {
        self.downstream.push(filter);
        self
    }

    pub async fn execute(&self, req: &mut Request<'_>) -> Option<Response> {
        let mut res: Option<Response> = None;

        for entry in &self.upstream {
            match entry {
                UpstreamEntry::Router(router) => {
                    req.start_stage(router.name(), PipelineStageKind::Router);
                    let selected = router.select_pipeline(req).await;
                    req.finish_stage();
                    if let Some(filter) = selected {
                        res = self.exec_filter(req, filter.as_ref()).await;
                    }
                }
                UpstreamEntry::Filter(filter) => {
                    res = self.exec_filter(req, filter.as_ref()).await;
                }
            }
            if res.is_some() {
                break;
            }
        }

        if let Some(res) = &mut res {
            self.down(req, res).await;
        }

        res
    }

    async fn exec_filter(
        &self,
        req: &mut Request<'_>,
        filter: &dyn RequestFilter,
    ) -> Option<Response> {
        if filter.is_pipeline() {
            // inner stages are recorded by the nested execution
            return filter.filter_request(req).await;
        }
        req.start_stage(filter.name(), PipelineStageKind::Upstream);
        let res = filter.filter_request(req).await;
        req.finish_stage();
        res
    }

    async fn down(&self, req: &mut Request<'_>, res: &mut Response) {
        for filter in &self.downstream {
            req.start_stage(filter.name(), PipelineStageKind::Downstream);
            filter.filter_response(req, res).await;
            req.finish_stage();
        }
    }
}

#[async_trait]
impl RequestFilter for Pipeline {
    async fn filter_request(&self, req: &mut Request<'_>) -> Option<Response> {
        self.execute(req).await
    }

    fn is_pipeline(&self) -> bool {
        true
    }
}

struct RequestFilterFn<F>(F);

#[async_trait]
impl<F> RequestFilter for RequestFilterFn<F>
where
    F: Fn(&mut Request<'_>) -> Option<Response> + Send + Sync,
{
    async fn filter_request(&self, req: &mut Request<'_>) -> Option<Response> {
        (self.0)(req)
    }

    fn name(&self) -> &'static str {
        "fn"
    }
}

/// Wrap a plain closure as a [`RequestFilter`].
pub fn request_filter_fn<F>(f: F) -> Arc<dyn RequestFilter>
where
    F: Fn(&mut Request<'_>) -> Option<Response> + Send + Sync + 'static,
{
    Arc::new(RequestFilterFn(f))
}

struct RouterFn<F>(F);

#[async_trait]
impl<F> Router for RouterFn<F>
where
    F: Fn(&mut Request<'_>) -> Option<Arc<dyn RequestFilter>> + Send + Sync,
{
    async fn select_pipeline(&self, req: &mut Request<'_>) -> Option<Arc<dyn RequestFilter>> {
        (self.0)(req)
    }

    fn name(&self) -> &'static str {
        "fn"
    }
}

/// Wrap a plain closure as a [`Router`].
pub fn router_fn<F>(f: F) -> Arc<dyn Router>
where
    F: Fn(&mut Request<'_>) -> Option<Arc<dyn RequestFilter>> + Send + Sync + 'static,
{
    Arc::new(RouterFn(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::StageStatus;
    use std::str::FromStr;
    use weir_http::server::RequestHead;

    async fn parse_head(raw: &'static [u8]) -> RequestHead {
        let mut reader = tokio::io::BufReader::new(raw);
        RequestHead::parse(&mut reader, 4096).await.unwrap()
    }

    fn test_request(head: RequestHead) -> Request<'static> {
        Request::new(head, None, None, std::time::SystemTime::now())
    }

    #[tokio::test]
    async fn upstream_stops_at_first_response() {
        let mut pipeline = Pipeline::new();
        pipeline.add_upstream_filter(request_filter_fn(|_| None));
        pipeline.add_upstream_filter(request_filter_fn(|_| {
            Some(Response::from_string(200, None, "first"))
        }));
        pipeline.add_upstream_filter(request_filter_fn(|_| {
            Some(Response::from_string(200, None, "second"))
        }));

        let head = parse_head(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;
        let mut req = test_request(head);
        let res = pipeline.execute(&mut req).await.unwrap();
        assert_eq!(res.status.as_u16(), 200);
        // two upstream stages recorded, the third filter never ran
        assert_eq!(req.stages().len(), 2);
    }

    #[tokio::test]
    async fn no_response_returns_none() {
        let mut pipeline = Pipeline::new();
        pipeline.add_upstream_filter(request_filter_fn(|_| None));

        let head = parse_head(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;
        let mut req = test_request(head);
        assert!(pipeline.execute(&mut req).await.is_none());
    }

    #[tokio::test]
    async fn nested_pipeline_not_double_recorded() {
        let mut inner = Pipeline::new();
        inner.add_upstream_filter(request_filter_fn(|_| {
            Some(Response::from_string(200, None, "inner"))
        }));

        let mut outer = Pipeline::new();
        outer.add_upstream_filter(Arc::new(inner));

        let head = parse_head(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;
        let mut req = test_request(head);
        let res = outer.execute(&mut req).await;
        assert!(res.is_some());
        // only the inner filter stage, no wrapper stage for the pipeline
        assert_eq!(req.stages().len(), 1);
        assert_eq!(req.stages()[0].kind, PipelineStageKind::Upstream);
    }

    #[tokio::test]
    async fn router_branches() {
        let mut pipeline = Pipeline::new();
        pipeline.add_upstream_router(router_fn(|req| {
            (req.head.uri.path() == "/a").then(|| {
                request_filter_fn(|_| Some(Response::from_string(200, None, "a")))
            })
        }));
        pipeline.add_upstream_filter(request_filter_fn(|_| {
            Some(Response::from_string(200, None, "fallback"))
        }));

        let head = parse_head(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n").await;
        let mut req = test_request(head);
        let res = pipeline.execute(&mut req).await.unwrap();
        assert_eq!(res.content_length, 1);
        // a router stage and the selected filter's upstream stage
        assert_eq!(req.stages().len(), 2);
        assert_eq!(req.stages()[0].kind, PipelineStageKind::Router);
        assert_eq!(req.stages()[1].kind, PipelineStageKind::Upstream);

        let head = parse_head(b"GET /b HTTP/1.1\r\nHost: x\r\n\r\n").await;
        let mut req = test_request(head);
        let res = pipeline.execute(&mut req).await.unwrap();
        assert_eq!(res.content_length, 8);
    }

    #[tokio::test]
    async fn downstream_runs_in_order() {
        struct Marker(u16);

        #[async_trait]
        impl ResponseFilter for Marker {
            async fn filter_response(&self, req: &mut Request<'_>, res: &mut Response) {
                res.headers.append(
                    http::HeaderName::from_str("x-marker").unwrap(),
                    self.0.to_string().parse().unwrap(),
                );
                if let Some(stage) = req.current_stage() {
                    stage.status = StageStatus::Success;
                }
            }
        }

        let mut pipeline = Pipeline::new();
        pipeline.add_upstream_filter(request_filter_fn(|_| {
            Some(Response::from_string(200, None, "x"))
        }));
        pipeline.add_downstream_filter(Arc::new(Marker(1)));
        pipeline.add_downstream_filter(Arc::new(Marker(2)));

        let head = parse_head(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;
        let mut req = test_request(head);
        let res = pipeline.execute(&mut req).await.unwrap();
        let markers: Vec<_> = res.headers.get_all("x-marker").iter().collect();
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0], "1");
        assert_eq!(markers[1], "2");
        assert_eq!(req.stages().len(), 3);
    }
}
