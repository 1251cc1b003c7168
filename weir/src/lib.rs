/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! An embeddable HTTP/1.1 server framework built around a filter pipeline:
//! inbound requests traverse an ordered list of upstream filters until one
//! of them produces a response, then the response traverses an ordered list
//! of downstream filters before being written to the socket.

mod config;
pub use config::ServerConfig;

mod request;
pub use request::{PipelineStageKind, PipelineStageStat, Request, RequestRecord, StageStatus};

mod body;
pub use body::RequestBody;

mod response;
pub use response::{Response, ResponseBody};

mod pipeline;
pub use pipeline::{
    Pipeline, RequestFilter, ResponseFilter, Router, UpstreamEntry, request_filter_fn, router_fn,
};

pub mod filter;
pub mod router;

mod serve;
pub use serve::{CompletionCallback, PanicHandler, ResponseSummary, Server, ServerStats};

pub use weir_http::server::RequestHead;
pub use weir_http::HttpBodyType;
