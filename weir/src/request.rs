/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::time::{Duration, Instant, SystemTime};

use http::{Method, Uri, Version};
use uuid::Uuid;

use weir_http::server::RequestHead;

use crate::body::RequestBody;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStageKind {
    Upstream,
    Downstream,
    Router,
    Overhead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StageStatus {
    Success = 0,
    Skipped = 1,
    Failure = 2,
}

/// Timing and outcome of one filter execution. Appended to the request in
/// execution order and never mutated once the stage has finished.
#[derive(Debug, Clone)]
pub struct PipelineStageStat {
    pub name: String,
    pub kind: PipelineStageKind,
    pub start: Instant,
    pub end: Option<Instant>,
    pub status: StageStatus,
}

impl PipelineStageStat {
    pub fn new(name: &str, kind: PipelineStageKind) -> Self {
        Self::with_start(name, kind, Instant::now())
    }

    pub fn with_start(name: &str, kind: PipelineStageKind, start: Instant) -> Self {
        PipelineStageStat {
            name: name.to_string(),
            kind,
            start,
            end: None,
            status: StageStatus::Success,
        }
    }

    pub fn finish(&mut self) {
        self.end = Some(Instant::now());
    }

    pub fn duration(&self) -> Duration {
        match self.end {
            Some(end) => end.duration_since(self.start),
            None => self.start.elapsed(),
        }
    }
}

/// One inbound request travelling through the pipeline. Owned by its
/// connection task; filters receive exclusive references, there is no
/// cross-task sharing.
pub struct Request<'a> {
    pub head: RequestHead,
    pub remote_addr: Option<SocketAddr>,
    pub id: Uuid,
    pub received: SystemTime,
    body: Option<RequestBody<'a>>,
    current_stage: Option<PipelineStageStat>,
    stages: Vec<PipelineStageStat>,
}

impl<'a> Request<'a> {
    pub fn new(
        head: RequestHead,
        body: Option<RequestBody<'a>>,
        remote_addr: Option<SocketAddr>,
        received: SystemTime,
    ) -> Self {
        Request {
            head,
            remote_addr,
            id: Uuid::new_v4(),
            received,
            body,
            current_stage: None,
            stages: Vec::with_capacity(8),
        }
    }

    /// The request body, if the request carries one. Reading it may emit
    /// the deferred `100 Continue` preamble.
    pub fn body(&mut self) -> Option<&mut RequestBody<'a>> {
        self.body.as_mut()
    }

    pub(crate) fn start_stage(&mut self, name: &str, kind: PipelineStageKind) {
        self.current_stage = Some(PipelineStageStat::new(name, kind));
    }

    pub(crate) fn finish_stage(&mut self) {
        if let Some(mut stage) = self.current_stage.take() {
            stage.finish();
            self.stages.push(stage);
        }
    }

    /// The stage currently being executed. Filters may rename it or mark
    /// its status.
    pub fn current_stage(&mut self) -> Option<&mut PipelineStageStat> {
        self.current_stage.as_mut()
    }

    pub fn append_stage(&mut self, stage: PipelineStageStat) {
        self.stages.push(stage);
    }

    pub fn stages(&self) -> &[PipelineStageStat] {
        &self.stages
    }

    /// Close out the request, yielding its diagnostic record and whatever
    /// is left of the body.
    pub(crate) fn finish(self) -> (RequestRecord, Option<RequestBody<'a>>) {
        let record = RequestRecord {
            id: self.id,
            method: self.head.method.clone(),
            uri: self.head.uri.clone(),
            version: self.head.version,
            remote_addr: self.remote_addr,
            received: self.received,
            stages: self.stages,
        };
        (record, self.body)
    }
}

/// What remains of a [`Request`] once its response has been produced;
/// handed to the completion callback.
pub struct RequestRecord {
    pub id: Uuid,
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub remote_addr: Option<SocketAddr>,
    pub received: SystemTime,
    pub stages: Vec<PipelineStageStat>,
}
