/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use ahash::AHashMap;
use async_trait::async_trait;

use crate::pipeline::{RequestFilter, Router};
use crate::request::Request;

/// Routes requests by exact match on the `Host` header.
#[derive(Default)]
pub struct HostRouter {
    hosts: AHashMap<String, Arc<dyn RequestFilter>>,
}

impl HostRouter {
    pub fn new() -> Self {
        HostRouter::default()
    }

    pub fn add_match(&mut self, host: &str, filter: Arc<dyn RequestFilter>) {
        self.hosts.insert(host.to_string(), filter);
    }
}

#[async_trait]
impl Router for HostRouter {
    async fn select_pipeline(&self, req: &mut Request<'_>) -> Option<Arc<dyn RequestFilter>> {
        let host = req.head.host.as_deref()?;
        self.hosts.get(host).cloned()
    }
}
