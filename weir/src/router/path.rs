/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use crate::pipeline::{RequestFilter, Router};
use crate::request::Request;

/// One route of a [`PathRouter`].
pub enum Route {
    /// Matches when the regex matches the request path.
    Regex(Regex, Arc<dyn RequestFilter>),
    /// Matches any request. Useful for fallthrough filters.
    MatchAny(Arc<dyn RequestFilter>),
}

impl Route {
    fn match_path(&self, path: &str) -> Option<&Arc<dyn RequestFilter>> {
        match self {
            Route::Regex(re, filter) => re.is_match(path).then_some(filter),
            Route::MatchAny(filter) => Some(filter),
        }
    }
}

/// Routes requests by path: the first matching route wins.
#[derive(Default)]
pub struct PathRouter {
    routes: Vec<Route>,
}

impl PathRouter {
    pub fn new() -> Self {
        PathRouter::default()
    }

    pub fn add_route(&mut self, route: Route) {
        self.routes.push(route);
    }

    /// Convenience method for adding regex routes.
    pub fn add_match(
        &mut self,
        pattern: &str,
        filter: Arc<dyn RequestFilter>,
    ) -> Result<(), regex::Error> {
        let re = Regex::new(pattern)?;
        self.routes.push(Route::Regex(re, filter));
        Ok(())
    }
}

#[async_trait]
impl Router for PathRouter {
    async fn select_pipeline(&self, req: &mut Request<'_>) -> Option<Arc<dyn RequestFilter>> {
        let path = req.head.uri.path();
        for route in &self.routes {
            if let Some(filter) = route.match_path(path) {
                return Some(Arc::clone(filter));
            }
        }
        None
    }
}
