/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::time::SystemTime;

use async_trait::async_trait;
use http::{HeaderValue, header};

use crate::pipeline::ResponseFilter;
use crate::request::{Request, StageStatus};
use crate::response::Response;

/// Sets the `Date` header to the current date when the response carries
/// none.
#[derive(Default)]
pub struct DateFilter;

#[async_trait]
impl ResponseFilter for DateFilter {
    async fn filter_response(&self, req: &mut Request<'_>, res: &mut Response) {
        if let Some(stage) = req.current_stage() {
            stage.status = StageStatus::Skipped;
        }
        if !res.headers.contains_key(header::DATE) {
            let date = httpdate::fmt_http_date(SystemTime::now());
            if let Ok(value) = HeaderValue::from_str(&date) {
                res.headers.insert(header::DATE, value);
                if let Some(stage) = req.current_stage() {
                    stage.status = StageStatus::Success;
                }
            }
        }
    }
}
