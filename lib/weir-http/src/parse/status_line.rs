/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use http::Version;

use super::{HttpLineParseError, parse_http_version, trim_line_ending};

pub struct HttpStatusLine<'a> {
    pub version: Version,
    pub code: u16,
    pub reason: &'a str,
}

impl<'a> HttpStatusLine<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<HttpStatusLine<'a>, HttpLineParseError> {
        let line = std::str::from_utf8(trim_line_ending(buf))?;

        let (proto, rest) = line
            .split_once(' ')
            .ok_or(HttpLineParseError::NoDelimiterFound(' '))?;
        let version = parse_http_version(proto)?;

        let rest = rest.trim_start();
        let (code_field, reason) = match rest.split_once(' ') {
            Some((code, reason)) => (code, reason.trim()),
            None => (rest, ""),
        };
        if code_field.len() != 3 {
            return Err(HttpLineParseError::InvalidStatusCode);
        }
        let code: u16 = code_field
            .parse()
            .map_err(|_| HttpLineParseError::InvalidStatusCode)?;

        Ok(HttpStatusLine {
            version,
            code,
            reason,
        })
    }
}
