/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use atoi::FromRadix16;

use super::{HttpLineParseError, trim_line_ending};

pub struct HttpChunkedLine<'a> {
    pub chunk_size: u64,
    pub extension: Option<&'a str>,
}

impl<'a> HttpChunkedLine<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<HttpChunkedLine<'a>, HttpLineParseError> {
        let line = trim_line_ending(buf);

        let (size_field, extension) = match memchr::memchr(b';', line) {
            Some(p) => {
                let ext = std::str::from_utf8(&line[p + 1..])?.trim();
                (&line[..p], Some(ext))
            }
            None => (line, None),
        };

        // the whole field must be hex digits, nothing else
        let size_field = size_field.trim_ascii();
        let (chunk_size, digits) = u64::from_radix_16(size_field);
        if digits == 0 || digits != size_field.len() {
            return Err(HttpLineParseError::InvalidChunkSize);
        }

        Ok(HttpChunkedLine {
            chunk_size,
            extension,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple() {
        let chunk = HttpChunkedLine::parse(b"1\r\n").unwrap();
        assert_eq!(chunk.chunk_size, 1);

        let chunk = HttpChunkedLine::parse(b"1F\r\n").unwrap();
        assert_eq!(chunk.chunk_size, 0x1f);
    }

    #[test]
    fn last_chunk() {
        let chunk = HttpChunkedLine::parse(b"0\r\n").unwrap();
        assert_eq!(chunk.chunk_size, 0);
    }

    #[test]
    fn with_extension() {
        let chunk = HttpChunkedLine::parse(b"1; ieof\r\n").unwrap();
        assert_eq!(chunk.chunk_size, 1);
        assert_eq!(chunk.extension, Some("ieof"));
    }

    #[test]
    fn garbage() {
        assert!(HttpChunkedLine::parse(b"zz\r\n").is_err());
        assert!(HttpChunkedLine::parse(b"1f junk\r\n").is_err());
        assert!(HttpChunkedLine::parse(b"\r\n").is_err());
    }
}
