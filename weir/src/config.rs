/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

/// Tunables of one [`Server`](crate::Server) instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Capacity of the pooled per-connection read buffers.
    pub read_buffer_size: usize,
    /// Capacity of the pooled per-connection write buffers.
    pub write_buffer_size: usize,
    /// Entries kept in each buffer pool; further give-backs are discarded.
    pub buffer_pool_size: usize,
    /// Upper bound for the request line plus all header lines.
    pub max_header_size: usize,
    /// Upper bound for a single chunk-size or trailer line in a body.
    pub body_line_max_len: usize,
    /// Scratch buffer size for body copies.
    pub copy_buffer_size: usize,
    /// Unread request body bytes drained before the next request on a
    /// keep-alive connection; larger leftovers force a close instead.
    pub max_drain_size: usize,
    /// How long an in-flight request parse may continue once the server
    /// has been told to stop accepting.
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            read_buffer_size: 8192,
            write_buffer_size: 4096,
            buffer_pool_size: 100,
            max_header_size: 64 * 1024,
            body_line_max_len: 8192,
            copy_buffer_size: 16 * 1024,
            max_drain_size: 256 * 1024,
            shutdown_grace: Duration::from_secs(3),
        }
    }
}
