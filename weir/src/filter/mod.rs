/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

mod transport;
pub use transport::{UpstreamError, UpstreamTransport, split_host_port};

mod upstream;
pub use upstream::Upstream;

mod upstream_pool;
pub use upstream_pool::{UpstreamPool, UpstreamPoolEntry};

mod throttle;
pub use throttle::Throttler;

mod compression;
pub use compression::CompressionFilter;

mod date;
pub use date::DateFilter;

mod etag;
pub use etag::EtagFilter;
