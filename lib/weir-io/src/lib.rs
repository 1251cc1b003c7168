/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

mod line;
pub use line::{LineRead, read_line_limited};

mod swap;
pub use swap::{BoxAsyncRead, BoxAsyncWrite, SwapReader, SwapWriter};

mod pool;
pub use pool::{ReadBufEntry, ReadBufferPool, WriteBufEntry, WriteBufferPool};

mod deadline;
pub use deadline::DeadlineStream;
