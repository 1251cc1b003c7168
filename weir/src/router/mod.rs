/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

mod host;
pub use host::HostRouter;

mod path;
pub use path::{PathRouter, Route};
