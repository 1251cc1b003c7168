/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

#[cfg(unix)]
mod unix {
    use std::os::fd::{BorrowedFd, RawFd};

    use socket2::SockRef;
    use tokio::net::TcpStream;

    /// Raw-socket operations on a connection whose ownership has moved
    /// into split halves. Only valid while the connection task keeps the
    /// halves alive.
    #[derive(Clone, Copy)]
    pub(crate) struct SockOps {
        fd: Option<RawFd>,
    }

    impl SockOps {
        pub(crate) fn from_stream(stream: &TcpStream) -> Self {
            use std::os::fd::AsRawFd;
            SockOps {
                fd: Some(stream.as_raw_fd()),
            }
        }

        pub(crate) fn none() -> Self {
            SockOps { fd: None }
        }

        /// Toggle TCP_NODELAY. Returns false when the option could not be
        /// applied, in which case the caller skips the batching dance.
        pub(crate) fn set_nodelay(&self, on: bool) -> bool {
            let Some(fd) = self.fd else {
                return false;
            };
            let fd = unsafe { BorrowedFd::borrow_raw(fd) };
            SockRef::from(&fd).set_nodelay(on).is_ok()
        }
    }
}

#[cfg(unix)]
pub(crate) use unix::SockOps;

#[cfg(not(unix))]
mod fallback {
    use tokio::net::TcpStream;

    #[derive(Clone, Copy)]
    pub(crate) struct SockOps;

    impl SockOps {
        pub(crate) fn from_stream(_stream: &TcpStream) -> Self {
            SockOps
        }

        pub(crate) fn none() -> Self {
            SockOps
        }

        pub(crate) fn set_nodelay(&self, _on: bool) -> bool {
            false
        }
    }
}

#[cfg(not(unix))]
pub(crate) use fallback::SockOps;
