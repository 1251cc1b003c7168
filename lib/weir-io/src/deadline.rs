/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep};

/// Stream wrapper where every completed write arms a shared read+write
/// deadline. A poll that stays pending past the deadline fails with
/// `TimedOut`. Reads do not rearm the deadline.
#[pin_project]
pub struct DeadlineStream<S> {
    #[pin]
    inner: S,
    timeout: Duration,
    delay: Pin<Box<Sleep>>,
    armed: bool,
}

impl<S> DeadlineStream<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        DeadlineStream {
            inner,
            timeout,
            delay: Box::pin(tokio::time::sleep(Duration::from_millis(0))),
            armed: false,
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead> AsyncRead for DeadlineStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        match this.inner.poll_read(cx, buf) {
            Poll::Ready(r) => Poll::Ready(r),
            Poll::Pending => {
                if *this.armed && this.delay.as_mut().poll(cx).is_ready() {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "read deadline exceeded",
                    )));
                }
                Poll::Pending
            }
        }
    }
}

impl<S: AsyncWrite> AsyncWrite for DeadlineStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        if !*this.armed {
            this.delay.as_mut().reset(Instant::now() + *this.timeout);
            *this.armed = true;
        }
        match this.inner.poll_write(cx, buf) {
            Poll::Ready(r) => {
                this.delay.as_mut().reset(Instant::now() + *this.timeout);
                Poll::Ready(r)
            }
            Poll::Pending => {
                if this.delay.as_mut().poll(cx).is_ready() {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "write deadline exceeded",
                    )));
                }
                Poll::Pending
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}
