/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::pipeline::RequestFilter;
use crate::request::{Request, StageStatus};
use crate::response::Response;

type Condition = Box<dyn Fn(&Request<'_>) -> bool + Send + Sync>;

struct Ticker {
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<()>>>,
    task: JoinHandle<()>,
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn start_ticker(rps: u32) -> Ticker {
    let (tx, rx) = mpsc::channel(1);
    let period = Duration::from_secs(1) / rps;
    let task = tokio::spawn(async move {
        // like a wall-clock ticker, the first tick comes one period in
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            // drop the tick when nobody is waiting
            if tx.try_send(()).is_err() && tx.is_closed() {
                break;
            }
        }
    });
    Ticker {
        rx: Arc::new(tokio::sync::Mutex::new(rx)),
        task,
    }
}

/// Throttles passing requests to a maximum number of requests per second,
/// server wide. Requests wait for a tick of the current ticker; dynamic
/// reconfiguration swaps the ticker and releases every waiter to go look
/// for the new one.
pub struct Throttler {
    /// When set and returning false, the request is not throttled.
    condition: Option<Condition>,
    pending: AtomicI64,
    ticker: RwLock<Option<Ticker>>,
}

impl Throttler {
    pub fn new(rps: i32) -> Self {
        let ticker = (rps > 0).then(|| start_ticker(rps as u32));
        Throttler {
            condition: None,
            pending: AtomicI64::new(0),
            ticker: RwLock::new(ticker),
        }
    }

    pub fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&Request<'_>) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Box::new(condition));
        self
    }

    /// Change the throttling limit. RPS ≤ 0 disables throttling. Waiting
    /// requests re-acquire the new ticker, or proceed immediately when
    /// throttling is now off.
    pub fn set_rps(&self, rps: i32) {
        let new_ticker = (rps > 0).then(|| start_ticker(rps as u32));
        let mut slot = match self.ticker.write() {
            Ok(t) => t,
            Err(p) => p.into_inner(),
        };
        // dropping the old ticker aborts its task, which closes the tick
        // channel and signals waiting requests to look again
        *slot = new_ticker;
    }

    /// The number of requests waiting on the throttler.
    pub fn pending(&self) -> i64 {
        self.pending.load(Ordering::Relaxed)
    }

    /// Logs the number of pending requests at warn level every `interval`.
    /// Quiet while nothing is being throttled.
    pub fn start_reporter(self: Arc<Self>, name: &str, interval: Duration) {
        let throttler = self;
        let name = name.to_string();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let waiting = throttler.pending();
                if waiting > 0 {
                    warn!("{name}: {waiting} requests waiting");
                }
            }
        });
    }

    fn current_rx(&self) -> Option<Arc<tokio::sync::Mutex<mpsc::Receiver<()>>>> {
        let slot = match self.ticker.read() {
            Ok(t) => t,
            Err(p) => p.into_inner(),
        };
        slot.as_ref().map(|t| Arc::clone(&t.rx))
    }
}

#[async_trait]
impl RequestFilter for Throttler {
    async fn filter_request(&self, req: &mut Request<'_>) -> Option<Response> {
        if let Some(stage) = req.current_stage() {
            stage.status = StageStatus::Success;
        }

        if let Some(condition) = &self.condition {
            if !condition(req) {
                return None;
            }
        }

        let Some(mut rx) = self.current_rx() else {
            return None;
        };

        if let Some(stage) = req.current_stage() {
            stage.status = StageStatus::Skipped;
        }
        self.pending.fetch_add(1, Ordering::Relaxed);
        loop {
            let tick = rx.lock().await.recv().await;
            match tick {
                Some(()) => break,
                None => {
                    // the ticker was swapped out under us, grab the
                    // current one and try again
                    match self.current_rx() {
                        Some(new_rx) => rx = new_rx,
                        None => break,
                    }
                }
            }
        }
        self.pending.fetch_sub(1, Ordering::Relaxed);
        None
    }
}
